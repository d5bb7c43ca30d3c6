pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::evaluation::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/evaluate", post(handlers::handle_evaluate))
        .route("/result/:id", get(handlers::handle_get_result))
        .with_state(state)
}
