use std::sync::Arc;

use crate::evaluation::RecordStore;
use crate::queue::JobEnqueuer;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn RecordStore>,
    pub queue: Arc<dyn JobEnqueuer>,
}
