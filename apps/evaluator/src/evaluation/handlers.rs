use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::errors::AppError;
use crate::evaluation::service::{
    get_result_by_job_id, submit_evaluation, EnqueueResponse, EvaluationResultView,
};
use crate::evaluation::EvaluationRequest;
use crate::state::AppState;

/// POST /evaluate
pub async fn handle_evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvaluationRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    let response = submit_evaluation(state.queue.as_ref(), req).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /result/:id
pub async fn handle_get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EvaluationResultView>, AppError> {
    let view = get_result_by_job_id(state.records.as_ref(), &id).await?;
    Ok(Json(view))
}
