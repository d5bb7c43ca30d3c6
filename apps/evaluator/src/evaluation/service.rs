use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::errors::AppError;
use crate::evaluation::record::EvaluationStatus;
use crate::evaluation::store::RecordStore;
use crate::evaluation::EvaluationRequest;
use crate::queue::JobEnqueuer;

/// Response to a submitted evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnqueueResponse {
    pub id: String,
    pub status: EvaluationStatus,
}

/// Public view of an evaluation record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResultView {
    pub id: String,
    pub status: EvaluationStatus,
    /// Present once the record is terminal: the merged scores, or `{ "error": ... }`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Validates a request and hands it to the queue.
pub async fn submit_evaluation(
    queue: &dyn JobEnqueuer,
    request: EvaluationRequest,
) -> Result<EnqueueResponse, AppError> {
    if request.job_title.trim().is_empty() {
        return Err(AppError::Validation("jobTitle must not be empty".to_string()));
    }
    if request.cv_id <= 0 || request.report_id <= 0 {
        return Err(AppError::Validation(
            "cvId and reportId must be positive document ids".to_string(),
        ));
    }

    let id = queue.enqueue(request).await?;
    info!(job_id = %id, "Evaluation submitted");

    Ok(EnqueueResponse {
        id,
        status: EvaluationStatus::Queued,
    })
}

/// Looks up a record by job id. Unknown ids are `NotFound`, which is distinct
/// from a record that is still queued or processing.
pub async fn get_result_by_job_id(
    records: &dyn RecordStore,
    job_id: &str,
) -> Result<EvaluationResultView, AppError> {
    let record = records
        .find(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result for job ID {job_id} not found.")))?;

    Ok(EvaluationResultView {
        id: record.job_id,
        status: record.status,
        result: record.result,
    })
}
