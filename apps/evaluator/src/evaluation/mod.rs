// Evaluation pipeline: CV + project report → rubric context → three LLM
// calls → one merged score record.
// All LLM calls go through llm_client::LlmCaller.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::documents::{DocumentError, DocumentId, ExtractionError};
use crate::llm_client::LlmError;
use crate::retrieval::RetrievalError;

pub mod handlers;
pub mod prompts;
pub mod record;
pub mod service;
pub mod store;
pub mod strategy;
pub mod worker;

#[cfg(test)]
pub mod fakes;

pub use record::{EvaluationRecord, EvaluationStatus};
pub use store::{PgRecordStore, RecordStore, StoreError};
pub use strategy::{DirectStrategy, EvaluationStrategy, RagStrategy};
pub use worker::{EvaluationWorker, JobOutcome};

/// Body of an evaluation request, as submitted by the caller and carried on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub cv_id: DocumentId,
    pub report_id: DocumentId,
    pub job_title: String,
}

/// A delivered job: the request plus the queue-assigned identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationJob {
    pub id: String,
    pub request: EvaluationRequest,
}

/// Which of the three sequential model calls an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cv,
    Report,
    Summary,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Cv => write!(f, "CV evaluation"),
            Stage::Report => write!(f, "Project report evaluation"),
            Stage::Summary => write!(f, "Overall summary"),
        }
    }
}

/// Anticipated pipeline failures. Each one ends the job as `failed`, with
/// the Display text stored as the user-visible error.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Context retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("{stage} call failed: {source}")]
    Llm {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    #[error("{stage} returned invalid JSON: {source}")]
    Parse {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },

    #[error("{stage} response is malformed: {message}")]
    MalformedResult { stage: Stage, message: String },
}
