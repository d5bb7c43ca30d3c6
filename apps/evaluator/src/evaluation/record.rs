use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Lifecycle of an evaluation record. Transitions only move forward:
/// queued → processing → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Queued => "queued",
            EvaluationStatus::Processing => "processing",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationStatus::Completed | EvaluationStatus::Failed)
    }

    /// `processing → processing` is allowed: a job redelivered after a crash
    /// restarts from scratch. `queued → failed` covers the fast-fail guard.
    pub fn can_transition_to(&self, next: EvaluationStatus) -> bool {
        use EvaluationStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(EvaluationStatus::Queued),
            "processing" => Ok(EvaluationStatus::Processing),
            "completed" => Ok(EvaluationStatus::Completed),
            "failed" => Ok(EvaluationStatus::Failed),
            other => Err(format!("unknown evaluation status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition {from} -> {to} for job {job_id}")]
pub struct TransitionError {
    pub job_id: String,
    pub from: EvaluationStatus,
    pub to: EvaluationStatus,
}

/// The durable outcome of one evaluation job, keyed by job id.
///
/// `result` is `None` until the record is terminal; then it holds either the
/// merged evaluation or `{ "error": "<message>" }`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub job_id: String,
    pub status: EvaluationStatus,
    pub result: Option<Value>,
}

impl EvaluationRecord {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: EvaluationStatus::Queued,
            result: None,
        }
    }

    fn transition(&mut self, next: EvaluationStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.job_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(EvaluationStatus::Processing)?;
        self.result = None;
        Ok(())
    }

    pub fn complete(&mut self, result: Value) -> Result<(), TransitionError> {
        self.transition(EvaluationStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(EvaluationStatus::Failed)?;
        self.result = Some(json!({ "error": message.into() }));
        Ok(())
    }

    /// The stored error message for a failed record.
    pub fn error_message(&self) -> Option<&str> {
        match self.status {
            EvaluationStatus::Failed => self
                .result
                .as_ref()
                .and_then(|r| r.get("error"))
                .and_then(|e| e.as_str()),
            _ => None,
        }
    }
}
