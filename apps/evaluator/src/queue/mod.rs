//! At-least-once job queue for evaluation requests.
//!
//! Producers enqueue a `QueuedJob` envelope; consumers hand each delivery to a
//! `JobHandler`. A handler error schedules a retry with exponential backoff
//! until `max_attempts` is reached, after which the job is abandoned.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::QueueSettings;
use crate::evaluation::{EvaluationJob, EvaluationRequest};

pub mod redis_queue;
pub mod shutdown;

pub use redis_queue::RedisJobQueue;
pub use shutdown::{shutdown_channel, ShutdownToken, ShutdownTrigger};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Job payload could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Processes one delivered job. An `Err` means "try again later"; anticipated
/// pipeline failures are recorded by the handler and returned as `Ok`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &EvaluationJob) -> anyhow::Result<()>;
}

/// Submits new evaluation requests and returns the queue-assigned job id.
#[async_trait]
pub trait JobEnqueuer: Send + Sync {
    async fn enqueue(&self, request: EvaluationRequest) -> Result<String, QueueError>;
}

/// The envelope stored for each job while the queue owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub data: EvaluationRequest,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn new(id: impl Into<String>, data: EvaluationRequest, settings: &QueueSettings) -> Self {
        Self {
            id: id.into(),
            data,
            attempts_made: 0,
            max_attempts: settings.attempts,
            backoff_ms: settings.backoff_ms,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn to_evaluation_job(&self) -> EvaluationJob {
        EvaluationJob {
            id: self.id.clone(),
            request: self.data.clone(),
        }
    }

    /// Counts a failed attempt and decides what happens next.
    pub fn record_failure(&mut self, error: impl Into<String>) -> RetryDecision {
        self.attempts_made += 1;
        self.last_error = Some(error.into());
        retry_decision(self.attempts_made, self.max_attempts, self.backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-deliver after the given delay.
    Retry(Duration),
    /// Attempts exhausted; park the job in the failed list.
    Abandon,
}

/// Delay before the next attempt: `base_ms * 2^(attempts_made - 1)`.
pub fn backoff_delay(base_ms: u64, attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(20);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

pub fn retry_decision(attempts_made: u32, max_attempts: u32, base_ms: u64) -> RetryDecision {
    if attempts_made >= max_attempts {
        RetryDecision::Abandon
    } else {
        RetryDecision::Retry(backoff_delay(base_ms, attempts_made))
    }
}
