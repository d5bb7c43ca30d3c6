use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::evaluation::prompts::{
    cv_context_query, DIRECT_CV_GUIDANCE, DIRECT_REPORT_GUIDANCE, REPORT_CONTEXT_QUERY,
};
use crate::evaluation::EvaluationError;
use crate::retrieval::{format_context, ContextIndex};

/// Rendered CONTEXT blocks for the two document prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RubricContexts {
    pub cv: String,
    pub report: String,
}

/// How the rubric context for a job is obtained.
#[async_trait]
pub trait EvaluationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some(reason)` when this strategy cannot serve any job right now.
    /// Checked before any document is touched.
    fn unavailable_reason(&self) -> Option<String>;

    async fn rubric_contexts(&self, job_title: &str) -> Result<RubricContexts, EvaluationError>;
}

/// Retrieval-augmented strategy: both contexts come from the semantic index.
pub struct RagStrategy {
    index: Option<Arc<dyn ContextIndex>>,
    top_k: usize,
}

impl RagStrategy {
    /// `index` is `None` when the snapshot failed to load at startup.
    pub fn new(index: Option<Arc<dyn ContextIndex>>, top_k: usize) -> Self {
        Self { index, top_k }
    }
}

#[async_trait]
impl EvaluationStrategy for RagStrategy {
    fn name(&self) -> &'static str {
        "rag"
    }

    fn unavailable_reason(&self) -> Option<String> {
        match self.index {
            Some(_) => None,
            None => Some("the rubric index is not loaded".to_string()),
        }
    }

    async fn rubric_contexts(&self, job_title: &str) -> Result<RubricContexts, EvaluationError> {
        let index = self.index.as_ref().ok_or_else(|| {
            EvaluationError::IndexUnavailable("the rubric index is not loaded".to_string())
        })?;

        let cv_query = cv_context_query(job_title);
        let (cv, report) = tokio::try_join!(
            index.retrieve(&cv_query, self.top_k),
            index.retrieve(REPORT_CONTEXT_QUERY, self.top_k),
        )?;

        debug!(
            cv_passages = cv.len(),
            report_passages = report.len(),
            "Retrieved rubric context"
        );

        Ok(RubricContexts {
            cv: format_context(&cv),
            report: format_context(&report),
        })
    }
}

/// Prompts with fixed built-in guidance; never touches the index.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectStrategy;

#[async_trait]
impl EvaluationStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn unavailable_reason(&self) -> Option<String> {
        None
    }

    async fn rubric_contexts(&self, _job_title: &str) -> Result<RubricContexts, EvaluationError> {
        Ok(RubricContexts {
            cv: DIRECT_CV_GUIDANCE.to_string(),
            report: DIRECT_REPORT_GUIDANCE.to_string(),
        })
    }
}
