//! Semantic retrieval over the prebuilt rubric index.
//!
//! The index is built offline from the job descriptions, scoring rubrics and
//! case-study brief. At runtime it is a read-only snapshot shared by every
//! job handler.

use async_trait::async_trait;
use thiserror::Error;

pub mod embedder;
pub mod index;

pub use embedder::{HttpEmbedder, QueryEmbedder};
pub use index::{IndexSnapshot, SemanticIndex};

/// Rendered in place of retrieved passages when a query matches nothing.
pub const EMPTY_CONTEXT_PLACEHOLDER: &str = "No relevant context found.";

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Failed to load index snapshot from {path}: {message}")]
    Load { path: String, message: String },

    #[error("Index snapshot is invalid: {0}")]
    InvalidSnapshot(String),

    #[error("Query embedding failed: {0}")]
    Embedding(String),

    #[error("Query embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// One retrieved passage and its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub text: String,
    pub score: f32,
}

/// Passages ordered by descending score.
pub type RetrievedContext = Vec<RetrievedPassage>;

/// Top-K nearest-neighbour lookup. Deterministic for a fixed snapshot and query.
#[async_trait]
pub trait ContextIndex: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize)
        -> Result<RetrievedContext, RetrievalError>;
}

/// Renders retrieved passages into the CONTEXT block of a prompt.
pub fn format_context(context: &[RetrievedPassage]) -> String {
    if context.is_empty() {
        return EMPTY_CONTEXT_PLACEHOLDER.to_string();
    }

    context
        .iter()
        .enumerate()
        .map(|(i, passage)| {
            format!(
                "--- Context snippet {} (score {:.2}) ---\n{}",
                i + 1,
                passage.score,
                passage.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
