use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::retrieval::{
    ContextIndex, QueryEmbedder, RetrievalError, RetrievedContext, RetrievedPassage,
};

/// A passage of a reference document and its precomputed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedPassage {
    pub id: String,
    /// Reference document the passage came from, e.g. `scoring_rubric.pdf`.
    #[serde(default)]
    pub source: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// On-disk snapshot written by the offline ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub embedding_model: String,
    pub dimensions: usize,
    pub passages: Vec<IndexedPassage>,
}

impl IndexSnapshot {
    /// Reads and validates a snapshot. Any failure here means the index is
    /// unavailable for the lifetime of the process.
    pub async fn load(path: &Path) -> Result<Self, RetrievalError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::Load {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let snapshot: IndexSnapshot =
            serde_json::from_str(&raw).map_err(|e| RetrievalError::Load {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        snapshot.validate()?;

        info!(
            path = %path.display(),
            passages = snapshot.passages.len(),
            model = %snapshot.embedding_model,
            "Loaded index snapshot"
        );
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), RetrievalError> {
        if self.dimensions == 0 {
            return Err(RetrievalError::InvalidSnapshot(
                "dimensions must be positive".to_string(),
            ));
        }
        if self.passages.is_empty() {
            return Err(RetrievalError::InvalidSnapshot(
                "snapshot contains no passages".to_string(),
            ));
        }
        if let Some(bad) = self
            .passages
            .iter()
            .find(|p| p.embedding.len() != self.dimensions)
        {
            return Err(RetrievalError::InvalidSnapshot(format!(
                "passage {} has {} dimensions, expected {}",
                bad.id,
                bad.embedding.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

/// Brute-force cosine nearest-neighbour search over a loaded snapshot.
pub struct SemanticIndex {
    snapshot: IndexSnapshot,
    embedder: Arc<dyn QueryEmbedder>,
}

impl SemanticIndex {
    pub fn new(snapshot: IndexSnapshot, embedder: Arc<dyn QueryEmbedder>) -> Self {
        Self { snapshot, embedder }
    }

    /// Scores every passage against `query_embedding` and keeps the best `top_k`.
    /// Ties keep snapshot order.
    pub fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<RetrievedContext, RetrievalError> {
        if query_embedding.len() != self.snapshot.dimensions {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.snapshot.dimensions,
                actual: query_embedding.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .snapshot
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| (i, cosine_similarity(query_embedding, &p.embedding)))
            .collect();

        // sort_by is stable, so equal scores stay in snapshot order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| RetrievedPassage {
                text: self.snapshot.passages[i].text.clone(),
                score,
            })
            .collect())
    }
}

#[async_trait]
impl ContextIndex for SemanticIndex {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievedContext, RetrievalError> {
        let embedding = self
            .embedder
            .embed(&self.snapshot.embedding_model, query)
            .await?;
        let context = self.search(&embedding, top_k)?;
        debug!(top_k, hits = context.len(), "Retrieved context");
        Ok(context)
    }
}

/// Cosine similarity; zero-norm vectors score 0.0. Callers check dimensions.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
