use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::retrieval::RetrievalError;

/// Embeds a retrieval query with the same model the index was built with.
#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint (TEI, Ollama, vLLM, ...).
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(client: Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl QueryEmbedder for HttpEmbedder {
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut request = self.client.post(&self.api_url).json(&EmbeddingRequest {
            model,
            input: [text],
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("unexpected response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RetrievalError::Embedding("response contained no embeddings".into()))
    }
}
