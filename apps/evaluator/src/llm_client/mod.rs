/// LLM Client — the single point of entry for all chat-completion calls.
///
/// ARCHITECTURAL RULE: No other module may call the model endpoint directly.
/// All LLM interactions MUST go through `LlmCaller`.
///
/// Exactly one HTTP attempt per call. Job-level retries live in the queue,
/// so a failed call surfaces immediately as a classified `LlmError`.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmSettings;

pub mod prompts;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API key is not configured (set OPENROUTER_KEY)")]
    MissingApiKey,

    #[error("LLM API error (status {status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("LLM API timeout: no reply within {secs} seconds")]
    Timeout { secs: u64 },

    #[error("LLM API error: no response received ({0})")]
    NoResponse(String),

    #[error("Invalid response structure received from LLM API: {0}")]
    MalformedResponse(String),
}

impl LlmError {
    /// Stable classification label, used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::MissingApiKey => "auth",
            LlmError::Upstream { .. } => "upstream-error",
            LlmError::Timeout { .. } => "timeout",
            LlmError::NoResponse(_) => "no-response",
            LlmError::MalformedResponse(_) => "malformed-response",
        }
    }
}

/// Anything that can turn a prompt into the model's raw text reply.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    async fn call(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenRouter-compatible chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn classify(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                secs: self.settings.timeout_secs,
            }
        } else {
            LlmError::NoResponse(err.to_string())
        }
    }
}

#[async_trait]
impl LlmCaller for LlmClient {
    async fn call(&self, prompt: &str) -> Result<String, LlmError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;

        let request_body = ChatRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: self.settings.temperature,
        };

        let result = async {
            let response = self
                .client
                .post(&self.settings.api_url)
                .bearer_auth(api_key)
                .json(&request_body)
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            let status = response.status();
            let body = response.text().await.map_err(|e| self.classify(e))?;

            if !status.is_success() {
                return Err(LlmError::Upstream {
                    status: status.as_u16(),
                    body,
                });
            }

            extract_content(&body)
        }
        .await;

        match &result {
            Ok(content) => debug!(
                model = %self.settings.model,
                chars = content.len(),
                "LLM call succeeded"
            ),
            Err(e) => warn!(model = %self.settings.model, kind = e.kind(), "LLM call failed: {e}"),
        }

        result
    }
}

/// Pulls `choices[0].message.content` out of a successful response body.
fn extract_content(body: &str) -> Result<String, LlmError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::MalformedResponse(format!("body is not valid JSON: {e}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            LlmError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}
