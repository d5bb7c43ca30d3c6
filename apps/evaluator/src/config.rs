use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

pub const DEFAULT_LLM_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "mistralai/mistral-7b-instruct:free";
pub const DEFAULT_EMBEDDING_API_URL: &str = "http://localhost:8081/v1/embeddings";
pub const DEFAULT_QUEUE_NAME: &str = "evaluation-queue";

/// Which evaluation pipeline the worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Retrieval-augmented: rubric context comes from the semantic index.
    Rag,
    /// Direct prompting without retrieval; no index prerequisite.
    Direct,
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rag" => Ok(StrategyKind::Rag),
            "direct" => Ok(StrategyKind::Direct),
            other => bail!("EVALUATION_STRATEGY must be 'rag' or 'direct', got '{other}'"),
        }
    }
}

/// Settings for the external chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_url: String,
    /// `None` when OPENROUTER_KEY is unset; calls then fail with an auth error.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

/// Settings for the semantic index snapshot and the query embedder.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub index_path: PathBuf,
    pub embedding_api_url: String,
    pub embedding_api_key: Option<String>,
    pub top_k: usize,
}

/// Job-level delivery policy applied at enqueue time.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub name: String,
    pub attempts: u32,
    pub backoff_ms: u64,
    pub concurrency: usize,
}

/// Optional S3 / MinIO access for `s3://` document paths.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Application configuration loaded once from environment variables and
/// passed by reference into everything that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub llm: LlmSettings,
    pub retrieval: RetrievalSettings,
    pub queue: QueueSettings,
    pub s3: Option<S3Settings>,
    pub strategy: StrategyKind,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let s3 = match std::env::var("S3_ENDPOINT") {
            Ok(endpoint) => Some(S3Settings {
                endpoint,
                access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
                secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            }),
            Err(_) => None,
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            llm: LlmSettings {
                api_url: env_or("LLM_API_URL", DEFAULT_LLM_API_URL),
                api_key: optional_env("OPENROUTER_KEY"),
                model: env_or("LLM_MODEL", DEFAULT_LLM_MODEL),
                temperature: parse_env("LLM_TEMPERATURE", 0.2)?,
                timeout_secs: parse_env("LLM_TIMEOUT_SECS", 60)?,
            },
            retrieval: RetrievalSettings {
                index_path: PathBuf::from(env_or("INDEX_PATH", "./storage/index.json")),
                embedding_api_url: env_or("EMBEDDING_API_URL", DEFAULT_EMBEDDING_API_URL),
                embedding_api_key: optional_env("EMBEDDING_API_KEY"),
                top_k: parse_env("RETRIEVAL_TOP_K", 3)?,
            },
            queue: QueueSettings {
                name: env_or("QUEUE_NAME", DEFAULT_QUEUE_NAME),
                attempts: parse_env("JOB_ATTEMPTS", 3)?,
                backoff_ms: parse_env("JOB_BACKOFF_MS", 5000)?,
                concurrency: parse_env("WORKER_CONCURRENCY", 1)?,
            },
            s3,
            strategy: parse_env("EVALUATION_STRATEGY", StrategyKind::Rag)?,
            port: parse_env("PORT", 8080).context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Environment variable '{key}' is invalid: {e}")),
        Err(_) => Ok(default),
    }
}
