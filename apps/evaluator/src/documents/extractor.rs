//! PDF → plain text.
//!
//! Storage paths are either local filesystem paths or `s3://bucket/key`
//! objects. Parsing is CPU-bound and runs on the blocking pool.

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error};

const S3_SCHEME: &str = "s3://";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Could not read document file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not fetch document object {path}: {message}")]
    ObjectStore { path: String, message: String },

    #[error("Document path {path} points at S3 but no S3 endpoint is configured")]
    ObjectStoreNotConfigured { path: String },

    #[error("Could not process PDF file {path}: {message}")]
    Parse { path: String, message: String },
}

/// Converts a stored document into plain text.
///
/// A corrupt or non-PDF file is an error. An empty string is only returned
/// for a well-formed PDF without a text layer.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &str) -> Result<String, ExtractionError>;
}

pub struct PdfTextExtractor {
    s3: Option<S3Client>,
}

impl PdfTextExtractor {
    pub fn new(s3: Option<S3Client>) -> Self {
        Self { s3 }
    }

    async fn read_document(&self, path: &str) -> Result<Bytes, ExtractionError> {
        match parse_s3_path(path) {
            Some((bucket, key)) => {
                let s3 = self
                    .s3
                    .as_ref()
                    .ok_or_else(|| ExtractionError::ObjectStoreNotConfigured {
                        path: path.to_string(),
                    })?;
                let object = s3
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| ExtractionError::ObjectStore {
                        path: path.to_string(),
                        message: e.to_string(),
                    })?;
                let data = object
                    .body
                    .collect()
                    .await
                    .map_err(|e| ExtractionError::ObjectStore {
                        path: path.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(data.into_bytes())
            }
            None => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|source| ExtractionError::Read {
                    path: path.to_string(),
                    source,
                }),
        }
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, path: &str) -> Result<String, ExtractionError> {
        let bytes = self.read_document(path).await?;
        debug!(path, bytes = bytes.len(), "Parsing PDF");

        let parsed = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| ExtractionError::Parse {
                path: path.to_string(),
                message: format!("parser aborted: {e}"),
            })?;

        parsed.map_err(|e| {
            error!(path, "Failed to parse PDF: {e}");
            ExtractionError::Parse {
                path: path.to_string(),
                message: e.to_string(),
            }
        })
    }
}

/// Splits `s3://bucket/key` into its parts. Anything else is a local path.
fn parse_s3_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix(S3_SCHEME)?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}
