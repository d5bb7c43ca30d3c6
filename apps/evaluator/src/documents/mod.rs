//! Document resolution and text extraction.
//!
//! The upload service owns the `documents` table and the files themselves;
//! this module only resolves ids to storage paths and reads them back.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::models::document::DocumentRow;

pub mod extractor;

pub use extractor::{ExtractionError, PdfTextExtractor, TextExtractor};

pub type DocumentId = i32;

/// A resolved, read-only pointer to a stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReference {
    pub id: DocumentId,
    pub original_name: String,
    pub storage_path: String,
}

impl From<DocumentRow> for DocumentReference {
    fn from(row: DocumentRow) -> Self {
        Self {
            id: row.id,
            original_name: row.original_name,
            storage_path: row.path,
        }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document with id {id} not found")]
    NotFound { id: DocumentId },

    #[error("Document lookup for id {id} failed: {source}")]
    Lookup {
        id: DocumentId,
        #[source]
        source: sqlx::Error,
    },
}

/// Resolves document ids to storage paths.
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    async fn resolve(&self, id: DocumentId) -> Result<DocumentReference, DocumentError>;
}

/// Postgres-backed lookup over the upload service's `documents` table.
#[derive(Clone)]
pub struct PgDocumentLookup {
    pool: PgPool,
}

impl PgDocumentLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentLookup for PgDocumentLookup {
    async fn resolve(&self, id: DocumentId) -> Result<DocumentReference, DocumentError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, original_name, file_name, path FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| DocumentError::Lookup { id, source })?;

        row.map(DocumentReference::from)
            .ok_or(DocumentError::NotFound { id })
    }
}
