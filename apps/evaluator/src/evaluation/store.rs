use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::evaluation::record::{EvaluationRecord, EvaluationStatus};
use crate::models::evaluation::EvaluationResultRow;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored record for job {job_id} is corrupt: {message}")]
    Corrupt { job_id: String, message: String },
}

/// Durable storage for evaluation records. At most one record per job id;
/// `save` replaces the stored state for that id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(&self, job_id: &str) -> Result<Option<EvaluationRecord>, StoreError>;

    async fn save(&self, record: &EvaluationRecord) -> Result<(), StoreError>;
}

/// Postgres-backed store over `evaluation_results` (unique on `job_id`).
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find(&self, job_id: &str) -> Result<Option<EvaluationRecord>, StoreError> {
        let row: Option<EvaluationResultRow> =
            sqlx::query_as("SELECT * FROM evaluation_results WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(record_from_row).transpose()
    }

    async fn save(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        // Upsert keyed on job_id: redelivered jobs overwrite instead of duplicating
        sqlx::query(
            r#"
            INSERT INTO evaluation_results (job_id, status, result)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id) DO UPDATE
                SET status = EXCLUDED.status,
                    result = EXCLUDED.result,
                    updated_at = NOW()
            "#,
        )
        .bind(&record.job_id)
        .bind(record.status.as_str())
        .bind(&record.result)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn record_from_row(row: EvaluationResultRow) -> Result<EvaluationRecord, StoreError> {
    let status = row
        .status
        .parse::<EvaluationStatus>()
        .map_err(|message| StoreError::Corrupt {
            job_id: row.job_id.clone(),
            message,
        })?;

    Ok(EvaluationRecord {
        job_id: row.job_id,
        status,
        result: row.result,
    })
}
