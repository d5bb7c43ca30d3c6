use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row written by the upload service; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DocumentRow {
    pub id: i32,
    pub original_name: String,
    pub file_name: String,
    pub path: String,
}
