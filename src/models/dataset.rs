use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// An uploaded training corpus. Immutable after creation except for status;
/// re-uploads create new records.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Dataset {
    pub id: String,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub status: String,
    pub num_rows: Option<i64>,
    pub num_columns: Option<i64>,
    pub column_names: Option<Json<Vec<String>>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Best-effort structural summary produced at upload time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetPreview {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_rows: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_columns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DatasetUploadResponse {
    pub dataset_id: String,
    pub filename: String,
    pub size_bytes: i64,
    pub status: String,
    pub preview: DatasetPreview,
    pub created_at: DateTime<Utc>,
}
