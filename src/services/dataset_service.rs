use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{Dataset, DatasetPreview};
use crate::storage::FileStorage;

const ALLOWED_EXTENSIONS: [&str; 4] = ["csv", "json", "jsonl", "txt"];
const ALLOWED_CONTENT_TYPES: [&str; 4] = [
    "text/csv",
    "application/json",
    "text/plain",
    "application/octet-stream",
];

/// Service for dataset uploads, metadata records and structural previews.
#[derive(Clone)]
pub struct DatasetService {
    db_pool: SqlitePool,
    storage: FileStorage,
}

impl DatasetService {
    pub fn new(db_pool: SqlitePool, storage: FileStorage) -> Self {
        Self { db_pool, storage }
    }

    /// Reject files we cannot train on before touching disk.
    pub fn validate_upload(filename: &str, content_type: Option<&str>) -> std::result::Result<(), String> {
        let extension_ok = ALLOWED_EXTENSIONS
            .iter()
            .any(|ext| filename.to_lowercase().ends_with(&format!(".{ext}")));
        let content_type_ok = content_type
            .map(|ct| ALLOWED_CONTENT_TYPES.iter().any(|allowed| ct.starts_with(allowed)))
            .unwrap_or(false);

        if extension_ok || content_type_ok {
            Ok(())
        } else {
            Err(format!(
                "Unsupported file type: {}. Allowed: .csv, .json, .jsonl, .txt",
                content_type.unwrap_or("unknown")
            ))
        }
    }

    /// Persist an upload and its metadata record, returning the new record
    /// and the preview generated from the file content.
    pub async fn save_upload(
        &self,
        original_filename: &str,
        content_type: Option<String>,
        content: &[u8],
    ) -> Result<(Dataset, DatasetPreview)> {
        let dataset_id = Uuid::new_v4().to_string();
        let filename = FileStorage::stored_filename(&dataset_id, original_filename);
        let file_path = self.storage.save_upload(&filename, content).await?;

        let preview = generate_preview(original_filename, content_type.as_deref(), content);
        let now = Utc::now();

        let dataset = Dataset {
            id: dataset_id,
            filename,
            original_filename: original_filename.to_string(),
            file_path: file_path.to_string_lossy().to_string(),
            size_bytes: content.len() as i64,
            content_type: Some(
                content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            ),
            status: "uploaded".to_string(),
            num_rows: preview.num_rows,
            num_columns: preview.num_columns,
            column_names: preview.column_names.clone().map(Json),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO datasets (
                id, filename, original_filename, file_path, size_bytes,
                content_type, status, num_rows, num_columns, column_names,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&dataset.id)
        .bind(&dataset.filename)
        .bind(&dataset.original_filename)
        .bind(&dataset.file_path)
        .bind(dataset.size_bytes)
        .bind(&dataset.content_type)
        .bind(&dataset.status)
        .bind(dataset.num_rows)
        .bind(dataset.num_columns)
        .bind(&dataset.column_names)
        .bind(dataset.created_at)
        .bind(dataset.updated_at)
        .execute(&self.db_pool)
        .await?;

        Ok((dataset, preview))
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>> {
        let dataset = sqlx::query_as::<_, Dataset>("SELECT * FROM datasets WHERE id = ?")
            .bind(dataset_id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(dataset)
    }

    pub async fn dataset_exists(&self, dataset_id: &str) -> Result<bool> {
        Ok(self.get_dataset(dataset_id).await?.is_some())
    }

    /// Storage path of the dataset file, if the record exists.
    pub async fn file_path_of(&self, dataset_id: &str) -> Result<Option<String>> {
        Ok(self.get_dataset(dataset_id).await?.map(|d| d.file_path))
    }

    pub async fn list_datasets(&self, limit: i64) -> Result<Vec<Dataset>> {
        let datasets = sqlx::query_as::<_, Dataset>(
            "SELECT * FROM datasets ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(datasets)
    }

    /// Delete a dataset record and its file. Jobs referencing it keep their
    /// dangling dataset_id for historical display.
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<bool> {
        let Some(dataset) = self.get_dataset(dataset_id).await? else {
            return Ok(false);
        };

        if let Err(e) = self
            .storage
            .delete_file(std::path::Path::new(&dataset.file_path))
            .await
        {
            tracing::warn!("Failed to delete dataset file {}: {}", dataset.file_path, e);
        }

        sqlx::query("DELETE FROM datasets WHERE id = ?")
            .bind(dataset_id)
            .execute(&self.db_pool)
            .await?;

        Ok(true)
    }
}

fn generate_preview(filename: &str, content_type: Option<&str>, content: &[u8]) -> DatasetPreview {
    let lower = filename.to_lowercase();

    if lower.ends_with(".csv") || content_type.map(|ct| ct.contains("csv")).unwrap_or(false) {
        preview_csv(content)
    } else if lower.ends_with(".jsonl") {
        preview_jsonl(content)
    } else if lower.ends_with(".json") || content_type.map(|ct| ct.contains("json")).unwrap_or(false) {
        preview_json(content)
    } else {
        preview_text(content)
    }
}

fn preview_csv(content: &[u8]) -> DatasetPreview {
    let mut reader = csv::Reader::from_reader(content);

    let headers = match reader.headers() {
        Ok(headers) => headers.iter().map(|h| h.to_string()).collect::<Vec<_>>(),
        Err(e) => {
            return DatasetPreview {
                kind: "csv".to_string(),
                error: Some(format!("Failed to preview CSV: {e}")),
                ..Default::default()
            }
        }
    };

    let mut num_rows = 0i64;
    let mut sample = Vec::new();
    for record in reader.records().flatten() {
        if sample.len() < 3 {
            sample.push(serde_json::Value::Array(
                record
                    .iter()
                    .map(|field| serde_json::Value::String(field.to_string()))
                    .collect(),
            ));
        }
        num_rows += 1;
    }

    DatasetPreview {
        kind: "csv".to_string(),
        num_rows: Some(num_rows),
        num_columns: Some(headers.len() as i64),
        column_names: Some(headers),
        sample: Some(serde_json::Value::Array(sample)),
        ..Default::default()
    }
}

fn preview_jsonl(content: &[u8]) -> DatasetPreview {
    let text = String::from_utf8_lossy(content);
    let mut num_rows = 0i64;
    let mut sample = Vec::new();

    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                if sample.len() < 3 {
                    sample.push(value);
                }
                num_rows += 1;
            }
            Err(e) => {
                return DatasetPreview {
                    kind: "jsonl".to_string(),
                    error: Some(format!("Failed to preview JSONL: {e}")),
                    ..Default::default()
                }
            }
        }
    }

    DatasetPreview {
        kind: "jsonl".to_string(),
        num_rows: Some(num_rows),
        sample: Some(serde_json::Value::Array(sample)),
        ..Default::default()
    }
}

fn preview_json(content: &[u8]) -> DatasetPreview {
    match serde_json::from_slice::<serde_json::Value>(content) {
        Ok(serde_json::Value::Array(items)) => DatasetPreview {
            kind: "json_array".to_string(),
            num_rows: Some(items.len() as i64),
            sample: Some(serde_json::Value::Array(
                items.into_iter().take(3).collect(),
            )),
            ..Default::default()
        },
        Ok(serde_json::Value::Object(map)) => DatasetPreview {
            kind: "json_object".to_string(),
            column_names: Some(map.keys().take(10).cloned().collect()),
            ..Default::default()
        },
        Ok(_) => DatasetPreview {
            kind: "json".to_string(),
            ..Default::default()
        },
        Err(e) => DatasetPreview {
            kind: "json".to_string(),
            error: Some(format!("Failed to preview JSON: {e}")),
            ..Default::default()
        },
    }
}

fn preview_text(content: &[u8]) -> DatasetPreview {
    let text = String::from_utf8_lossy(content);
    let head: String = text.chars().take(500).collect();

    DatasetPreview {
        kind: "text".to_string(),
        num_rows: Some(text.lines().filter(|line| !line.trim().is_empty()).count() as i64),
        sample: Some(serde_json::Value::String(head)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_extensions_and_content_types() {
        assert!(DatasetService::validate_upload("train.jsonl", None).is_ok());
        assert!(DatasetService::validate_upload("train.csv", Some("text/csv")).is_ok());
        assert!(DatasetService::validate_upload("corpus", Some("text/plain")).is_ok());
        assert!(DatasetService::validate_upload("model.bin", Some("application/x-binary")).is_err());
    }

    #[test]
    fn csv_preview_reports_columns_and_rows() {
        let content = b"text,label\nhello world,greeting\ngoodbye,farewell\n";
        let preview = preview_csv(content);

        assert_eq!(preview.num_rows, Some(2));
        assert_eq!(preview.num_columns, Some(2));
        assert_eq!(
            preview.column_names,
            Some(vec!["text".to_string(), "label".to_string()])
        );
    }

    #[test]
    fn jsonl_preview_counts_lines() {
        let content = b"{\"text\": \"a\"}\n{\"text\": \"b\"}\n{\"text\": \"c\"}\n{\"text\": \"d\"}\n";
        let preview = preview_jsonl(content);

        assert_eq!(preview.num_rows, Some(4));
        let sample = preview.sample.unwrap();
        assert_eq!(sample.as_array().unwrap().len(), 3);
    }

    #[test]
    fn malformed_json_yields_error_preview() {
        let preview = preview_json(b"{not json");
        assert!(preview.error.is_some());
    }
}
