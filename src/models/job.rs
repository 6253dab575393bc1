use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// A fine-tuning job row. One row per job id; mutated only by the executor
/// owning the matching queue task, deleted only by the retention sweep.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Job {
    pub id: String,
    pub dataset_id: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub meta: Option<Json<serde_json::Value>>,
}

impl Job {
    pub fn model_path(&self) -> Option<String> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.get("model_path"))
            .and_then(|path| path.as_str())
            .map(|path| path.to_string())
    }
}

fn default_model_name() -> String {
    "gpt2".to_string()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StartFinetuningRequest {
    pub dataset_id: String,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[validate(range(min = 1e-8, max = 1e-3))]
    pub learning_rate: Option<f64>,

    #[validate(range(min = 1, max = 20))]
    pub num_epochs: Option<u32>,

    #[validate(range(min = 1, max = 32))]
    pub batch_size: Option<u32>,

    #[validate(range(min = 128, max = 2048))]
    pub max_length: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StartFinetuningResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub dataset_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TrainingStatusResponse {
    pub job_id: String,
    pub dataset_id: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub meta: Option<serde_json::Value>,
}

impl From<Job> for TrainingStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            dataset_id: job.dataset_id,
            status: job.status,
            progress: job.progress,
            message: job.message,
            created_at: job.created_at,
            updated_at: job.updated_at,
            meta: job.meta.map(|meta| meta.0),
        }
    }
}

#[derive(Debug, Serialize, FromRow)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Fully resolved training hyperparameters, after per-model defaults have
/// been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub num_epochs: u32,
    pub batch_size: u32,
    pub max_length: u32,
}
