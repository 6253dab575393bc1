use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::types::Json;

use crate::models::{Job, JobStats, JobStatus};

/// Record store for job rows. Every write is a single-row autocommit
/// statement; status transitions are compare-and-set so a terminal row is
/// never overwritten by a late update from a superseded attempt.
#[derive(Clone)]
pub struct JobService {
    db_pool: SqlitePool,
}

impl JobService {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create_job(
        &self,
        job_id: &str,
        dataset_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, dataset_id, status, progress, message, created_at, updated_at)
            VALUES (?, ?, ?, 0.0, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(dataset_id)
        .bind(JobStatus::Pending)
        .bind("Job submitted, waiting to start...")
        .bind(created_at)
        .bind(created_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(job)
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(jobs)
    }

    pub async fn stats(&self) -> Result<JobStats> {
        let stats = sqlx::query_as::<_, JobStats>(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'running') as running,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed
            FROM jobs
            "#,
        )
        .fetch_one(&self.db_pool)
        .await?;

        Ok(stats)
    }

    /// Transition a job into `running`, resetting progress. Retried attempts
    /// re-enter through here, so `failed` is allowed as a source state;
    /// `completed` never is.
    pub async fn set_running(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', progress = 0.0, message = ?, updated_at = ?
            WHERE id = ? AND status != 'completed'
            "#,
        )
        .bind("Initializing fine-tuning...")
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Progress writes apply only while the job is still `running` and never
    /// move progress backwards within an attempt.
    pub async fn update_progress(&self, job_id: &str, progress: f64, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = ?, message = ?, updated_at = ?
            WHERE id = ? AND status = 'running' AND progress <= ?
            "#,
        )
        .bind(progress)
        .bind(message)
        .bind(Utc::now())
        .bind(job_id)
        .bind(progress)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal success transition; only valid from `running`.
    pub async fn complete(&self, job_id: &str, meta: serde_json::Value) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', progress = 100.0, message = ?, meta = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind("Fine-tuning completed successfully!")
        .bind(Json(meta))
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal failure transition from `pending` (dispatch failures) or
    /// `running` (execution failures). Already-terminal rows are left alone.
    pub async fn fail(&self, job_id: &str, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', progress = 0.0, message = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(message)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal jobs created before the cutoff, oldest first. Only the
    /// retention sweep consumes this.
    pub async fn list_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE status IN ('completed', 'failed') AND created_at < ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(jobs)
    }

    /// Running jobs with no update since the cutoff. Surfaced to operators
    /// by the retention sweep; nothing resurrects them automatically.
    pub async fn list_stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status = 'running' AND updated_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(jobs)
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.db_pool)
            .await?;

        Ok(())
    }
}
