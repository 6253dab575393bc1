use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::time::{self, Duration};
use tracing::{error, info, warn};

use crate::config::RetentionConfig;
use crate::services::job_service::JobService;
use crate::storage::FileStorage;

#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub jobs_deleted: u64,
    pub files_deleted: u64,
    pub space_freed_bytes: u64,
    pub errors: Vec<String>,
}

/// Periodic artifact lifecycle sweep. The only component that deletes job
/// rows; everything else treats them as append-only history.
pub struct RetentionSweeper {
    job_service: JobService,
    storage: FileStorage,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(job_service: JobService, storage: FileStorage, config: RetentionConfig) -> Self {
        Self {
            job_service,
            storage,
            config,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut interval = time::interval(Duration::from_secs(self.config.sweep_interval_secs));

        info!(
            "Starting retention sweeper: every {}s, retaining jobs for {} days",
            self.config.sweep_interval_secs, self.config.job_retention_days
        );

        loop {
            interval.tick().await;

            match self.cleanup(self.config.job_retention_days).await {
                Ok(report) => {
                    if report.jobs_deleted > 0 || !report.errors.is_empty() {
                        info!(
                            "Retention sweep: {} jobs, {} files, {} bytes freed, {} errors",
                            report.jobs_deleted,
                            report.files_deleted,
                            report.space_freed_bytes,
                            report.errors.len()
                        );
                    }
                }
                Err(e) => error!("Retention sweep failed: {}", e),
            }

            if let Err(e) = self.report_stale_running().await {
                error!("Stale-job check failed: {}", e);
            }
        }
    }

    /// Delete terminal jobs older than the cutoff together with their model
    /// and export artifacts. Per-job failures are collected and never abort
    /// the rest of the sweep.
    pub async fn cleanup(&self, older_than_days: i64) -> Result<CleanupReport> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days);
        let expired = self.job_service.list_expired(cutoff).await?;

        let mut report = CleanupReport::default();

        for job in expired {
            let mut artifacts_removed = true;

            for dir in [self.storage.model_dir(&job.id), self.storage.export_dir(&job.id)] {
                match self.storage.remove_dir_reporting(&dir).await {
                    Ok((files, bytes)) => {
                        report.files_deleted += files;
                        report.space_freed_bytes += bytes;
                    }
                    Err(e) => {
                        artifacts_removed = false;
                        report
                            .errors
                            .push(format!("job {}: failed to delete {}: {e}", job.id, dir.display()));
                    }
                }
            }

            // Keep the row if artifacts survived so a later sweep retries.
            if !artifacts_removed {
                continue;
            }

            match self.job_service.delete_job(&job.id).await {
                Ok(()) => report.jobs_deleted += 1,
                Err(e) => report
                    .errors
                    .push(format!("job {}: failed to delete record: {e}", job.id)),
            }
        }

        Ok(report)
    }

    /// Flag running jobs that stopped reporting progress. Operator signal
    /// only; re-submission is a human decision.
    async fn report_stale_running(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.stale_running_hours);
        let stale = self.job_service.list_stale_running(cutoff).await?;

        for job in stale {
            warn!(
                "Job {} has been running without updates since {}; eligible for re-submission",
                job.id, job.updated_at
            );
        }

        Ok(())
    }
}
