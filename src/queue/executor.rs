use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use super::{CancellationRegistry, RetryPolicy, TrainTask};
use crate::services::dataset_service::DatasetService;
use crate::services::job_service::JobService;
use crate::services::trainer::{ProgressUpdate, TrainRequest, Trainer};
use crate::storage::FileStorage;

enum AttemptError {
    /// Recorded as failed; retrying cannot help (missing dataset, invalid
    /// dataset, cancellation).
    Permanent,
    /// Recorded as failed; eligible for a retry that restarts the attempt
    /// from scratch.
    Transient(String),
}

/// Worker pool consuming dispatched tasks. Each job runs through the state
/// machine: `running` on pickup, progress writes while the trainer works,
/// then `completed` or `failed`; transient failures are retried with
/// backoff up to the policy bound.
pub struct JobExecutor {
    rx: mpsc::UnboundedReceiver<TrainTask>,
    permits: Arc<Semaphore>,
    ctx: Arc<ExecutorContext>,
}

struct ExecutorContext {
    job_service: JobService,
    dataset_service: DatasetService,
    storage: FileStorage,
    trainer: Arc<dyn Trainer>,
    retry: RetryPolicy,
    cancellations: CancellationRegistry,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl JobExecutor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        rx: mpsc::UnboundedReceiver<TrainTask>,
        job_service: JobService,
        dataset_service: DatasetService,
        storage: FileStorage,
        trainer: Arc<dyn Trainer>,
        retry: RetryPolicy,
        cancellations: CancellationRegistry,
        in_flight: Arc<Mutex<HashSet<String>>>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            rx,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            ctx: Arc::new(ExecutorContext {
                job_service,
                dataset_service,
                storage,
                trainer,
                retry,
                cancellations,
                in_flight,
            }),
        }
    }

    /// Dispatch loop: one spawned task per job, bounded by the concurrency
    /// semaphore. Runs until the dispatcher side of the queue is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                ctx.run_job(task).await;
                drop(permit);
            });
        }
    }
}

impl ExecutorContext {
    async fn run_job(&self, task: TrainTask) {
        let job_id = task.job_id.clone();
        let mut attempt = 1u32;

        loop {
            match self.execute_attempt(&task, attempt).await {
                Ok(()) => break,
                Err(AttemptError::Permanent) => break,
                Err(AttemptError::Transient(message)) => {
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            "Job {} failed after {} attempts: {}",
                            job_id, attempt, message
                        );
                        break;
                    }

                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Job {} attempt {} failed ({}); retrying in {:?}",
                        job_id, attempt, message, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }

        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&job_id);
        self.cancellations.clear(&job_id);
    }

    /// One full execution of the protocol. Every step persists its state
    /// before the next proceeds; terminal writes are compare-and-set so a
    /// superseded attempt can never clobber them.
    async fn execute_attempt(&self, task: &TrainTask, attempt: u32) -> Result<(), AttemptError> {
        let job_id = &task.job_id;

        if self.cancellations.is_cancelled(job_id) {
            let _ = self.job_service.fail(job_id, "Fine-tuning cancelled").await;
            return Err(AttemptError::Permanent);
        }

        let entered = self
            .job_service
            .set_running(job_id)
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;
        if !entered {
            // Row is gone or already completed; nothing left to execute.
            return Ok(());
        }

        info!("Job {} entering attempt {}", job_id, attempt);

        let dataset_path = self
            .dataset_service
            .file_path_of(&task.dataset_id)
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let Some(dataset_path) = dataset_path else {
            let message = format!("Dataset {} not found", task.dataset_id);
            let _ = self.job_service.fail(job_id, &message).await;
            return Err(AttemptError::Permanent);
        };

        let request = TrainRequest {
            job_id: job_id.clone(),
            model_name: task.model_name.clone(),
            dataset_path: dataset_path.into(),
            output_dir: self.storage.model_dir(job_id),
            hyperparameters: task.hyperparameters.clone(),
        };
        let output_dir = request.output_dir.clone();

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_progress(
            self.job_service.clone(),
            self.cancellations.clone(),
            progress_rx,
        ));

        let result = self.trainer.train(request.clone(), progress_tx).await;
        let _ = forwarder.await;

        if self.cancellations.is_cancelled(job_id) {
            let _ = self.job_service.fail(job_id, "Fine-tuning cancelled").await;
            return Err(AttemptError::Permanent);
        }

        match result {
            Ok(metrics) => {
                let mut meta = metrics.into_meta(&request);
                meta["model_path"] = json!(output_dir.to_string_lossy());

                match self.job_service.complete(job_id, meta).await {
                    Ok(true) => {
                        info!("Job {} completed", job_id);
                        Ok(())
                    }
                    Ok(false) => {
                        // Terminal state was set elsewhere (e.g. cancelled)
                        warn!("Job {} finished training but was already terminal", job_id);
                        Ok(())
                    }
                    Err(e) => Err(AttemptError::Transient(e.to_string())),
                }
            }
            Err(e) => {
                let message = format!("Fine-tuning failed: {e}");
                error!("Job {}: {}", job_id, message);
                if let Err(store_err) = self.job_service.fail(job_id, &message).await {
                    error!("Job {}: failed to record failure: {}", job_id, store_err);
                }

                if e.is_permanent() {
                    Err(AttemptError::Permanent)
                } else {
                    Err(AttemptError::Transient(message))
                }
            }
        }
    }
}

/// Bridge the trainer's progress stream into record-store writes. Updates
/// are last-write-wins; a cancelled job stops forwarding and is marked
/// failed right away.
async fn forward_progress(
    job_service: JobService,
    cancellations: CancellationRegistry,
    mut rx: mpsc::UnboundedReceiver<ProgressUpdate>,
) {
    while let Some(update) = rx.recv().await {
        if cancellations.is_cancelled(&update.job_id) {
            let _ = job_service
                .fail(&update.job_id, "Fine-tuning cancelled")
                .await;
            break;
        }

        if let Err(e) = job_service
            .update_progress(&update.job_id, update.progress, &update.message)
            .await
        {
            warn!("Job {}: progress update dropped: {}", update.job_id, e);
        }
    }
}
