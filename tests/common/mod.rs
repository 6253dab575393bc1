#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use loraforge::config::TrainingConfig;
use loraforge::error::TrainError;
use loraforge::models::{Hyperparameters, Job};
use loraforge::queue::{self, CancellationRegistry, TaskDispatcher, TrainTask};
use loraforge::services::dataset_service::DatasetService;
use loraforge::services::job_service::JobService;
use loraforge::services::trainer::{
    LocalTrainer, ProgressUpdate, TrainMetrics, TrainRequest, Trainer,
};
use loraforge::storage::{create_db_pool, FileStorage};

pub struct TestEnv {
    pub pool: SqlitePool,
    pub storage: FileStorage,
    pub job_service: JobService,
    pub dataset_service: DatasetService,
    // Held so the scratch directory outlives the test
    pub tmp: TempDir,
}

pub async fn test_env() -> TestEnv {
    let tmp = tempfile::tempdir().expect("create tempdir");
    let pool = create_db_pool(&tmp.path().join("test.db"), 5)
        .await
        .expect("create db pool");
    let storage = FileStorage::new(tmp.path().join("data"));

    TestEnv {
        job_service: JobService::new(pool.clone()),
        dataset_service: DatasetService::new(pool.clone(), storage.clone()),
        pool,
        storage,
        tmp,
    }
}

/// Retry immediately in tests instead of waiting out real backoff.
pub fn fast_training_config() -> TrainingConfig {
    TrainingConfig {
        max_concurrent_jobs: 2,
        max_retries: 3,
        retry_backoff_base_secs: 0,
        retry_backoff_cap_secs: 0,
        model_cache_capacity: 2,
    }
}

pub fn spawn_queue(
    env: &TestEnv,
    trainer: Arc<dyn Trainer>,
) -> (TaskDispatcher, CancellationRegistry) {
    let (dispatcher, executor, cancellations) = queue::build(
        env.job_service.clone(),
        env.dataset_service.clone(),
        env.storage.clone(),
        trainer,
        &fast_training_config(),
    );
    tokio::spawn(executor.run());

    (dispatcher, cancellations)
}

pub async fn seed_dataset(env: &TestEnv, filename: &str, content: &[u8]) -> String {
    let (dataset, _preview) = env
        .dataset_service
        .save_upload(filename, None, content)
        .await
        .expect("seed dataset");
    dataset.id
}

pub fn train_task(job_id: &str, dataset_id: &str) -> TrainTask {
    TrainTask {
        job_id: job_id.to_string(),
        dataset_id: dataset_id.to_string(),
        model_name: "gpt2".to_string(),
        hyperparameters: Hyperparameters {
            learning_rate: 2e-5,
            num_epochs: 2,
            batch_size: 4,
            max_length: 512,
        },
    }
}

pub async fn wait_for_terminal(job_service: &JobService, job_id: &str) -> Job {
    for _ in 0..1000 {
        let job = job_service
            .get_job(job_id)
            .await
            .expect("poll job")
            .expect("job row exists");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

pub async fn wait_for_running(job_service: &JobService, job_id: &str) -> Job {
    for _ in 0..1000 {
        let job = job_service
            .get_job(job_id)
            .await
            .expect("poll job")
            .expect("job row exists");
        if job.status == loraforge::models::JobStatus::Running {
            return job;
        }
        if job.status.is_terminal() {
            panic!("job {job_id} went terminal before running was observed");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never reached running");
}

/// Fails the first `fail_first` invocations with a transient error, then
/// delegates to a real (fast) local trainer. Counts every invocation.
pub struct FlakyTrainer {
    fail_first: u32,
    pub attempts: Arc<AtomicU32>,
    inner: LocalTrainer,
}

impl FlakyTrainer {
    pub fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            attempts: Arc::new(AtomicU32::new(0)),
            inner: LocalTrainer::with_step_delay(Duration::ZERO),
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trainer for FlakyTrainer {
    async fn train(
        &self,
        request: TrainRequest,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<TrainMetrics, TrainError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            return Err(TrainError::Execution(format!(
                "simulated transient failure #{attempt}"
            )));
        }
        self.inner.train(request, progress).await
    }
}
