mod dispatcher;
mod executor;

pub use dispatcher::{Enqueued, RetryPolicy, TaskDispatcher};
pub use executor::JobExecutor;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::TrainingConfig;
use crate::models::Hyperparameters;
use crate::services::dataset_service::DatasetService;
use crate::services::job_service::JobService;
use crate::services::trainer::Trainer;
use crate::storage::FileStorage;

/// One unit of queued work. The task id is the job id, tying each job to
/// exactly one queue task.
#[derive(Debug, Clone)]
pub struct TrainTask {
    pub job_id: String,
    pub dataset_id: String,
    pub model_name: String,
    pub hyperparameters: Hyperparameters,
}

/// Best-effort cancellation flags, checked by the executor at attempt start
/// and at every progress checkpoint.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, job_id: &str) {
        self.inner
            .lock()
            .expect("cancellation lock poisoned")
            .insert(job_id.to_string());
    }

    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.inner
            .lock()
            .expect("cancellation lock poisoned")
            .contains(job_id)
    }

    pub fn clear(&self, job_id: &str) {
        self.inner
            .lock()
            .expect("cancellation lock poisoned")
            .remove(job_id);
    }
}

/// Wire up the dispatcher/executor pair over a shared channel and in-flight
/// set. The executor must be spawned by the caller.
pub fn build(
    job_service: JobService,
    dataset_service: DatasetService,
    storage: FileStorage,
    trainer: Arc<dyn Trainer>,
    config: &TrainingConfig,
) -> (TaskDispatcher, JobExecutor, CancellationRegistry) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let in_flight = Arc::new(Mutex::new(HashSet::new()));
    let cancellations = CancellationRegistry::new();

    let dispatcher = TaskDispatcher::new(tx, in_flight.clone());
    let executor = JobExecutor::new(
        rx,
        job_service,
        dataset_service,
        storage,
        trainer,
        RetryPolicy::from_config(config),
        cancellations.clone(),
        in_flight,
        config.max_concurrent_jobs,
    );

    (dispatcher, executor, cancellations)
}
