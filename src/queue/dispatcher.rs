use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::TrainTask;
use crate::config::TrainingConfig;
use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// A task with this job id is already queued or executing; the queue
    /// serializes work per id, so the duplicate is dropped.
    Duplicate,
}

/// Retry policy applied by the executor's attempt loop: full re-executions
/// with exponential backoff plus jitter, capped. Retries restart training
/// from scratch; nothing is resumed mid-run.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            backoff_base: Duration::from_secs(config.retry_backoff_base_secs),
            backoff_cap: Duration::from_secs(config.retry_backoff_cap_secs),
        }
    }

    /// Delay before the attempt following `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        let base = self.backoff_base.saturating_mul(1u32 << exp);
        let capped = base.min(self.backoff_cap);

        // Up to 20% jitter to spread retry bursts
        let jitter = rand::thread_rng().gen_range(0.0..0.2);
        capped.mul_f64(1.0 + jitter).min(self.backoff_cap)
    }
}

/// Submits work to the executor over an in-process queue. The task id
/// equals the job id; an in-flight set guarantees at most one queued or
/// executing task per job.
#[derive(Clone)]
pub struct TaskDispatcher {
    tx: mpsc::UnboundedSender<TrainTask>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl TaskDispatcher {
    pub(super) fn new(
        tx: mpsc::UnboundedSender<TrainTask>,
        in_flight: Arc<Mutex<HashSet<String>>>,
    ) -> Self {
        Self { tx, in_flight }
    }

    pub fn submit(&self, task: TrainTask) -> Result<Enqueued, DispatchError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");

        if !in_flight.insert(task.job_id.clone()) {
            return Ok(Enqueued::Duplicate);
        }

        let job_id = task.job_id.clone();
        if self.tx.send(task).is_err() {
            in_flight.remove(&job_id);
            return Err(DispatchError::QueueClosed);
        }

        Ok(Enqueued::Accepted)
    }

    /// Whether a task keyed by this job id is queued or executing.
    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .contains(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Hyperparameters;

    fn task(job_id: &str) -> TrainTask {
        TrainTask {
            job_id: job_id.to_string(),
            dataset_id: "ds".to_string(),
            model_name: "gpt2".to_string(),
            hyperparameters: Hyperparameters {
                learning_rate: 2e-5,
                num_epochs: 1,
                batch_size: 4,
                max_length: 512,
            },
        }
    }

    #[tokio::test]
    async fn deduplicates_by_job_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = TaskDispatcher::new(tx, Arc::new(Mutex::new(HashSet::new())));

        assert!(matches!(dispatcher.submit(task("job-1")), Ok(Enqueued::Accepted)));
        assert!(matches!(dispatcher.submit(task("job-1")), Ok(Enqueued::Duplicate)));
        assert!(dispatcher.is_in_flight("job-1"));

        // Only one envelope made it onto the queue
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_surfaces_a_dispatch_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let dispatcher = TaskDispatcher::new(tx, Arc::new(Mutex::new(HashSet::new())));

        assert!(dispatcher.submit(task("job-1")).is_err());
        // A failed dispatch leaves nothing in flight
        assert!(!dispatcher.is_in_flight("job-1"));
    }

    #[test]
    fn backoff_grows_and_respects_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(600),
        };

        let first = policy.delay_after(1);
        assert!(first >= Duration::from_secs(5));
        assert!(first <= Duration::from_secs(6));

        let second = policy.delay_after(2);
        assert!(second >= Duration::from_secs(10));
        assert!(second <= Duration::from_secs(12));

        let huge = policy.delay_after(12);
        assert!(huge <= Duration::from_secs(600));
    }
}
