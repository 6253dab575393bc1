use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Task queue is not accepting work")]
    QueueClosed,
}

#[derive(Error, Debug)]
pub enum TrainError {
    /// Precondition failures that retrying cannot fix.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Transient failures eligible for retry.
    #[error("Training failed: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, TrainError::Dataset(_))
    }
}
