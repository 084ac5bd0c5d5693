use queue_core::QueueError;
use thiserror::Error;

/// Enumeration of errors that can take a worker process down. Job command
/// failures are not among them; those are recorded as state transitions.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a store operation failed while running jobs: {0}")]
    Store(#[from] QueueError),
    #[error("invalid worker settings: {0}")]
    Settings(#[from] envconfig::Error),
}
