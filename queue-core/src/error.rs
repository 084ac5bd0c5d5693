use thiserror::Error;

use crate::types::JobState;

/// Enumeration of errors for operations against the job store.
/// Database errors originate from sqlx and are wrapped to keep callers on one type.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job '{0}' already exists")]
    AlreadyExists(String),
    #[error("job '{0}' not found")]
    NotFound(String),
    #[error("job '{id}' is {from}, cannot transition to {to}")]
    IllegalTransition {
        id: String,
        from: JobState,
        to: JobState,
    },
    #[error("{0} is not a valid job state")]
    ParseJobState(String),
    #[error("'{0}' is not a valid stored timestamp")]
    InvalidTimestamp(String),
    #[error("stored config value for '{key}' is unusable: '{value}'")]
    InvalidConfig { key: String, value: String },
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
}
