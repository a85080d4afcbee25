//! Errors raised by scheduler and filesystem backends.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The job was rejected before it got an external id.
    #[error("Submission failed: {0}")]
    Submission(String),
    /// The scheduler has no bookkeeping for this id (never seen, or already forgotten).
    #[error("Job not found: {0}")]
    NotFound(String),
    /// A status query against the backend failed.
    #[error("Failed to query job state: {0}")]
    Query(String),
    #[error("Scheduler is closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum FileSystemError {
    /// The remote object does not exist; there is nothing to transfer.
    #[error("Remote path not found: {0}")]
    NotFound(String),
    /// The transport itself failed.
    #[error("Transfer failed: {0}")]
    Transfer(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileSystemError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
