//! Errors raised while dispatching jobs.

use crate::config::ConfigError;
use crate::picker::PickError;
use ferry_core::{FileSystemError, SchedulerError};
use ferry_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Unknown application: {0}")]
    UnknownApplication(String),
    #[error("Unknown destination: {0}")]
    UnknownDestination(String),
    #[error("Job {job_id} must live in {expected}, not {job_dir}")]
    JobDir {
        job_id: u64,
        job_dir: String,
        expected: String,
    },
    #[error("Failed to render command for {application}: {message}")]
    Template {
        application: String,
        message: String,
    },
    #[error(transparent)]
    Pick(#[from] PickError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Staging queue is shut down")]
    StagingClosed,
}
