//! Scheduler backed by a durable job queue.
//!
//! Submitting only records the job in the queue; a separate `ferry worker`
//! process drains it with [`run_queue_worker`]. Queued and running work
//! therefore survives restarts of the process that submitted it.

use crate::process::{Outcome, run_job_process};
use async_trait::async_trait;
use ferry_core::{JobDescription, KILLED_RETURNCODE, Scheduler, SchedulerError, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How long a worker blocks on an empty queue before checking for shutdown again.
const DEQUEUE_WAIT: Duration = Duration::from_secs(5);

/// How often a worker checks whether its running job was aborted.
const ABORT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] redis::RedisError),
    #[error("Invalid queue payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Unknown queue status {0:?}")]
    InvalidStatus(String),
    #[error("Queue is closed")]
    Closed,
}

impl From<QueueError> for SchedulerError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Closed => SchedulerError::Closed,
            other => SchedulerError::Query(other.to_string()),
        }
    }
}

fn default_queue() -> String {
    "ferry".to_string()
}

fn default_job_timeout_secs() -> u64 {
    3600
}

/// Settings for a queue destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Connection string of the queue storage, e.g. `redis://127.0.0.1/`
    pub redis_dsn: String,

    /// Queue name, used as the key prefix
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Workers kill a job after this many seconds
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

/// Final result a worker records for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub returncode: i32,
}

/// Where a job is in the queue's own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Deferred,
    Queued,
    InProgress,
    Complete { success: bool },
    NotFound,
}

impl QueueStatus {
    /// Map the queue status to a generic state. `None` for unknown jobs.
    pub fn to_state(self) -> Option<State> {
        match self {
            QueueStatus::Deferred | QueueStatus::Queued => Some(State::Queued),
            QueueStatus::InProgress => Some(State::Running),
            QueueStatus::Complete { success: true } => Some(State::Ok),
            QueueStatus::Complete { success: false } => Some(State::Error),
            QueueStatus::NotFound => None,
        }
    }
}

/// A job taken off the queue by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: String,
    pub description: JobDescription,
}

/// Durable FIFO of job descriptions.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job and return the id the queue assigned to it.
    async fn enqueue(&self, description: &JobDescription) -> Result<String, QueueError>;

    async fn status(&self, id: &str) -> Result<QueueStatus, QueueError>;

    /// Drop a queued job, or flag a running one for its worker to kill.
    async fn abort(&self, id: &str) -> Result<(), QueueError>;

    /// Whether `abort` was called for a job that was already running.
    async fn is_aborted(&self, id: &str) -> Result<bool, QueueError>;

    /// Take the next job and mark it in progress, waiting up to `wait`.
    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedJob>, QueueError>;

    async fn finish(&self, id: &str, result: JobResult) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// [`Scheduler`] that delegates execution to queue workers.
pub struct QueueScheduler {
    queue: Arc<dyn JobQueue>,
}

impl QueueScheduler {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Scheduler for QueueScheduler {
    async fn submit(&self, description: &JobDescription) -> Result<String, SchedulerError> {
        let job_id = self
            .queue
            .enqueue(description)
            .await
            .map_err(|e| SchedulerError::Submission(e.to_string()))?;
        tracing::info!("Enqueued job {} for {}", job_id, description.job_dir);
        Ok(job_id)
    }

    async fn state(&self, job_id: &str) -> Result<State, SchedulerError> {
        self.queue
            .status(job_id)
            .await?
            .to_state()
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.queue.abort(job_id).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        self.queue.close().await?;
        Ok(())
    }
}

/// Cancel `token` once the job is flagged as aborted.
async fn watch_abort(queue: Arc<dyn JobQueue>, job_id: String, token: CancellationToken) {
    let mut ticker = tokio::time::interval(ABORT_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match queue.is_aborted(&job_id).await {
            Ok(true) => {
                tracing::info!("Job {} was aborted", job_id);
                token.cancel();
                return;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Could not check abort flag of {}: {}", job_id, e),
        }
    }
}

async fn run_one(
    queue: &Arc<dyn JobQueue>,
    job: QueuedJob,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<(), QueueError> {
    tracing::info!("Worker picked up job {}", job.id);
    let token = shutdown.child_token();
    let watcher = tokio::spawn(watch_abort(queue.clone(), job.id.clone(), token.clone()));

    let outcome = run_job_process(&job.description, &token, Some(timeout)).await;
    token.cancel();
    if let Err(e) = watcher.await {
        tracing::error!("Abort watcher for {} panicked: {}", job.id, e);
    }

    let result = match outcome {
        Ok(outcome) => JobResult {
            success: outcome == Outcome::Exited(0),
            returncode: outcome.returncode(),
        },
        Err(e) => {
            tracing::error!("Job {} could not be run: {}", job.id, e);
            JobResult {
                success: false,
                returncode: KILLED_RETURNCODE,
            }
        }
    };
    tracing::info!("Job {} finished with code {}", job.id, result.returncode);
    queue.finish(&job.id, result).await
}

/// Drain the queue until `shutdown` fires.
///
/// Jobs run one at a time. A job still running at shutdown is killed and
/// recorded as failed.
pub async fn run_queue_worker(
    queue: Arc<dyn JobQueue>,
    config: QueueConfig,
    shutdown: CancellationToken,
) -> Result<(), QueueError> {
    let timeout = Duration::from_secs(config.job_timeout_secs);
    tracing::info!("Queue worker started on {:?}", config.queue);

    // A dequeue is never interrupted: a job popped by a dropped request would be lost.
    while !shutdown.is_cancelled() {
        if let Some(job) = queue.dequeue(DEQUEUE_WAIT).await? {
            run_one(&queue, job, timeout, &shutdown).await?;
        }
    }

    tracing::info!("Queue worker stopped");
    Ok(())
}
