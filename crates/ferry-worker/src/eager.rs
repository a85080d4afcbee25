//! Synchronous scheduler: the job runs inside `submit`.

use crate::process::{Outcome, run_job_process};
use async_trait::async_trait;
use ferry_core::{JobDescription, Scheduler, SchedulerError, State};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const LOADAVG_PATH: &str = "/proc/loadavg";

fn default_max_load() -> f64 {
    1.0
}

fn default_timeout_secs() -> u64 {
    3600
}

/// Settings for an eager destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EagerConfig {
    /// Reject submissions while the 1-minute load per CPU is above this
    #[serde(default = "default_max_load")]
    pub max_load: f64,

    /// Kill the job after this many seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EagerConfig {
    fn default() -> Self {
        Self {
            max_load: default_max_load(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Parse the 1-minute load average from `/proc/loadavg` contents.
pub fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// Load per CPU over the last minute, or `None` where the kernel does not expose it.
async fn load_per_cpu() -> Option<f64> {
    let content = tokio::fs::read_to_string(LOADAVG_PATH).await.ok()?;
    let load = parse_loadavg(&content)?;
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    Some(load / cpus as f64)
}

/// Runs each job to completion before `submit` returns.
pub struct EagerScheduler {
    config: EagerConfig,
}

impl EagerScheduler {
    pub fn new(config: EagerConfig) -> Self {
        Self { config }
    }

    fn admit(&self, load: Option<f64>) -> Result<(), SchedulerError> {
        match load {
            Some(load) if load > self.config.max_load => Err(SchedulerError::Submission(format!(
                "machine too busy: load {load:.2} per CPU exceeds {:.2}",
                self.config.max_load
            ))),
            Some(_) => Ok(()),
            None => {
                tracing::debug!("No load average available, admitting job");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Scheduler for EagerScheduler {
    async fn submit(&self, description: &JobDescription) -> Result<String, SchedulerError> {
        self.admit(load_per_cpu().await)?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let outcome = run_job_process(description, &CancellationToken::new(), Some(timeout)).await?;
        match outcome {
            Outcome::Exited(0) => {}
            Outcome::Exited(code) => {
                return Err(SchedulerError::Submission(format!(
                    "command exited with {code}"
                )));
            }
            Outcome::TimedOut | Outcome::Killed => {
                return Err(SchedulerError::Submission(format!(
                    "command timed out after {}s",
                    self.config.timeout_secs
                )));
            }
        }

        let job_id = Uuid::new_v4().to_string();
        tracing::info!("Ran job {} in {}", job_id, description.job_dir);
        Ok(job_id)
    }

    async fn state(&self, _job_id: &str) -> Result<State, SchedulerError> {
        Ok(State::Ok)
    }

    async fn cancel(&self, _job_id: &str) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        Ok(())
    }
}
