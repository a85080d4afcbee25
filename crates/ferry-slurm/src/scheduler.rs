//! Slurm scheduler backend.

use crate::sacct::query_sacct;
use crate::script::{SlurmConfig, render_script};
use crate::squeue::query_squeue;
use crate::types::SlurmJob;
use async_trait::async_trait;
use ferry_core::{JobDescription, Scheduler, SchedulerError, State};
use ferry_runner::{CommandRunner, LocalRunner, SshRunner};
use std::collections::HashMap;
use std::sync::Arc;

/// Submits jobs to Slurm through sbatch.
pub struct SlurmScheduler {
    config: SlurmConfig,
    runner: Arc<dyn CommandRunner>,
}

impl SlurmScheduler {
    /// Scheduler that runs Slurm commands locally, or over SSH when configured.
    pub fn new(config: SlurmConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = match &config.ssh_config {
            Some(ssh_config) => Arc::new(SshRunner::new(ssh_config.clone())),
            None => Arc::new(LocalRunner::new()),
        };
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: SlurmConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Look jobs up in the live queue first, then in accounting for the rest.
    async fn lookup(&self, job_ids: &[String]) -> Result<HashMap<String, State>, SchedulerError> {
        let live = query_squeue(self.runner.as_ref(), job_ids)
            .await
            .map_err(|e| SchedulerError::Query(e.to_string()))?;
        let mut states = to_state_map(live);

        let missing: Vec<String> = job_ids
            .iter()
            .filter(|id| !states.contains_key(id.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            tracing::debug!("Jobs {:?} left the live queue, asking sacct", missing);
            let history = query_sacct(self.runner.as_ref(), &missing)
                .await
                .map_err(|e| SchedulerError::Query(e.to_string()))?;
            states.extend(to_state_map(history));
        }
        Ok(states)
    }
}

fn to_state_map(jobs: Vec<SlurmJob>) -> HashMap<String, State> {
    jobs.into_iter()
        .map(|job| {
            let state = job.generic_state();
            (job.job_id, state)
        })
        .collect()
}

/// The job id is the last whitespace-delimited token sbatch prints.
pub fn parse_submitted_job_id(stdout: &str) -> Option<String> {
    stdout.split_whitespace().last().map(str::to_string)
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    async fn submit(&self, description: &JobDescription) -> Result<String, SchedulerError> {
        let script = render_script(&self.config, description);
        let output = self
            .runner
            .run("sbatch", &[], Some(&script), Some(&description.job_dir))
            .await
            .map_err(|e| SchedulerError::Submission(e.to_string()))?;

        if !output.success() {
            return Err(SchedulerError::Submission(format!(
                "sbatch exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let job_id = parse_submitted_job_id(&output.stdout).ok_or_else(|| {
            SchedulerError::Submission("sbatch printed no job id".to_string())
        })?;
        tracing::info!("Submitted {} to Slurm as {}", description.job_dir, job_id);
        Ok(job_id)
    }

    async fn state(&self, job_id: &str) -> Result<State, SchedulerError> {
        let states = self.states(&[job_id.to_string()]).await?;
        Ok(states[0])
    }

    async fn states(&self, job_ids: &[String]) -> Result<Vec<State>, SchedulerError> {
        let found = self.lookup(job_ids).await?;
        job_ids
            .iter()
            .map(|id| {
                found.get(id).copied().ok_or_else(|| {
                    SchedulerError::Query(format!("job {id} is unknown to squeue and sacct"))
                })
            })
            .collect()
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        // scancel's outcome is not checked: the job may already be gone.
        let result = self
            .runner
            .run("scancel", &[job_id.to_string()], None, None)
            .await;
        if let Err(e) = result {
            tracing::warn!("scancel {} could not be run: {}", job_id, e);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        self.runner
            .close()
            .await
            .map_err(|e| SchedulerError::Query(e.to_string()))
    }
}
