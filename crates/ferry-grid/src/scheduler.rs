//! Grid scheduler backend.

use crate::jdl::{GridConfig, JDL_FILE, JOB_SCRIPT, render_jdl, render_job_script};
use crate::status::query_job_status;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use ferry_core::{JobDescription, Scheduler, SchedulerError, State};
use ferry_runner::{CommandRunner, LocalRunner, SshRunner, run_command};
use std::collections::HashMap;
use std::sync::Arc;

/// Submits jobs to a grid workload management system.
pub struct GridScheduler {
    config: GridConfig,
    runner: Arc<dyn CommandRunner>,
}

/// The job id is the last whitespace-delimited token of the submit output.
pub fn parse_submitted_job_id(stdout: &str) -> Option<String> {
    stdout.split_whitespace().last().map(str::to_string)
}

impl GridScheduler {
    pub fn new(config: GridConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = match &config.ssh_config {
            Some(ssh_config) => Arc::new(SshRunner::new(ssh_config.clone())),
            None => Arc::new(LocalRunner::new()),
        };
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: GridConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Write `content` to `name` inside `dir` on the runner's host.
    async fn write_file(&self, dir: &Utf8Path, name: &str, content: &str) -> Result<(), SchedulerError> {
        let args = vec!["-c".to_string(), format!("cat > {name}")];
        self.runner
            .run("sh", &args, Some(content), Some(dir))
            .await
            .and_then(|output| output.into_result("sh"))
            .map_err(|e| SchedulerError::Submission(format!("writing {name}: {e}")))?;
        Ok(())
    }

    async fn submit_from(
        &self,
        scratch: &Utf8Path,
        description: &JobDescription,
    ) -> Result<String, SchedulerError> {
        self.write_file(scratch, JOB_SCRIPT, &render_job_script(&self.config, description))
            .await?;
        self.write_file(scratch, JDL_FILE, &render_jdl(&self.config, description))
            .await?;

        let output = self
            .runner
            .run(
                "dirac-wms-job-submit",
                &[JDL_FILE.to_string()],
                None,
                Some(scratch),
            )
            .await
            .map_err(|e| SchedulerError::Submission(e.to_string()))?;
        if !output.success() {
            return Err(SchedulerError::Submission(format!(
                "dirac-wms-job-submit exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        parse_submitted_job_id(&output.stdout).ok_or_else(|| {
            SchedulerError::Submission("dirac-wms-job-submit printed no job id".to_string())
        })
    }
}

#[async_trait]
impl Scheduler for GridScheduler {
    async fn submit(&self, description: &JobDescription) -> Result<String, SchedulerError> {
        let stdout = run_command(self.runner.as_ref(), "mktemp", &["-d".to_string()])
            .await
            .map_err(|e| SchedulerError::Submission(e.to_string()))?;
        let scratch = Utf8PathBuf::from(stdout.trim());

        let result = self.submit_from(&scratch, description).await;

        let cleanup = self
            .runner
            .run("rm", &["-rf".to_string(), scratch.to_string()], None, None)
            .await;
        if let Err(e) = cleanup {
            tracing::warn!("Could not remove scratch dir {}: {}", scratch, e);
        }

        let job_id = result?;
        tracing::info!("Submitted {} to the grid as {}", description.job_dir, job_id);
        Ok(job_id)
    }

    async fn state(&self, job_id: &str) -> Result<State, SchedulerError> {
        let states = self.states(&[job_id.to_string()]).await?;
        Ok(states[0])
    }

    async fn states(&self, job_ids: &[String]) -> Result<Vec<State>, SchedulerError> {
        let jobs = query_job_status(self.runner.as_ref(), job_ids)
            .await
            .map_err(|e| SchedulerError::Query(e.to_string()))?;
        let found: HashMap<String, State> = jobs
            .into_iter()
            .map(|job| {
                let state = job.generic_state();
                (job.job_id, state)
            })
            .collect();

        job_ids
            .iter()
            .map(|id| {
                found.get(id).copied().ok_or_else(|| {
                    SchedulerError::Query(format!("job {id} missing from status output"))
                })
            })
            .collect()
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        let result = self
            .runner
            .run("dirac-wms-job-kill", &[job_id.to_string()], None, None)
            .await;
        if let Err(e) = result {
            tracing::warn!("dirac-wms-job-kill {} could not be run: {}", job_id, e);
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
