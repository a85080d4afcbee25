//! Query grid jobs via dirac-wms-job-status.

use crate::types::GridJob;
use ferry_runner::{CommandRunner, run_command};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Failed to execute dirac-wms-job-status: {0}")]
    ExecutionError(String),
}

/// Matches `JobID=123 Status=Running; MinorStatus=...; Site=...;`
static STATUS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"JobID=(?P<id>\d+)\s+Status=(?P<status>[^;]+);").expect("valid status regex")
});

/// Parse status output. Lines that do not describe a job are skipped.
pub fn parse_job_status(stdout: &str) -> Vec<GridJob> {
    STATUS_LINE
        .captures_iter(stdout)
        .map(|caps| GridJob {
            job_id: caps["id"].to_string(),
            status: caps["status"].trim().to_string(),
        })
        .collect()
}

/// Query the status of several jobs with one command.
pub async fn query_job_status(
    runner: &dyn CommandRunner,
    job_ids: &[String],
) -> Result<Vec<GridJob>, StatusError> {
    if job_ids.is_empty() {
        return Ok(Vec::new());
    }
    let stdout = run_command(runner, "dirac-wms-job-status", job_ids)
        .await
        .map_err(|e| StatusError::ExecutionError(e.to_string()))?;
    Ok(parse_job_status(&stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_status() {
        let output = "\
JobID=1001 Status=Running; MinorStatus=Application; Site=LCG.CERN.cern;
JobID=1002 Status=Done; MinorStatus=Execution Complete; Site=LCG.RAL.uk;
";
        let jobs = parse_job_status(output);
        assert_eq!(
            jobs,
            vec![
                GridJob {
                    job_id: "1001".to_string(),
                    status: "Running".to_string()
                },
                GridJob {
                    job_id: "1002".to_string(),
                    status: "Done".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_skips_noise() {
        let output = "Warning: proxy expires in 2h\nJobID=7 Status=Waiting; MinorStatus=Pilot Agent Submission;\n";
        let jobs = parse_job_status(output);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "7");
        assert!(parse_job_status("").is_empty());
    }
}
