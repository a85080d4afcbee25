//! Query live SLURM jobs via squeue.

use crate::types::SlurmJob;
use ferry_runner::{CommandRunner, split_delimited};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqueueError {
    #[error("Failed to execute squeue: {0}")]
    ExecutionError(String),
    #[error("Failed to parse squeue output: {0}")]
    ParseError(String),
}

/// squeue output format:
/// %i - Job ID
/// %T - State (extended)
const SQUEUE_FORMAT: &str = "%i|%T";

/// Parse a single line of squeue output.
fn parse_squeue_line(line: &str) -> Result<SlurmJob, SqueueError> {
    let fields = split_delimited(line, 2).map_err(SqueueError::ParseError)?;
    Ok(SlurmJob {
        job_id: fields[0].trim().to_string(),
        state: fields[1].trim().to_string(),
    })
}

/// Parse full squeue output, skipping blank lines.
pub fn parse_squeue_output(stdout: &str) -> Result<Vec<SlurmJob>, SqueueError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_squeue_line)
        .collect()
}

/// squeue exits non-zero once a finished job has been purged from the live queue.
fn is_purged_job_error(stderr: &str) -> bool {
    stderr.contains("Invalid job id specified")
}

/// Query the live queue for the given job ids.
///
/// Jobs that already left the queue are simply missing from the result.
pub async fn query_squeue(
    runner: &dyn CommandRunner,
    job_ids: &[String],
) -> Result<Vec<SlurmJob>, SqueueError> {
    if job_ids.is_empty() {
        return Ok(Vec::new());
    }
    let args = vec![
        "--noheader".to_string(),
        format!("--format={SQUEUE_FORMAT}"),
        "--jobs".to_string(),
        job_ids.join(","),
    ];

    let output = runner
        .run("squeue", &args, None, None)
        .await
        .map_err(|e| SqueueError::ExecutionError(e.to_string()))?;

    if !output.success() {
        if is_purged_job_error(&output.stderr) {
            return Ok(Vec::new());
        }
        return Err(SqueueError::ExecutionError(output.stderr.trim().to_string()));
    }

    parse_squeue_output(&output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_squeue_line() {
        let job = parse_squeue_line("12345|RUNNING").unwrap();
        assert_eq!(job.job_id, "12345");
        assert_eq!(job.state, "RUNNING");
        assert!(parse_squeue_line("12345").is_err());
    }

    #[test]
    fn test_parse_squeue_output() {
        let jobs = parse_squeue_output("1|PENDING\n\n2|RUNNING\n").unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].job_id, "2");
        assert!(parse_squeue_output("").unwrap().is_empty());
    }

    #[test]
    fn test_purged_job_error() {
        assert!(is_purged_job_error(
            "slurm_load_jobs error: Invalid job id specified"
        ));
        assert!(!is_purged_job_error("Unable to contact slurm controller"));
    }
}
