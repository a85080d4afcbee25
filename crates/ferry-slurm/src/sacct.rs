//! Query SLURM job history via sacct.

use crate::types::SlurmJob;
use ferry_runner::{CommandRunner, run_command, split_delimited};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SacctError {
    #[error("Failed to execute sacct: {0}")]
    ExecutionError(String),
    #[error("Failed to parse sacct output: {0}")]
    ParseError(String),
}

/// sacct output format (--parsable2 uses | delimiter)
const SACCT_FORMAT: &str = "JobIDRaw,State";

/// Parse a single line of sacct output.
fn parse_sacct_line(line: &str) -> Result<SlurmJob, SacctError> {
    let fields = split_delimited(line, 2).map_err(SacctError::ParseError)?;
    Ok(SlurmJob {
        job_id: fields[0].trim().to_string(),
        state: fields[1].trim().to_string(),
    })
}

/// Parse full sacct output, skipping blank lines.
pub fn parse_sacct_output(stdout: &str) -> Result<Vec<SlurmJob>, SacctError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_sacct_line)
        .collect()
}

/// Query accounting for jobs that are no longer in the live queue.
pub async fn query_sacct(
    runner: &dyn CommandRunner,
    job_ids: &[String],
) -> Result<Vec<SlurmJob>, SacctError> {
    if job_ids.is_empty() {
        return Ok(Vec::new());
    }
    let args = vec![
        "--noheader".to_string(),
        "--parsable2".to_string(),
        "-X".to_string(),
        format!("--format={SACCT_FORMAT}"),
        "--jobs".to_string(),
        job_ids.join(","),
    ];

    let stdout = run_command(runner, "sacct", &args)
        .await
        .map_err(|e| SacctError::ExecutionError(e.to_string()))?;

    parse_sacct_output(&stdout)
}
