//! CLI argument parsing for ferry.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(version)]
#[command(about = "Dispatch jobs to local, Slurm, queue and grid destinations")]
pub struct Args {
    /// Destination config file
    #[arg(long, short = 'c', default_value = "ferry.json", global = true)]
    pub config: Utf8PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse the config and build every destination
    CheckConfig,

    /// Submit a job
    Submit(SubmitArgs),

    /// Reconcile and print stored jobs
    Status {
        /// Only this job
        job_id: Option<u64>,
    },

    /// Cancel a job
    Cancel { job_id: u64 },

    /// Keep reconciling jobs in the background until interrupted
    Serve {
        /// Reconciliation interval in seconds
        #[arg(long, default_value = "10")]
        poll_interval: u64,
    },

    /// Run the queue worker for a queue destination
    Worker {
        /// Name of the queue destination
        #[arg(long)]
        destination: String,
    },
}

#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Application to run
    #[arg(long, short = 'a')]
    pub application: String,

    /// Directory holding the job input, copied into the job root
    #[arg(long)]
    pub job_dir: Utf8PathBuf,

    /// Template value, as key=value (repeatable)
    #[arg(long = "param", short = 'p', value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Name for the job (defaults to the application)
    #[arg(long)]
    pub name: Option<String>,

    /// Who is submitting the job
    #[arg(long)]
    pub submitter: Option<String>,

    /// Wait until the job reaches a terminal state
    #[arg(long)]
    pub wait: bool,

    /// Poll interval in seconds while waiting
    #[arg(long, default_value = "5")]
    pub poll_interval: u64,
}

/// Parse a `key=value` pair.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}
