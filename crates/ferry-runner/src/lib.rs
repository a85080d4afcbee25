//! Command execution for ferry.
//!
//! Batch schedulers are driven through their command line tools. This crate
//! hides whether those tools run on this host or on a login node reached over
//! SSH, and provides a few helpers for parsing their output.

pub mod command;
pub mod ssh;

pub use command::{CommandError, CommandOutput, LocalRunner, run_command};
pub use ssh::{SshConfig, SshRunner, SshSession};

use async_trait::async_trait;
use camino::Utf8Path;

/// Runs a command somewhere and captures its output.
///
/// A non-zero exit code is reported in [`CommandOutput::exit_code`], not as an
/// error; errors mean the command could not be run at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        stdin: Option<&str>,
        cwd: Option<&Utf8Path>,
    ) -> Result<CommandOutput, CommandError>;

    /// Release any connection held by the runner. Safe to call twice.
    async fn close(&self) -> Result<(), CommandError>;
}

/// Split a pipe-delimited line and validate field count.
pub fn split_delimited(line: &str, min_fields: usize) -> Result<Vec<&str>, String> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < min_fields {
        return Err(format!(
            "Expected {} fields, got {}: {}",
            min_fields,
            fields.len(),
            line
        ));
    }
    Ok(fields)
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Join a program and its arguments into one shell command line.
pub fn shell_join(command: &str, args: &[String]) -> String {
    let mut line = shell_quote(command);
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}
