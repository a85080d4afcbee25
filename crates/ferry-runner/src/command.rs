//! Local command execution.

use crate::CommandRunner;
use async_trait::async_trait;
use camino::Utf8Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
    #[error("SSH connection to {host} failed: {error}")]
    Connection { host: String, error: String },
    #[error("SSH authentication as {user}@{host} failed: {error}")]
    Authentication {
        user: String,
        host: String,
        error: String,
    },
    #[error("Runner is closed")]
    Closed,
}

/// Exit code and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`CommandError::Failed`].
    pub fn into_result(self, command: &str) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                command: command.to_string(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Run a scheduler tool through `runner` and return its stdout.
///
/// A non-zero exit becomes [`CommandError::Failed`] carrying the tool's
/// stderr.
pub async fn run_command(
    runner: &dyn CommandRunner,
    command: &str,
    args: &[String],
) -> Result<String, CommandError> {
    let output = runner.run(command, args, None, None).await?;
    Ok(output.into_result(command)?.stdout)
}

/// Runs commands as child processes of this one.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        stdin: Option<&str>,
        cwd: Option<&Utf8Path>,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!("Running {} {:?}", command, args);
        let execution_error = |e: std::io::Error| CommandError::Execution {
            command: command.to_string(),
            error: e.to_string(),
        };

        let mut child = cmd.spawn().map_err(execution_error)?;
        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(execution_error)?;
            // Dropping the pipe closes it so the child sees EOF.
            drop(pipe);
        }

        let output = child.wait_with_output().await.map_err(execution_error)?;
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn close(&self) -> Result<(), CommandError> {
        Ok(())
    }
}
