//! Run a job command as a child process.

use ferry_core::layout::write_returncode;
use ferry_core::{JobDescription, KILLED_RETURNCODE, STDERR_FILE, STDOUT_FILE, State};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// How a job process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The command exited on its own with this code.
    Exited(i32),
    /// The cancellation token fired and the child was killed.
    Killed,
    /// The timeout expired and the child was killed.
    TimedOut,
}

impl Outcome {
    /// Code written to the returncode file.
    pub fn returncode(&self) -> i32 {
        match self {
            Outcome::Exited(code) => *code,
            Outcome::Killed | Outcome::TimedOut => KILLED_RETURNCODE,
        }
    }

    pub fn state(&self) -> State {
        match self {
            Outcome::Exited(0) => State::Ok,
            _ => State::Error,
        }
    }
}

/// Run `sh -c <command>` in the job directory.
///
/// stdout and stderr go to their fixed files in the job directory and the
/// exit code is written to the returncode file once the child is gone. When
/// `cancel` fires or `timeout` expires the child is killed and the reserved
/// killed code is recorded instead.
pub async fn run_job_process(
    description: &JobDescription,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> std::io::Result<Outcome> {
    let job_dir = &description.job_dir;
    let stdout = tokio::fs::File::create(job_dir.join(STDOUT_FILE))
        .await?
        .into_std()
        .await;
    let stderr = tokio::fs::File::create(job_dir.join(STDERR_FILE))
        .await?
        .into_std()
        .await;

    tracing::debug!("Running in {}: {}", job_dir, description.command);
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&description.command)
        .current_dir(job_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()?;

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => {
            Outcome::Exited(status?.code().unwrap_or(KILLED_RETURNCODE))
        }
        _ = cancel.cancelled() => {
            tracing::info!("Killing job in {}", job_dir);
            child.kill().await?;
            Outcome::Killed
        }
        _ = deadline => {
            tracing::warn!("Job in {} timed out, killing it", job_dir);
            child.kill().await?;
            Outcome::TimedOut
        }
    };

    write_returncode(job_dir, outcome.returncode()).await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use ferry_core::RETURNCODE_FILE;
    use tempfile::TempDir;

    fn description(temp: &TempDir, command: &str) -> JobDescription {
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        JobDescription::new(dir, command)
    }

    fn read(temp: &TempDir, name: &str) -> String {
        std::fs::read_to_string(temp.path().join(name)).unwrap()
    }

    #[tokio::test]
    async fn test_output_files() {
        let temp = TempDir::new().unwrap();
        let desc = description(&temp, "echo -n hello; echo -n oops >&2");

        let outcome = run_job_process(&desc, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Exited(0));
        assert_eq!(outcome.state(), State::Ok);
        assert_eq!(read(&temp, STDOUT_FILE), "hello");
        assert_eq!(read(&temp, STDERR_FILE), "oops");
        assert_eq!(read(&temp, RETURNCODE_FILE), "0");
    }

    #[tokio::test]
    async fn test_runs_in_job_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("input.txt"), "a\nb\n").unwrap();
        let desc = description(&temp, "wc -l < input.txt");

        run_job_process(&desc, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(read(&temp, STDOUT_FILE).trim(), "2");
    }

    #[tokio::test]
    async fn test_failing_command() {
        let temp = TempDir::new().unwrap();
        let outcome = run_job_process(&description(&temp, "exit 42"), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Exited(42));
        assert_eq!(outcome.state(), State::Error);
        assert_eq!(read(&temp, RETURNCODE_FILE), "42");
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let temp = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let outcome = run_job_process(&description(&temp, "sleep 30"), &token, None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Killed);
        assert_eq!(read(&temp, RETURNCODE_FILE), "130");
    }

    #[tokio::test]
    async fn test_timeout() {
        let temp = TempDir::new().unwrap();
        let outcome = run_job_process(
            &description(&temp, "sleep 30"),
            &CancellationToken::new(),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(outcome.state(), State::Error);
    }

    #[tokio::test]
    async fn test_missing_job_dir() {
        let desc = JobDescription::new("/nonexistent/ferry/job", "true");
        assert!(
            run_job_process(&desc, &CancellationToken::new(), None)
                .await
                .is_err()
        );
    }
}
