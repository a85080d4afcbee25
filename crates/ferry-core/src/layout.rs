//! Files every backend leaves in a finished job directory.
//!
//! Other tooling reads these, so names and contents are fixed: the return code
//! is written as a bare decimal number with no trailing newline.

use camino::Utf8Path;

/// Captured standard output of the job command.
pub const STDOUT_FILE: &str = "stdout.txt";

/// Captured standard error of the job command.
pub const STDERR_FILE: &str = "stderr.txt";

/// Exit code of the job command.
pub const RETURNCODE_FILE: &str = "returncode";

/// Exit code recorded for jobs that were killed by a cancel.
pub const KILLED_RETURNCODE: i32 = 130;

/// Write the exit code of a job into its directory.
pub async fn write_returncode(job_dir: &Utf8Path, code: i32) -> std::io::Result<()> {
    tokio::fs::write(job_dir.join(RETURNCODE_FILE), code.to_string()).await
}
