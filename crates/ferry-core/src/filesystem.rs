//! Filesystem backend contract.

use crate::description::JobDescription;
use crate::error::FileSystemError;
use async_trait::async_trait;
use camino::Utf8Path;

/// Where a destination keeps its job directories.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Root under which this filesystem keeps job directories.
    fn entry(&self) -> &Utf8Path;

    /// Rewrite `description.job_dir` from a path under `entry` to the same
    /// relative path under [`FileSystem::entry`]. The command is left alone.
    fn localize_description(&self, description: &JobDescription, entry: &Utf8Path) -> JobDescription {
        rebase_description(description, entry, self.entry())
    }

    /// Copy the job directory from the local filesystem to this one.
    async fn upload(
        &self,
        src: &JobDescription,
        target: &JobDescription,
    ) -> Result<(), FileSystemError>;

    /// Copy the job directory from this filesystem back to the local one.
    async fn download(
        &self,
        src: &JobDescription,
        target: &JobDescription,
    ) -> Result<(), FileSystemError>;

    /// Release any open connection.
    async fn close(&self) -> Result<(), FileSystemError>;
}

/// Move `description.job_dir` from under `from` to under `to`.
///
/// A job dir that does not live under `from` is returned unchanged.
pub fn rebase_description(description: &JobDescription, from: &Utf8Path, to: &Utf8Path) -> JobDescription {
    match description.job_dir.strip_prefix(from) {
        Ok(relative) => description.with_job_dir(to.join(relative)),
        Err(_) => {
            tracing::warn!(
                "Job dir {} is not under {}, leaving it unchanged",
                description.job_dir,
                from
            );
            description.clone()
        }
    }
}
