//! Grid storage filesystem.
//!
//! A job directory in grid storage holds two archives: the packed input,
//! uploaded before submission, and the packed output, uploaded by the job
//! script when the command has finished.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use ferry_core::{FileSystem, FileSystemError, JobDescription};
use ferry_runner::{CommandOutput, CommandRunner, LocalRunner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Packed contents of the job directory before the run.
pub const INPUT_ARCHIVE: &str = "input.tar.gz";

/// Packed contents of the job directory after the run.
pub const OUTPUT_ARCHIVE: &str = "output.tar.gz";

/// Settings for a grid storage filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridStorageConfig {
    /// Logical file name directory holding the job directories
    pub lfn_root: Utf8PathBuf,

    /// Storage element uploads are written to
    pub storage_element: String,
}

/// The storage client reports a missing file on stdout or stderr.
fn is_missing_file(output: &CommandOutput) -> bool {
    let text = format!("{}\n{}", output.stdout, output.stderr).to_lowercase();
    text.contains("no such file")
}

/// Files in grid storage, moved with the DIRAC data management commands.
pub struct GridStorage {
    config: GridStorageConfig,
    runner: Arc<dyn CommandRunner>,
}

impl GridStorage {
    pub fn new(config: GridStorageConfig) -> Self {
        Self::with_runner(config, Arc::new(LocalRunner::new()))
    }

    pub fn with_runner(config: GridStorageConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    async fn run(
        &self,
        command: &str,
        args: Vec<String>,
        cwd: Option<&Utf8Path>,
    ) -> Result<CommandOutput, FileSystemError> {
        self.runner
            .run(command, &args, None, cwd)
            .await
            .map_err(|e| FileSystemError::Transfer(e.to_string()))
    }

    async fn run_checked(
        &self,
        command: &str,
        args: Vec<String>,
        cwd: Option<&Utf8Path>,
    ) -> Result<CommandOutput, FileSystemError> {
        let output = self.run(command, args, cwd).await?;
        if !output.success() {
            return Err(FileSystemError::Transfer(format!(
                "{command} exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

fn scratch_dir() -> Result<(tempfile::TempDir, Utf8PathBuf), FileSystemError> {
    let scratch = tempfile::Builder::new().prefix("ferry-grid-").tempdir()?;
    let path = Utf8Path::from_path(scratch.path())
        .ok_or_else(|| FileSystemError::Transfer("scratch dir is not UTF-8".to_string()))?
        .to_path_buf();
    Ok((scratch, path))
}

#[async_trait]
impl FileSystem for GridStorage {
    fn entry(&self) -> &Utf8Path {
        &self.config.lfn_root
    }

    async fn upload(
        &self,
        src: &JobDescription,
        target: &JobDescription,
    ) -> Result<(), FileSystemError> {
        let (_scratch, scratch_path) = scratch_dir()?;
        let archive = scratch_path.join(INPUT_ARCHIVE);

        self.run_checked(
            "tar",
            vec![
                "-czf".to_string(),
                archive.to_string(),
                "-C".to_string(),
                src.job_dir.to_string(),
                ".".to_string(),
            ],
            None,
        )
        .await?;

        let lfn = target.job_dir.join(INPUT_ARCHIVE);
        tracing::info!("Uploading {} to {}", src.job_dir, lfn);
        self.run_checked(
            "dirac-dms-add-file",
            vec![
                lfn.to_string(),
                archive.to_string(),
                self.config.storage_element.clone(),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    async fn download(
        &self,
        src: &JobDescription,
        target: &JobDescription,
    ) -> Result<(), FileSystemError> {
        let (_scratch, scratch_path) = scratch_dir()?;
        let lfn = src.job_dir.join(OUTPUT_ARCHIVE);

        let output = self
            .run("dirac-dms-get-file", vec![lfn.to_string()], Some(&scratch_path))
            .await?;
        if is_missing_file(&output) {
            return Err(FileSystemError::NotFound(lfn.to_string()));
        }
        if !output.success() {
            return Err(FileSystemError::Transfer(format!(
                "dirac-dms-get-file exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        tracing::info!("Unpacking {} into {}", lfn, target.job_dir);
        tokio::fs::create_dir_all(&target.job_dir).await?;
        self.run_checked(
            "tar",
            vec![
                "-xzf".to_string(),
                scratch_path.join(OUTPUT_ARCHIVE).to_string(),
                "-C".to_string(),
                target.job_dir.to_string(),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), FileSystemError> {
        self.runner
            .close()
            .await
            .map_err(|e| FileSystemError::Transfer(e.to_string()))
    }
}
