//! Copy job directories to and from a remote host over SFTP.
//!
//! Upload copies the contents of the local job directory into the remote
//! one. Download copies the remote job directory into the parent of the local
//! one, so it lands at `<local parent>/<remote basename>`. With matching
//! basenames, which is how destinations are normally laid out, both
//! directions address the same directory.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use ferry_core::{FileSystem, FileSystemError, JobDescription};
use ferry_runner::{SshConfig, SshSession};
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// Settings for an SFTP filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftpConfig {
    pub ssh_config: SshConfig,

    /// Remote directory holding the job directories
    pub entry: Utf8PathBuf,
}

/// One step of an upload, in the order it has to happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStep {
    CreateDir(Utf8PathBuf),
    CopyFile {
        local: Utf8PathBuf,
        remote: Utf8PathBuf,
    },
}

/// Walk `local_root` and list the remote directories to create and files to
/// copy so that its contents end up under `remote_root`.
pub fn upload_plan(
    local_root: &Utf8Path,
    remote_root: &Utf8Path,
) -> Result<Vec<UploadStep>, FileSystemError> {
    let mut steps = Vec::new();
    for entry in WalkDir::new(local_root).sort_by_file_name() {
        let entry = entry.map_err(|e| FileSystemError::Transfer(e.to_string()))?;
        let local = Utf8Path::from_path(entry.path())
            .ok_or_else(|| {
                FileSystemError::Transfer(format!("non UTF-8 path {}", entry.path().display()))
            })?
            .to_path_buf();
        let relative = local
            .strip_prefix(local_root)
            .map_err(|e| FileSystemError::Transfer(e.to_string()))?;
        let remote = if relative.as_str().is_empty() {
            remote_root.to_path_buf()
        } else {
            remote_root.join(relative)
        };

        if entry.file_type().is_dir() {
            steps.push(UploadStep::CreateDir(remote));
        } else if entry.file_type().is_file() {
            steps.push(UploadStep::CopyFile { local, remote });
        }
    }
    Ok(steps)
}

/// Where a download of `remote_job_dir` lands for a local `target_job_dir`.
pub fn download_landing(remote_job_dir: &Utf8Path, target_job_dir: &Utf8Path) -> Utf8PathBuf {
    let parent = target_job_dir.parent().unwrap_or(target_job_dir);
    match remote_job_dir.file_name() {
        Some(name) => parent.join(name),
        None => parent.to_path_buf(),
    }
}

/// Every ancestor of an absolute remote dir, shallowest first, including itself.
pub fn remote_dir_chain(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut chain: Vec<Utf8PathBuf> = dir
        .ancestors()
        .filter(|p| !p.as_str().is_empty() && p.parent().is_some())
        .map(Utf8Path::to_path_buf)
        .collect();
    chain.reverse();
    chain
}

fn is_no_such_file(error: &SftpError) -> bool {
    matches!(error, SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile)
}

fn map_sftp_error(path: &Utf8Path, error: SftpError) -> FileSystemError {
    if is_no_such_file(&error) {
        FileSystemError::NotFound(path.to_string())
    } else {
        FileSystemError::Transfer(format!("{path}: {error}"))
    }
}

/// Filesystem on a remote host, reached through one shared SSH session.
pub struct SftpFileSystem {
    entry: Utf8PathBuf,
    session: Arc<SshSession>,
}

impl SftpFileSystem {
    pub fn new(config: SftpConfig) -> Self {
        Self {
            entry: config.entry,
            session: Arc::new(SshSession::new(config.ssh_config)),
        }
    }

    /// Open a fresh SFTP subsystem for one transfer.
    async fn sftp(&self) -> Result<SftpSession, FileSystemError> {
        self.session
            .sftp()
            .await
            .map_err(|e| FileSystemError::Transfer(e.to_string()))
    }

    async fn ensure_remote_dir(sftp: &SftpSession, dir: &Utf8Path) -> Result<(), FileSystemError> {
        for current in remote_dir_chain(dir) {
            match sftp.metadata(current.as_str()).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(FileSystemError::Transfer(format!(
                        "remote path exists but is not a directory: {current}"
                    )));
                }
                Err(_) => sftp
                    .create_dir(current.as_str())
                    .await
                    .map_err(|e| map_sftp_error(&current, e))?,
            }
        }
        Ok(())
    }

    async fn upload_file(
        sftp: &SftpSession,
        local: &Utf8Path,
        remote: &Utf8Path,
    ) -> Result<(), FileSystemError> {
        tracing::debug!("Uploading {} -> {}", local, remote);
        let mut local_file = tokio::fs::File::open(local).await?;
        let mut remote_file = sftp
            .create(remote.as_str())
            .await
            .map_err(|e| map_sftp_error(remote, e))?;
        tokio::io::copy(&mut local_file, &mut remote_file).await?;
        remote_file.shutdown().await?;
        Ok(())
    }

    async fn download_file(
        sftp: &SftpSession,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), FileSystemError> {
        tracing::debug!("Downloading {} -> {}", remote, local);
        let mut remote_file = sftp
            .open(remote.as_str())
            .await
            .map_err(|e| map_sftp_error(remote, e))?;
        let mut local_file = tokio::fs::File::create(local).await?;
        tokio::io::copy(&mut remote_file, &mut local_file).await?;
        local_file.flush().await?;
        Ok(())
    }

    async fn download_dir(
        sftp: &SftpSession,
        remote_dir: &Utf8Path,
        local_dir: &Utf8Path,
    ) -> Result<(), FileSystemError> {
        let mut stack = vec![(remote_dir.to_path_buf(), local_dir.to_path_buf())];
        while let Some((remote_base, local_base)) = stack.pop() {
            tokio::fs::create_dir_all(&local_base).await?;
            let entries = sftp
                .read_dir(remote_base.as_str())
                .await
                .map_err(|e| map_sftp_error(&remote_base, e))?;
            for entry in entries {
                let name = entry.file_name();
                let remote_child = remote_base.join(&name);
                let local_child = local_base.join(&name);
                if entry.metadata().is_dir() {
                    stack.push((remote_child, local_child));
                } else {
                    Self::download_file(sftp, &remote_child, &local_child).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for SftpFileSystem {
    fn entry(&self) -> &Utf8Path {
        &self.entry
    }

    async fn upload(
        &self,
        src: &JobDescription,
        target: &JobDescription,
    ) -> Result<(), FileSystemError> {
        let plan = upload_plan(&src.job_dir, &target.job_dir)?;
        let sftp = self.sftp().await?;
        tracing::info!("Uploading {} to {}", src.job_dir, target.job_dir);

        Self::ensure_remote_dir(&sftp, &target.job_dir).await?;
        for step in &plan {
            match step {
                UploadStep::CreateDir(dir) => Self::ensure_remote_dir(&sftp, dir).await?,
                UploadStep::CopyFile { local, remote } => {
                    Self::upload_file(&sftp, local, remote).await?
                }
            }
        }
        if let Err(e) = sftp.close().await {
            tracing::debug!("Closing SFTP channel failed: {}", e);
        }
        Ok(())
    }

    async fn download(
        &self,
        src: &JobDescription,
        target: &JobDescription,
    ) -> Result<(), FileSystemError> {
        let sftp = self.sftp().await?;
        let remote = &src.job_dir;
        match sftp.metadata(remote.as_str()).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(FileSystemError::Transfer(format!(
                    "remote job dir is not a directory: {remote}"
                )));
            }
            Err(e) => return Err(map_sftp_error(remote, e)),
        }

        let landing = download_landing(remote, &target.job_dir);
        tracing::info!("Downloading {} to {}", remote, landing);
        Self::download_dir(&sftp, remote, &landing).await?;
        if let Err(e) = sftp.close().await {
            tracing::debug!("Closing SFTP channel failed: {}", e);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), FileSystemError> {
        self.session
            .close()
            .await
            .map_err(|e| FileSystemError::Transfer(e.to_string()))
    }
}
