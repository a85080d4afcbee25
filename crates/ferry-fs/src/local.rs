//! Filesystem for destinations that share the local disk.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use ferry_core::{FileSystem, FileSystemError, JobDescription};

/// Job directories are used in place; transfers do nothing.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    entry: Utf8PathBuf,
}

impl LocalFileSystem {
    pub fn new(entry: impl Into<Utf8PathBuf>) -> Self {
        Self {
            entry: entry.into(),
        }
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn entry(&self) -> &Utf8Path {
        &self.entry
    }

    async fn upload(
        &self,
        _src: &JobDescription,
        _target: &JobDescription,
    ) -> Result<(), FileSystemError> {
        Ok(())
    }

    async fn download(
        &self,
        _src: &JobDescription,
        _target: &JobDescription,
    ) -> Result<(), FileSystemError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), FileSystemError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_localize_is_identity_on_same_root() {
        let fs = LocalFileSystem::new("/srv/ferry/jobs");
        let description = JobDescription::new("/srv/ferry/jobs/7", "true");

        let localized = fs.localize_description(&description, Utf8Path::new("/srv/ferry/jobs"));
        assert_eq!(localized, description);

        fs.upload(&description, &localized).await.unwrap();
        fs.download(&localized, &description).await.unwrap();
        fs.close().await.unwrap();
    }
}
