//! Backend fakes shared by the dispatch tests.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use ferry_core::{FileSystem, FileSystemError, JobDescription, Scheduler, SchedulerError, State};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type Log = Arc<Mutex<Vec<String>>>;

/// Scheduler whose job states are set by the test.
#[derive(Default)]
pub struct FakeScheduler {
    pub name: String,
    pub log: Option<Log>,
    pub submitted: Mutex<Vec<JobDescription>>,
    pub cancelled: Mutex<Vec<String>>,
    pub states: Mutex<HashMap<String, State>>,
    pub batch_queries: Mutex<Vec<Vec<String>>>,
    pub reject: bool,
}

impl FakeScheduler {
    pub fn logging(name: &str, log: Log) -> Self {
        Self {
            name: name.to_string(),
            log: Some(log),
            ..Self::default()
        }
    }

    pub fn set_state(&self, job_id: &str, state: State) {
        self.states
            .lock()
            .unwrap()
            .insert(job_id.to_string(), state);
    }
}

#[async_trait]
impl Scheduler for FakeScheduler {
    async fn submit(&self, description: &JobDescription) -> Result<String, SchedulerError> {
        if self.reject {
            return Err(SchedulerError::Submission("rejected".to_string()));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(description.clone());
        let job_id = format!("ext-{}", submitted.len());
        self.set_state(&job_id, State::Queued);
        Ok(job_id)
    }

    async fn state(&self, job_id: &str) -> Result<State, SchedulerError> {
        self.states
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))
    }

    async fn states(&self, job_ids: &[String]) -> Result<Vec<State>, SchedulerError> {
        self.batch_queries.lock().unwrap().push(job_ids.to_vec());
        let mut states = Vec::new();
        for job_id in job_ids {
            states.push(self.state(job_id).await?);
        }
        Ok(states)
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(format!("scheduler {}", self.name));
        }
        Ok(())
    }
}

/// What a [`FakeFileSystem`] download does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadBehavior {
    #[default]
    Succeed,
    Missing,
    Fail,
}

/// Filesystem that records transfers instead of doing them.
pub struct FakeFileSystem {
    pub name: String,
    pub log: Option<Log>,
    pub entry: Utf8PathBuf,
    pub uploads: Mutex<Vec<(JobDescription, JobDescription)>>,
    pub downloads: Mutex<Vec<(JobDescription, JobDescription)>>,
    pub behavior: DownloadBehavior,
    /// When set, downloads wait for a notification before finishing.
    pub gate: Option<Arc<Notify>>,
}

impl Default for FakeFileSystem {
    fn default() -> Self {
        Self {
            name: String::new(),
            log: None,
            entry: Utf8PathBuf::from("/remote/jobs"),
            uploads: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            behavior: DownloadBehavior::Succeed,
            gate: None,
        }
    }
}

impl FakeFileSystem {
    pub fn logging(name: &str, log: Log) -> Self {
        Self {
            name: name.to_string(),
            log: Some(log),
            ..Self::default()
        }
    }
}

#[async_trait]
impl FileSystem for FakeFileSystem {
    fn entry(&self) -> &Utf8Path {
        &self.entry
    }

    async fn upload(
        &self,
        src: &JobDescription,
        target: &JobDescription,
    ) -> Result<(), FileSystemError> {
        self.uploads
            .lock()
            .unwrap()
            .push((src.clone(), target.clone()));
        Ok(())
    }

    async fn download(
        &self,
        src: &JobDescription,
        target: &JobDescription,
    ) -> Result<(), FileSystemError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.downloads
            .lock()
            .unwrap()
            .push((src.clone(), target.clone()));
        match self.behavior {
            DownloadBehavior::Succeed => Ok(()),
            DownloadBehavior::Missing => Err(FileSystemError::NotFound(src.job_dir.to_string())),
            DownloadBehavior::Fail => Err(FileSystemError::Transfer("connection reset".to_string())),
        }
    }

    async fn close(&self) -> Result<(), FileSystemError> {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(format!("filesystem {}", self.name));
        }
        Ok(())
    }
}
