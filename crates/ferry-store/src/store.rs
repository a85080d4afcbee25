use crate::types::{JobRecord, JobsState};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use ferry_core::State;
use fs4::fs_std::FileExt;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(u64),
    #[error("Job {0} is in a terminal state and can no longer change")]
    Terminal(u64),
    #[error("Job {id} cannot move back from {from} to {to}")]
    Backward { id: u64, from: State, to: State },
    #[error("Job {id} was already sent to destination {destination}")]
    DestinationFixed { id: u64, destination: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistent storage for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(
        &self,
        name: &str,
        application: &str,
        submitter: Option<&str>,
    ) -> Result<JobRecord, StoreError>;

    async fn update_state(&self, id: u64, state: State) -> Result<JobRecord, StoreError>;

    /// Record where a job was submitted, together with its new state.
    async fn update_external_id_and_destination(
        &self,
        id: u64,
        external_id: &str,
        destination: &str,
        state: State,
    ) -> Result<JobRecord, StoreError>;

    async fn get_job(&self, id: u64) -> Result<JobRecord, StoreError>;

    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;
}

/// Job records that live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<JobsState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(
        &self,
        name: &str,
        application: &str,
        submitter: Option<&str>,
    ) -> Result<JobRecord, StoreError> {
        Ok(self.state.lock().await.create_job(
            name.to_string(),
            application.to_string(),
            submitter.map(str::to_string),
        ))
    }

    async fn update_state(&self, id: u64, state: State) -> Result<JobRecord, StoreError> {
        self.state.lock().await.update_state(id, state)
    }

    async fn update_external_id_and_destination(
        &self,
        id: u64,
        external_id: &str,
        destination: &str,
        state: State,
    ) -> Result<JobRecord, StoreError> {
        self.state.lock().await.update_external_id_and_destination(
            id,
            external_id.to_string(),
            destination.to_string(),
            state,
        )
    }

    async fn get_job(&self, id: u64) -> Result<JobRecord, StoreError> {
        self.state
            .lock()
            .await
            .get_job(id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.state.lock().await.jobs.clone())
    }
}

/// Job records kept in one JSON file, rewritten on every change.
///
/// Several processes may share the file. Every change re-reads it while
/// holding an exclusive lock on `<file>.lock`, and the file is replaced by
/// rename, so readers always see a complete version without locking.
pub struct JsonJobStore {
    path: Utf8PathBuf,
    lock_path: Utf8PathBuf,
    writer: Mutex<()>,
}

/// Exclusive advisory lock, released when dropped.
struct FileLock {
    _file: std::fs::File,
}

impl FileLock {
    async fn acquire(path: &Utf8Path) -> Result<Self, StoreError> {
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(Self { _file: file })
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

impl JsonJobStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub async fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let store = Self {
            lock_path: Utf8PathBuf::from(format!("{path}.lock")),
            path,
            writer: Mutex::new(()),
        };
        let state = store.load().await?;
        tracing::debug!("Loaded {} jobs from {}", state.jobs.len(), store.path);
        Ok(store)
    }

    /// Get the path to the state file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    async fn load(&self) -> Result<JobsState, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JobsState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the state next to the file and rename it into place.
    async fn save(&self, state: &JobsState) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Re-read the file, apply `change` and persist the result, all under
    /// the file lock.
    ///
    /// Creates parent directories if needed.
    async fn modify<F>(&self, change: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobsState) -> Result<JobRecord, StoreError> + Send,
    {
        let _writer = self.writer.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let _lock = FileLock::acquire(&self.lock_path).await?;

        let mut state = self.load().await?;
        let job = change(&mut state)?;
        self.save(&state).await?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for JsonJobStore {
    async fn get_job(&self, id: u64) -> Result<JobRecord, StoreError> {
        self.load()
            .await?
            .get_job(id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.load().await?.jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryJobStore::new();
        let job = store.create_job("count", "wc", Some("alice")).await.unwrap();
        store
            .update_external_id_and_destination(job.id, "42", "local", State::Queued)
            .await
            .unwrap();

        let loaded = store.get_job(job.id).await.unwrap();
        assert_eq!(loaded.state, State::Queued);
        assert_eq!(loaded.external_id.as_deref(), Some("42"));
        assert_eq!(store.list_jobs().await.unwrap().len(), 1);
        assert!(matches!(
            store.get_job(99).await,
            Err(StoreError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_json_store_load_nonexistent() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("jobs.json");
        let store = JsonJobStore::open(&path).await.unwrap();
        assert!(store.list_jobs().await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_json_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path())
            .unwrap()
            .join("state")
            .join("jobs.json");

        let store = JsonJobStore::open(&path).await.unwrap();
        let job = store.create_job("count", "wc", None).await.unwrap();
        store.update_state(job.id, State::Running).await.unwrap();
        assert!(store.path().exists());

        let reopened = JsonJobStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_job(job.id).await.unwrap().state, State::Running);
        let next = reopened.create_job("again", "wc", None).await.unwrap();
        assert_eq!(next.id, job.id + 1);
    }

    #[tokio::test]
    async fn test_json_store_keeps_state_on_rejected_change() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("jobs.json");
        let store = JsonJobStore::open(&path).await.unwrap();

        let job = store.create_job("count", "wc", None).await.unwrap();
        store.update_state(job.id, State::Error).await.unwrap();
        assert!(matches!(
            store.update_state(job.id, State::Ok).await,
            Err(StoreError::Terminal(_))
        ));

        let reopened = JsonJobStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_job(job.id).await.unwrap().state, State::Error);
    }

    #[tokio::test]
    async fn test_json_store_shared_between_handles() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("jobs.json");
        let server = JsonJobStore::open(&path).await.unwrap();
        let first = server.create_job("count", "wc", None).await.unwrap();

        let client = JsonJobStore::open(&path).await.unwrap();
        let second = client.create_job("other", "wc", None).await.unwrap();
        assert_eq!(second.id, first.id + 1);

        server.update_state(first.id, State::Running).await.unwrap();
        assert_eq!(server.list_jobs().await.unwrap().len(), 2);
        assert_eq!(client.get_job(second.id).await.unwrap().state, State::New);
        assert_eq!(client.get_job(first.id).await.unwrap().state, State::Running);
    }

    #[tokio::test]
    async fn test_json_store_concurrent_creates_get_distinct_ids() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("jobs.json");
        let a = std::sync::Arc::new(JsonJobStore::open(&path).await.unwrap());
        let b = std::sync::Arc::new(JsonJobStore::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = if i % 2 == 0 { a.clone() } else { b.clone() };
            handles.push(tokio::spawn(async move {
                store.create_job("count", "wc", None).await.unwrap().id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=10).collect::<Vec<u64>>());
        assert_eq!(a.list_jobs().await.unwrap().len(), 10);
    }
}
