//! Copying job output back once a scheduler reports a job finished.
//!
//! Reconciliation never downloads anything itself. It marks the job
//! `staging_out` and enqueues a [`StagingCommand`]; one consumer task works
//! through the commands in order.

use crate::context::job_dir;
use crate::destination::Destinations;
use crate::error::DispatchError;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use ferry_core::{JobDescription, State};
use ferry_store::JobStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Copy a finished job's directory back, then record its final state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingCommand {
    pub job_id: u64,
    pub destination: String,
    pub target_state: State,
}

#[async_trait]
pub trait StagingHandler: Send + Sync {
    async fn handle(&self, command: &StagingCommand) -> Result<(), DispatchError>;
}

/// Unbounded FIFO of staging commands drained by one background task.
pub struct StagingQueue {
    sender: std::sync::Mutex<Option<UnboundedSender<StagingCommand>>>,
    shutdown: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl StagingQueue {
    /// Start the consumer. Must be called inside a tokio runtime.
    pub fn start(handler: Arc<dyn StagingHandler>) -> Self {
        let (sender, receiver) = unbounded_channel();
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn(consume(receiver, handler, shutdown.clone()));
        Self {
            sender: std::sync::Mutex::new(Some(sender)),
            shutdown,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Queue a command. Never waits.
    pub fn enqueue(&self, command: StagingCommand) -> Result<(), DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::StagingClosed);
        }
        tracing::debug!(
            "Queued staging of job {} from {}",
            command.job_id,
            command.destination
        );
        let sender = self
            .sender
            .lock()
            .map_err(|_| DispatchError::StagingClosed)?;
        sender
            .as_ref()
            .ok_or(DispatchError::StagingClosed)?
            .send(command)
            .map_err(|_| DispatchError::StagingClosed)
    }

    /// Stop accepting commands and wait until every queued one is handled.
    pub async fn finish(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        self.join_consumer().await;
    }

    /// Stop the consumer. Commands still queued are dropped and their jobs
    /// stay `staging_out`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.join_consumer().await;
    }

    async fn join_consumer(&self) {
        if let Some(consumer) = self.consumer.lock().await.take()
            && let Err(e) = consumer.await
        {
            tracing::error!("Staging consumer failed: {}", e);
        }
    }
}

async fn consume(
    mut receiver: UnboundedReceiver<StagingCommand>,
    handler: Arc<dyn StagingHandler>,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            command = receiver.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::warn!("Abandoned staging of job {} at shutdown", command.job_id);
                break;
            }
            result = handler.handle(&command) => {
                if let Err(e) = result {
                    tracing::error!("Staging of job {} failed: {}", command.job_id, e);
                }
            }
        }
    }

    receiver.close();
    while let Ok(command) = receiver.try_recv() {
        tracing::warn!(
            "Abandoned staging of job {} at shutdown, it stays staging_out",
            command.job_id
        );
    }
}

/// Downloads the job directory from the destination's filesystem.
pub struct DownloadHandler {
    store: Arc<dyn JobStore>,
    destinations: Arc<Destinations>,
    job_root_dir: Utf8PathBuf,
}

impl DownloadHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        destinations: Arc<Destinations>,
        job_root_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            store,
            destinations,
            job_root_dir: job_root_dir.into(),
        }
    }
}

#[async_trait]
impl StagingHandler for DownloadHandler {
    async fn handle(&self, command: &StagingCommand) -> Result<(), DispatchError> {
        let destination = self
            .destinations
            .get(&command.destination)
            .ok_or_else(|| DispatchError::UnknownDestination(command.destination.clone()))?;
        let filesystem = destination.filesystem();

        let local = JobDescription::new(job_dir(&self.job_root_dir, command.job_id), "");
        let remote = filesystem.localize_description(&local, &self.job_root_dir);

        match filesystem.download(&remote, &local).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    "Nothing to download for job {} from {}: {}",
                    command.job_id,
                    command.destination,
                    e
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.store
            .update_state(command.job_id, command.target_state)
            .await?;
        tracing::info!("Job {} is {}", command.job_id, command.target_state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::Destination;
    use crate::testing::{DownloadBehavior, FakeFileSystem, FakeScheduler};
    use ferry_store::MemoryJobStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        filesystem: Arc<FakeFileSystem>,
        handler: DownloadHandler,
    }

    async fn fixture(filesystem: FakeFileSystem) -> (Fixture, u64) {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.create_job("count", "wc", None).await.unwrap();
        store
            .update_external_id_and_destination(job.id, "ext-1", "hpc", State::StagingOut)
            .await
            .unwrap();

        let filesystem = Arc::new(filesystem);
        let destinations = Arc::new(Destinations::new(vec![Destination::new(
            "hpc",
            Arc::new(FakeScheduler::default()),
            filesystem.clone(),
        )]));
        let handler = DownloadHandler::new(store.clone(), destinations, "/srv/jobs");
        (
            Fixture {
                store,
                filesystem,
                handler,
            },
            job.id,
        )
    }

    fn command(job_id: u64, target_state: State) -> StagingCommand {
        StagingCommand {
            job_id,
            destination: "hpc".to_string(),
            target_state,
        }
    }

    #[tokio::test]
    async fn test_download_then_persist() {
        let (fixture, id) = fixture(FakeFileSystem::default()).await;
        fixture.handler.handle(&command(id, State::Ok)).await.unwrap();

        let downloads = fixture.filesystem.downloads.lock().unwrap().clone();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].0.job_dir, format!("/remote/jobs/{id}"));
        assert_eq!(downloads[0].1.job_dir, format!("/srv/jobs/{id}"));
        assert_eq!(fixture.store.get_job(id).await.unwrap().state, State::Ok);
    }

    #[tokio::test]
    async fn test_missing_output_still_persists() {
        let (fixture, id) = fixture(FakeFileSystem {
            behavior: DownloadBehavior::Missing,
            ..FakeFileSystem::default()
        })
        .await;
        fixture
            .handler
            .handle(&command(id, State::Error))
            .await
            .unwrap();
        assert_eq!(fixture.store.get_job(id).await.unwrap().state, State::Error);
    }

    #[tokio::test]
    async fn test_failed_download_stays_staging_out() {
        let (fixture, id) = fixture(FakeFileSystem {
            behavior: DownloadBehavior::Fail,
            ..FakeFileSystem::default()
        })
        .await;
        let result = fixture.handler.handle(&command(id, State::Ok)).await;
        assert!(matches!(result, Err(DispatchError::FileSystem(_))));
        assert_eq!(
            fixture.store.get_job(id).await.unwrap().state,
            State::StagingOut
        );
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let (fixture, id) = fixture(FakeFileSystem::default()).await;
        let result = fixture
            .handler
            .handle(&StagingCommand {
                job_id: id,
                destination: "cloud".to_string(),
                target_state: State::Ok,
            })
            .await;
        assert!(matches!(result, Err(DispatchError::UnknownDestination(_))));
    }

    /// Records the order commands are handled in.
    #[derive(Default)]
    struct Recorder {
        handled: std::sync::Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl StagingHandler for Recorder {
        async fn handle(&self, command: &StagingCommand) -> Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.handled.lock().unwrap().push(command.job_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_queue_handles_in_order() {
        let recorder = Arc::new(Recorder::default());
        let queue = StagingQueue::start(recorder.clone());
        for id in 1..=5 {
            queue.enqueue(command(id, State::Ok)).unwrap();
        }

        for _ in 0..200 {
            if recorder.handled.lock().unwrap().len() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*recorder.handled.lock().unwrap(), vec![1, 2, 3, 4, 5]);

        queue.shutdown().await;
        assert!(matches!(
            queue.enqueue(command(6, State::Ok)),
            Err(DispatchError::StagingClosed)
        ));
    }

    #[tokio::test]
    async fn test_finish_drains_queue() {
        let recorder = Arc::new(Recorder::default());
        let queue = StagingQueue::start(recorder.clone());
        for id in 1..=3 {
            queue.enqueue(command(id, State::Ok)).unwrap();
        }
        queue.finish().await;
        assert_eq!(*recorder.handled.lock().unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            queue.enqueue(command(4, State::Ok)),
            Err(DispatchError::StagingClosed)
        ));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_abandons_pending_downloads() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let (fixture, id) = fixture(FakeFileSystem {
            gate: Some(gate.clone()),
            ..FakeFileSystem::default()
        })
        .await;
        let queue = StagingQueue::start(Arc::new(fixture.handler));
        queue.enqueue(command(id, State::Ok)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.shutdown().await;
        gate.notify_one();
        assert_eq!(
            fixture.store.get_job(id).await.unwrap().state,
            State::StagingOut
        );
        assert!(fixture.filesystem.downloads.lock().unwrap().is_empty());
    }
}
