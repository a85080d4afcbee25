//! Background reconciliation of stored jobs.

use ferry_dispatch::{Context, sync_states};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Configuration for the polling service.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between reconciliation passes.
    pub poll_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Polling service that runs in the background.
pub struct PollingService {
    ctx: Arc<Context>,
    config: PollingConfig,
    shutdown: CancellationToken,
}

impl PollingService {
    pub fn new(ctx: Arc<Context>, config: PollingConfig, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            config,
            shutdown,
        }
    }

    /// Start the polling service in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Main polling loop. A pass in progress is finished before stopping.
    async fn run(self) {
        let mut ticker = interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!("Error reconciling jobs: {}", e);
                    }
                }
            }
        }
        tracing::debug!("Polling service stopped");
    }

    /// One reconciliation pass over every stored job.
    pub async fn poll_once(&self) -> Result<(), ferry_dispatch::DispatchError> {
        let jobs = self.ctx.store().list_jobs().await?;
        sync_states(&self.ctx, &jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::State;
    use ferry_dispatch::Config;
    use ferry_store::{JobStore, MemoryJobStore};

    #[tokio::test]
    async fn test_poll_once_with_nothing_to_do() {
        let config = Config::from_json(
            r#"{
                "job_root_dir": "/srv/jobs",
                "destinations": {
                    "local": { "scheduler": { "type": "memory" }, "filesystem": { "type": "local" } }
                }
            }"#,
        )
        .unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let job = store.create_job("count", "wc", None).await.unwrap();
        let ctx = Arc::new(Context::from_config(&config, store.clone()).unwrap());

        let service = PollingService::new(ctx.clone(), PollingConfig::default(), CancellationToken::new());
        service.poll_once().await.unwrap();
        assert_eq!(store.get_job(job.id).await.unwrap().state, State::New);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let config = Config::from_json(r#"{ "job_root_dir": "/srv/jobs", "destinations": {} }"#).unwrap();
        let ctx = Arc::new(Context::from_config(&config, Arc::new(MemoryJobStore::new())).unwrap());
        let shutdown = CancellationToken::new();
        let handle = PollingService::new(
            ctx.clone(),
            PollingConfig {
                poll_interval: Duration::from_millis(10),
            },
            shutdown.clone(),
        )
        .start();

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        ctx.shutdown().await;
    }
}
