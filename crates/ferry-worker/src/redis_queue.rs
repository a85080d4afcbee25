//! Redis storage for the durable job queue.
//!
//! Keys, all under the queue name as prefix:
//!
//! - `<prefix>:queue`: list of pending job ids, oldest first
//! - `<prefix>:job:<id>`: JSON job description
//! - `<prefix>:status:<id>`: `deferred`, `queued`, `in_progress` or `complete`
//! - `<prefix>:result:<id>`: JSON [`JobResult`] once complete
//! - `<prefix>:abort:<id>`: set when a running job should be killed

use crate::queue::{JobQueue, JobResult, QueueConfig, QueueError, QueueStatus, QueuedJob};
use async_trait::async_trait;
use ferry_core::JobDescription;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

const STATUS_DEFERRED: &str = "deferred";
const STATUS_QUEUED: &str = "queued";
const STATUS_IN_PROGRESS: &str = "in_progress";
const STATUS_COMPLETE: &str = "complete";

/// Shortest blocking pop; a zero timeout would block forever.
const MIN_BLOCK_SECS: f64 = 0.01;

/// Key names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn pending(&self) -> String {
        format!("{}:queue", self.prefix)
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    pub fn status(&self, id: &str) -> String {
        format!("{}:status:{}", self.prefix, id)
    }

    pub fn result(&self, id: &str) -> String {
        format!("{}:result:{}", self.prefix, id)
    }

    pub fn abort(&self, id: &str) -> String {
        format!("{}:abort:{}", self.prefix, id)
    }
}

/// Turn the stored status (and result, for completed jobs) into a [`QueueStatus`].
pub fn parse_status(status: Option<&str>, result: Option<&str>) -> Result<QueueStatus, QueueError> {
    let Some(status) = status else {
        return Ok(QueueStatus::NotFound);
    };
    match status {
        STATUS_DEFERRED => Ok(QueueStatus::Deferred),
        STATUS_QUEUED => Ok(QueueStatus::Queued),
        STATUS_IN_PROGRESS => Ok(QueueStatus::InProgress),
        STATUS_COMPLETE => {
            let success = match result {
                Some(raw) => serde_json::from_str::<JobResult>(raw)?.success,
                None => false,
            };
            Ok(QueueStatus::Complete { success })
        }
        other => Err(QueueError::InvalidStatus(other.to_string())),
    }
}

/// [`JobQueue`] stored in Redis.
pub struct RedisJobQueue {
    client: redis::Client,
    keys: QueueKeys,
    connection: OnceCell<MultiplexedConnection>,
    closed: AtomicBool,
}

impl RedisJobQueue {
    /// Parse the DSN. The connection is opened on first use.
    pub fn new(config: &QueueConfig) -> Result<Self, QueueError> {
        Ok(Self {
            client: redis::Client::open(config.redis_dsn.as_str())?,
            keys: QueueKeys::new(config.queue.clone()),
            connection: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let connection = self
            .connection
            .get_or_try_init(|| async {
                tracing::debug!("Connecting to queue {}", self.keys.pending());
                self.client.get_multiplexed_async_connection().await
            })
            .await?;
        Ok(connection.clone())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, description: &JobDescription) -> Result<String, QueueError> {
        let mut conn = self.connection().await?;
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(description)?;

        let _: () = redis::pipe()
            .atomic()
            .set(self.keys.job(&id), payload)
            .ignore()
            .set(self.keys.status(&id), STATUS_QUEUED)
            .ignore()
            .rpush(self.keys.pending(), &id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    async fn status(&self, id: &str) -> Result<QueueStatus, QueueError> {
        let mut conn = self.connection().await?;
        let status: Option<String> = conn.get(self.keys.status(id)).await?;
        let result: Option<String> = if status.as_deref() == Some(STATUS_COMPLETE) {
            conn.get(self.keys.result(id)).await?
        } else {
            None
        };
        parse_status(status.as_deref(), result.as_deref())
    }

    async fn abort(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        match self.status(id).await? {
            QueueStatus::Deferred | QueueStatus::Queued => {
                let removed: i64 = conn.lrem(self.keys.pending(), 0, id).await?;
                if removed > 0 {
                    let _: () = conn
                        .del(vec![self.keys.job(id), self.keys.status(id)])
                        .await?;
                    tracing::info!("Removed queued job {}", id);
                } else {
                    // A worker popped it in the meantime.
                    let _: () = conn.set(self.keys.abort(id), 1).await?;
                }
            }
            QueueStatus::InProgress => {
                let _: () = conn.set(self.keys.abort(id), 1).await?;
                tracing::info!("Flagged running job {} for abort", id);
            }
            QueueStatus::Complete { .. } | QueueStatus::NotFound => {}
        }
        Ok(())
    }

    async fn is_aborted(&self, id: &str) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let aborted: bool = conn.exists(self.keys.abort(id)).await?;
        Ok(aborted)
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.connection().await?;
        let timeout = wait.as_secs_f64().max(MIN_BLOCK_SECS);
        let popped: Option<(String, String)> = conn.blpop(self.keys.pending(), timeout).await?;
        let Some((_, id)) = popped else {
            return Ok(None);
        };

        let payload: Option<String> = conn.get(self.keys.job(&id)).await?;
        let Some(payload) = payload else {
            tracing::debug!("Job {} vanished from the queue, skipping", id);
            return Ok(None);
        };
        let description: JobDescription = serde_json::from_str(&payload)?;
        let _: () = conn.set(self.keys.status(&id), STATUS_IN_PROGRESS).await?;
        Ok(Some(QueuedJob { id, description }))
    }

    async fn finish(&self, id: &str, result: JobResult) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.keys.result(id), serde_json::to_string(&result)?)
            .ignore()
            .set(self.keys.status(id), STATUS_COMPLETE)
            .ignore()
            .del(self.keys.abort(id))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
