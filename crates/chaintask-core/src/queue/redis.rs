//! Redis list-backed queue.
//!
//! Publish is `LPUSH`; workers block on `BRPOP` with a short timeout so the
//! cancellation token is honoured promptly. When a handler fails, the id is
//! pushed back for a later delivery (the claim path makes redelivery of an
//! already-settled id harmless).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use chaintask_db::error::{ErrorCode, Result, TaskError};

use super::{TaskConsumer, TaskHandler, TaskProducer};

/// Seconds a worker waits in `BRPOP` before re-checking cancellation.
const POP_TIMEOUT_SECS: f64 = 1.0;

/// Delay after a broker error before the worker tries again.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct RedisQueue {
    manager: ConnectionManager,
    key: String,
}

impl RedisQueue {
    /// Connect to the broker and bind to the given list key.
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            TaskError::new(
                ErrorCode::InitializationFailure,
                format!("invalid redis URL {url}"),
            )
            .with_source(e)
        })?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            TaskError::new(
                ErrorCode::InitializationFailure,
                "failed to connect to redis",
            )
            .with_source(e)
        })?;
        Ok(Self {
            manager,
            key: key.into(),
        })
    }
}

#[async_trait]
impl TaskProducer for RedisQueue {
    async fn publish(&self, id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(&self.key, id).await.map_err(|e| {
            TaskError::new(
                ErrorCode::TaskPublishFailed,
                format!("failed to push task {id} to {}", self.key),
            )
            .with_source(e)
        })
    }

    async fn close(&self) -> Result<()> {
        // The multiplexed connection has no explicit close; dropping the
        // last clone tears it down.
        Ok(())
    }
}

#[async_trait]
impl TaskConsumer for RedisQueue {
    async fn consume(
        &self,
        workers: usize,
        handler: Arc<dyn TaskHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut joins = Vec::with_capacity(workers.max(1));
        for worker in 0..workers.max(1) {
            let mut conn = self.manager.clone();
            let key = self.key.clone();
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            joins.push(tokio::spawn(async move {
                // The pop is never raced against cancellation: abandoning an
                // in-flight BRPOP could lose a popped id. The short timeout
                // bounds shutdown latency instead.
                while !cancel.is_cancelled() {
                    let popped: Option<(String, String)> =
                        match conn.brpop(&key, POP_TIMEOUT_SECS).await {
                            Ok(v) => v,
                            Err(e) => {
                                warn!(worker, error = %e, "redis pop failed");
                                tokio::time::sleep(RETRY_BACKOFF).await;
                                continue;
                            }
                        };
                    let Some((_, id)) = popped else { continue };
                    if let Err(e) = handler.handle(&id).await {
                        warn!(worker, task_id = %id, error = %e, "handler failed; re-pushing");
                        if let Err(push_err) = conn.lpush::<_, _, ()>(&key, &id).await {
                            warn!(worker, task_id = %id, error = %push_err, "re-push failed");
                        }
                    }
                }
            }));
        }

        for join in joins {
            if let Err(e) = join.await {
                warn!(error = %e, "redis worker panicked");
            }
        }
        Ok(())
    }
}
