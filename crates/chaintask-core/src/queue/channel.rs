//! In-process queue over a bounded tokio channel.
//!
//! Publish blocks when the buffer is full (back-pressure) and fails once
//! the queue is closed. Workers share the receiver behind an async mutex,
//! so a single consumer instance serves the whole pool; with one worker,
//! FIFO order is preserved.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use chaintask_db::error::{ErrorCode, Result, TaskError};

use super::{TaskConsumer, TaskHandler, TaskProducer};

/// Factory for the paired in-process producer/consumer.
pub struct ChannelQueue;

impl ChannelQueue {
    /// Create a bounded queue with room for `capacity` ids.
    pub fn bounded(capacity: usize) -> (ChannelProducer, ChannelConsumer) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            ChannelProducer {
                tx: Mutex::new(Some(tx)),
            },
            ChannelConsumer {
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            },
        )
    }
}

pub struct ChannelProducer {
    /// `None` once closed; later publishes fail with `TASK_PUBLISH_FAILED`.
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

#[async_trait]
impl TaskProducer for ChannelProducer {
    async fn publish(&self, id: &str) -> Result<()> {
        let sender = {
            let guard = self
                .tx
                .lock()
                .map_err(|_| TaskError::new(ErrorCode::TaskPublishFailed, "queue lock poisoned"))?;
            guard.clone()
        };
        let Some(sender) = sender else {
            return Err(TaskError::new(
                ErrorCode::TaskPublishFailed,
                "queue is closed",
            ));
        };
        sender.send(id.to_owned()).await.map_err(|_| {
            TaskError::new(ErrorCode::TaskPublishFailed, "queue receiver dropped")
        })
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        Ok(())
    }
}

pub struct ChannelConsumer {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
}

#[async_trait]
impl TaskConsumer for ChannelConsumer {
    async fn consume(
        &self,
        workers: usize,
        handler: Arc<dyn TaskHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut joins = Vec::with_capacity(workers.max(1));
        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&self.rx);
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            joins.push(tokio::spawn(async move {
                loop {
                    // Only the receive is cancellable; a handler already
                    // running finishes its invocation.
                    let received = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            id = rx.recv() => id,
                        }
                    };
                    let Some(id) = received else { break };
                    if let Err(e) = handler.handle(&id).await {
                        warn!(worker, task_id = %id, error = %e, "handler failed");
                    }
                }
            }));
        }

        for join in joins {
            if let Err(e) = join.await {
                warn!(error = %e, "queue worker panicked");
            }
        }
        Ok(())
    }
}
