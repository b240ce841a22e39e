//! AMQP-backed queue.
//!
//! Declares a durable queue, publishes persistent messages with publisher
//! confirms, and consumes with manual acknowledgement: ack on handler
//! success, nack-with-requeue on handler failure. Each worker gets its own
//! channel with a configurable prefetch window.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use chaintask_db::error::{ErrorCode, Result, TaskError};

use super::{TaskConsumer, TaskHandler, TaskProducer};

/// Default number of unacknowledged deliveries per worker channel.
pub const DEFAULT_PREFETCH: u16 = 8;

pub struct AmqpQueue {
    conn: Connection,
    publisher: Channel,
    queue: String,
    prefetch: u16,
}

impl AmqpQueue {
    /// Connect to the broker, declare the durable queue, and open a
    /// confirmed publisher channel.
    pub async fn connect(url: &str, queue: impl Into<String>, prefetch: u16) -> Result<Self> {
        let queue = queue.into();
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| init_error("failed to connect to AMQP broker", e))?;

        let publisher = conn
            .create_channel()
            .await
            .map_err(|e| init_error("failed to open publisher channel", e))?;
        publisher
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| init_error(format!("failed to declare queue {queue}"), e))?;
        publisher
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| init_error("failed to enable publisher confirms", e))?;

        Ok(Self {
            conn,
            publisher,
            queue,
            prefetch: prefetch.max(1),
        })
    }
}

fn init_error(message: impl Into<String>, e: lapin::Error) -> TaskError {
    TaskError::new(ErrorCode::InitializationFailure, message).with_source(e)
}

#[async_trait]
impl TaskProducer for AmqpQueue {
    async fn publish(&self, id: &str) -> Result<()> {
        let confirm = self
            .publisher
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                id.as_bytes(),
                // Delivery mode 2 = persistent.
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| publish_error(id, e))?;
        confirm.await.map_err(|e| publish_error(id, e))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.conn.status().connected() {
            if let Err(e) = self.conn.close(200, "client shutdown").await {
                warn!(error = %e, "AMQP connection close failed");
            }
        }
        Ok(())
    }
}

fn publish_error(id: &str, e: lapin::Error) -> TaskError {
    TaskError::new(
        ErrorCode::TaskPublishFailed,
        format!("failed to publish task {id}"),
    )
    .with_source(e)
}

#[async_trait]
impl TaskConsumer for AmqpQueue {
    async fn consume(
        &self,
        workers: usize,
        handler: Arc<dyn TaskHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut joins = Vec::with_capacity(workers.max(1));
        for worker in 0..workers.max(1) {
            let channel = self
                .conn
                .create_channel()
                .await
                .map_err(|e| init_error("failed to open consumer channel", e))?;
            channel
                .basic_qos(self.prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| init_error("failed to set prefetch", e))?;
            let mut consumer = channel
                .basic_consume(
                    &self.queue,
                    &format!("chaintask-worker-{worker}"),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| init_error("failed to start consumer", e))?;

            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            joins.push(tokio::spawn(async move {
                loop {
                    let delivery = tokio::select! {
                        _ = cancel.cancelled() => break,
                        delivery = consumer.next() => delivery,
                    };
                    let Some(delivery) = delivery else { break };
                    let delivery = match delivery {
                        Ok(d) => d,
                        Err(e) => {
                            warn!(worker, error = %e, "delivery failed");
                            break;
                        }
                    };

                    let id = String::from_utf8_lossy(&delivery.data).into_owned();
                    match handler.handle(&id).await {
                        Ok(()) => {
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                warn!(worker, task_id = %id, error = %e, "ack failed");
                            }
                        }
                        Err(e) => {
                            warn!(worker, task_id = %id, error = %e, "handler failed; requeueing");
                            let nack = BasicNackOptions {
                                requeue: true,
                                ..Default::default()
                            };
                            if let Err(e) = delivery.nack(nack).await {
                                warn!(worker, task_id = %id, error = %e, "nack failed");
                            }
                        }
                    }
                }
            }));
        }

        for join in joins {
            if let Err(e) = join.await {
                warn!(error = %e, "AMQP worker panicked");
            }
        }
        Ok(())
    }
}
