//! Producer/consumer abstraction carrying task ids.
//!
//! The queue never carries task bodies: the store is the single source of
//! truth, and the wire format is the bare ASCII id. Ordering is guaranteed
//! per worker only; across workers delivery order is unspecified.

pub mod channel;

#[cfg(feature = "amqp-queue")]
pub mod amqp;
#[cfg(feature = "redis-queue")]
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use chaintask_db::error::Result;

pub use channel::{ChannelConsumer, ChannelProducer, ChannelQueue};

#[cfg(feature = "amqp-queue")]
pub use amqp::AmqpQueue;
#[cfg(feature = "redis-queue")]
pub use redis::RedisQueue;

/// Enqueues task ids for later processing.
#[async_trait]
pub trait TaskProducer: Send + Sync {
    /// Best-effort durable enqueue. Failures carry `TASK_PUBLISH_FAILED`
    /// and are retryable in that sense.
    async fn publish(&self, id: &str) -> Result<()>;

    /// Stop accepting publishes. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Callback invoked once per received id.
///
/// An error returned by the handler does not make the consumer fail;
/// whether the id is re-enqueued is implementation-defined (the in-process
/// queue drops it, the broker-backed queues redeliver).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, id: &str) -> Result<()>;
}

/// Runs a pool of workers over the queue.
#[async_trait]
pub trait TaskConsumer: Send + Sync {
    /// Start `workers` workers, each receiving one id at a time and
    /// invoking the handler. Blocks until the cancellation token fires (or
    /// the queue is closed); in-flight handler invocations run to
    /// completion before returning.
    async fn consume(
        &self,
        workers: usize,
        handler: Arc<dyn TaskHandler>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

// Compile-time assertion: all queue seams must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn TaskProducer, _: &dyn TaskConsumer, _: &dyn TaskHandler) {}
};
