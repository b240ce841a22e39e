//! Queue selection.
//!
//! A queue URL picks an external broker by scheme; no URL at all selects
//! the in-process channel queue, so a single binary can submit and work
//! tasks with nothing but PostgreSQL running. In that mode the queue
//! starts empty on every run, so the worker first seeds it with every
//! claimable task already in the store.

use std::sync::Arc;

use anyhow::Result;

use chaintask_core::queue::{
    AmqpQueue, ChannelConsumer, ChannelProducer, ChannelQueue, RedisQueue, TaskConsumer,
    TaskProducer,
};
use chaintask_core::store::TaskStore;
use chaintask_core::{ListOptions, Order, TaskStatus};

use crate::config::{queue_kind, CliConfig, QueueKind};

/// Buffer size for the in-process queue.
const CHANNEL_CAPACITY: usize = 256;

pub enum Broker {
    /// No broker configured: ids travel a process-local channel.
    InProcess {
        producer: Arc<ChannelProducer>,
        consumer: ChannelConsumer,
    },
    Redis(Arc<RedisQueue>),
    Amqp(Arc<AmqpQueue>),
}

impl Broker {
    /// Connect per the config; `None` queue URL selects the in-process
    /// queue.
    pub async fn connect(config: &CliConfig) -> Result<Self> {
        let Some(url) = config.queue_url.as_deref() else {
            let (producer, consumer) = ChannelQueue::bounded(CHANNEL_CAPACITY);
            return Ok(Self::InProcess {
                producer: Arc::new(producer),
                consumer,
            });
        };
        match queue_kind(url)? {
            QueueKind::Redis => Ok(Self::Redis(Arc::new(
                RedisQueue::connect(url, &config.queue_name).await?,
            ))),
            QueueKind::Amqp => Ok(Self::Amqp(Arc::new(
                AmqpQueue::connect(
                    url,
                    &config.queue_name,
                    chaintask_core::queue::amqp::DEFAULT_PREFETCH,
                )
                .await?,
            ))),
        }
    }

    pub fn is_in_process(&self) -> bool {
        matches!(self, Self::InProcess { .. })
    }

    pub fn producer(&self) -> Arc<dyn TaskProducer> {
        match self {
            Self::InProcess { producer, .. } => producer.clone(),
            Self::Redis(queue) => queue.clone(),
            Self::Amqp(queue) => queue.clone(),
        }
    }

    pub fn consumer(&self) -> &dyn TaskConsumer {
        match self {
            Self::InProcess { consumer, .. } => consumer,
            Self::Redis(queue) => queue.as_ref(),
            Self::Amqp(queue) => queue.as_ref(),
        }
    }
}

/// Publish every claimable task in the store (pending or failed with
/// retry budget left), oldest first. Returns how many ids were enqueued.
pub async fn seed_from_store(
    store: &dyn TaskStore,
    producer: &dyn TaskProducer,
) -> Result<usize> {
    let mut seeded = 0;
    let mut offset = 0;
    loop {
        let page = store
            .list(
                &ListOptions::new()
                    .with_statuses([TaskStatus::Pending, TaskStatus::Failed])
                    .with_order(Order::UpdatedAsc)
                    .with_page(100, offset),
            )
            .await?;
        let page_len = page.len();
        offset += page_len as i64;

        for task in &page {
            if task.attempts < task.max_retries {
                producer.publish(&task.id).await?;
                seeded += 1;
            }
        }
        if page_len < 100 {
            return Ok(seeded);
        }
    }
}
