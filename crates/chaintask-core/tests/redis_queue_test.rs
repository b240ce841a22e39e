//! Integration tests for the redis list-backed queue, against a redis
//! container.

#![cfg(feature = "redis-queue")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use chaintask_core::queue::{RedisQueue, TaskConsumer, TaskHandler, TaskProducer};
use chaintask_core::{ErrorCode, Result, TaskError};
use chaintask_test_utils::start_redis;

struct Recorder {
    seen: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for Recorder {
    async fn handle(&self, id: &str) -> Result<()> {
        self.seen.lock().unwrap().push(id.to_owned());
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TaskError::new(ErrorCode::TaskProcessingFailed, "scripted"));
        }
        Ok(())
    }
}

/// Poll until the recorder has seen `count` deliveries or the deadline
/// passes.
async fn wait_for_deliveries(recorder: &Recorder, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while recorder.seen().len() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} deliveries, saw {:?}",
            recorder.seen()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn publish_consume_roundtrip_preserves_order_for_one_worker() {
    let (_container, url) = start_redis().await;
    let queue = RedisQueue::connect(&url, "chaintask:test").await.unwrap();

    for id in ["t-1", "t-2", "t-3"] {
        queue.publish(id).await.unwrap();
    }

    let recorder = Recorder::new();
    let cancel = CancellationToken::new();
    let consume = {
        let queue = queue.clone();
        let recorder = recorder.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.consume(1, recorder, cancel).await })
    };

    wait_for_deliveries(&recorder, 3).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), consume)
        .await
        .expect("consume should stop after cancel")
        .unwrap()
        .unwrap();

    assert_eq!(recorder.seen(), vec!["t-1", "t-2", "t-3"]);
}

#[tokio::test]
async fn handler_failure_re_pushes_the_id() {
    let (_container, url) = start_redis().await;
    let queue = RedisQueue::connect(&url, "chaintask:test").await.unwrap();

    let recorder = Recorder::new();
    recorder.fail_next.store(true, Ordering::SeqCst);

    let cancel = CancellationToken::new();
    let consume = {
        let queue = queue.clone();
        let recorder = recorder.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.consume(1, recorder, cancel).await })
    };

    queue.publish("t-1").await.unwrap();

    // First delivery fails and is re-pushed; the second settles it.
    wait_for_deliveries(&recorder, 2).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), consume)
        .await
        .expect("consume should stop after cancel")
        .unwrap()
        .unwrap();

    assert_eq!(recorder.seen(), vec!["t-1", "t-1"]);
}
