//! End-to-end pipeline: submit through the service, ids travel the
//! in-process queue, processor workers execute with retries, and waiters
//! observe terminal states.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use chaintask_core::alert::AlertDispatcher;
use chaintask_core::queue::ChannelQueue;
use chaintask_core::store::{MemoryTaskStore, TaskStore};
use chaintask_core::{
    ErrorCode, ExecuteRequest, Executor, Processor, ProcessorConfig, Result, ServiceConfig,
    SubmitRequest, TaskError, TaskResult, TaskService, TaskStatus,
};

/// Fails the first attempt of every goal, succeeds afterwards.
#[derive(Default)]
struct FlakyOnceExecutor {
    attempts: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl Executor for FlakyOnceExecutor {
    async fn execute(&self, request: ExecuteRequest) -> Result<TaskResult> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(request.goal.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        if attempt == 1 {
            return Err(TaskError::new(
                ErrorCode::TaskProcessingFailed,
                "first attempt always fails",
            ));
        }
        Ok(TaskResult {
            reply: format!("done: {}", request.goal),
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn tasks_flow_from_submit_to_terminal_state() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let (producer, consumer) = ChannelQueue::bounded(64);
    let producer = Arc::new(producer);

    let service = TaskService::new(store.clone(), producer.clone(), ServiceConfig::default());

    let processor = Arc::new(Processor::new(
        store.clone(),
        producer.clone(),
        Arc::new(FlakyOnceExecutor::default()),
        Arc::new(AlertDispatcher::new()),
        ProcessorConfig { workers: 3 },
    ));

    let cancel = CancellationToken::new();
    let pool = {
        let cancel = cancel.clone();
        tokio::spawn(async move { processor.run(&consumer, cancel).await })
    };

    let mut ids = Vec::new();
    for i in 0..5 {
        let task = service
            .submit(SubmitRequest::new(format!("task number {i}")))
            .await
            .unwrap();
        ids.push(task.id);
    }

    for id in &ids {
        let settled = tokio::time::timeout(
            Duration::from_secs(10),
            service.wait_until_completed(id, Duration::from_millis(10)),
        )
        .await
        .expect("task should settle before the timeout")
        .unwrap();

        // Every task fails once, retries, then succeeds.
        assert_eq!(settled.status, TaskStatus::Succeeded);
        assert_eq!(settled.attempts, 2);
        assert!(settled.result.unwrap().reply.starts_with("done:"));
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), pool)
        .await
        .expect("worker pool should stop after cancel")
        .unwrap()
        .unwrap();

    service.close().await.unwrap();
}
