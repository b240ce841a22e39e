//! Submission API: validate, persist, enqueue, and query tasks.
//!
//! Every accepted task is observable: if the queue publish fails after the
//! record is created, the task is marked failed with
//! `TASK_PUBLISH_FAILED` before the error is returned, so callers can
//! always find out what happened to an id they submitted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use chaintask_db::error::{ErrorCode, Result, TaskError};
use chaintask_db::filter::ListOptions;
use chaintask_db::models::{Metadata, Task, TaskStats, DEFAULT_MAX_RETRIES};

use crate::queue::TaskProducer;
use crate::store::TaskStore;

/// Service-level configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Retry budget stamped on every created task.
    pub max_retries: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// A task submission.
///
/// The id is optional; submitting an id that already exists returns the
/// existing task unchanged (idempotent submit).
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub id: Option<String>,
    pub goal: String,
    pub chain_action: Option<String>,
    pub address: Option<String>,
    pub metadata: Option<Metadata>,
}

impl SubmitRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_chain_action(mut self, action: impl Into<String>) -> Self {
        self.chain_action = Some(action.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The public task API exposed to HTTP/RPC layers above the core.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    producer: Arc<dyn TaskProducer>,
    config: ServiceConfig,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        producer: Arc<dyn TaskProducer>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            producer,
            config,
        }
    }

    /// Accept a task: validate, persist as `pending`, and enqueue its id.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Task> {
        if request.goal.trim().is_empty() {
            return Err(TaskError::new(
                ErrorCode::TaskValidationFailed,
                "goal must not be empty",
            ));
        }

        // Idempotent submit: an existing id returns the original task.
        if let Some(id) = &request.id {
            match self.store.get(id).await {
                Ok(existing) => return Ok(existing),
                Err(e) if e == ErrorCode::TaskNotFound => {}
                Err(e) => return Err(e),
            }
        }

        let id = request
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut task = Task::new(id, request.goal);
        task.chain_action = request.chain_action;
        task.address = request.address;
        task.metadata = request.metadata;
        task.max_retries = self.config.max_retries;

        let stored = match self.store.create(&task).await {
            Ok(stored) => stored,
            // A concurrent submit of the same id won the race; the original
            // task body is what the caller must see.
            Err(e) if e == ErrorCode::TaskConflict => return self.store.get(&task.id).await,
            Err(e) => return Err(e),
        };

        if let Err(publish_err) = self.producer.publish(&stored.id).await {
            let message = format!("failed to enqueue task: {publish_err}");
            if let Err(mark_err) = self
                .store
                .mark_failed(&stored.id, ErrorCode::TaskPublishFailed, &message, true)
                .await
            {
                warn!(task_id = %stored.id, error = %mark_err, "failed to record publish failure");
            }
            return Err(TaskError::new(ErrorCode::TaskPublishFailed, message)
                .with_source(publish_err));
        }

        info!(task_id = %stored.id, "task accepted");
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> Result<Task> {
        self.store.get(id).await
    }

    pub async fn list(&self, opts: &ListOptions) -> Result<Vec<Task>> {
        self.store.list(opts).await
    }

    pub async fn stats(&self, opts: &ListOptions) -> Result<TaskStats> {
        self.store.stats(opts).await
    }

    /// Poll until the task reaches a terminal status.
    ///
    /// Cancellation is cooperative: drop the returned future (e.g. via
    /// `tokio::select!` or a timeout) to stop waiting.
    pub async fn wait_until_completed(&self, id: &str, poll_interval: Duration) -> Result<Task> {
        loop {
            let task = self.store.get(id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Close the producer, then the store.
    pub async fn close(&self) -> Result<()> {
        self.producer.close().await?;
        self.store.close().await
    }
}
