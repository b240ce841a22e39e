//! The worker-side retry/compensation state machine.
//!
//! A processor consumes task ids, claims each one (the claim increments
//! `attempts` and is the mutual-exclusion point), invokes the executor, and
//! applies the failure policy:
//!
//! - retryable error with budget left: mark failed, republish, debug log;
//! - retryable error with budget exhausted: mark failed, `terminal` alert;
//! - non-retryable error: consult the recovery handler; a fallback result
//!   becomes a degraded success, otherwise mark failed with a
//!   `non_retryable` alert;
//! - executor success: persist; if persisting fails, degrade to a
//!   retryable failure and republish.
//!
//! Alerts are emitted after the state transition is persisted and are
//! fire-and-forget: dispatcher failures are logged, never propagated.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chaintask_db::error::{ErrorCode, Result, Severity, TaskError};
use chaintask_db::models::{now_epoch, Task, TaskResult};

use crate::alert::{AlertDispatcher, AlertEvent};
use crate::executor::{ExecuteRequest, Executor, RecoveryHandler};
use crate::queue::{TaskConsumer, TaskHandler, TaskProducer};
use crate::store::TaskStore;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of queue workers. Clamped to at least 1.
    pub workers: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

pub struct Processor {
    store: Arc<dyn TaskStore>,
    producer: Arc<dyn TaskProducer>,
    executor: Arc<dyn Executor>,
    recovery: Option<Arc<dyn RecoveryHandler>>,
    alerts: Arc<AlertDispatcher>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        producer: Arc<dyn TaskProducer>,
        executor: Arc<dyn Executor>,
        alerts: Arc<AlertDispatcher>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            producer,
            executor,
            recovery: None,
            alerts,
            config,
        }
    }

    /// Install a compensation hook, consulted only for non-retryable
    /// executor errors.
    pub fn with_recovery(mut self, recovery: Arc<dyn RecoveryHandler>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Run the worker pool over the consumer until the token is cancelled.
    pub async fn run(
        self: Arc<Self>,
        consumer: &dyn TaskConsumer,
        cancel: CancellationToken,
    ) -> Result<()> {
        let workers = self.config.workers.max(1);
        info!(workers, "processor starting");
        consumer.consume(workers, self, cancel).await
    }

    /// Process one delivered id end to end.
    async fn process(&self, id: &str) -> Result<()> {
        let task = match self.store.claim(id).await {
            Ok(task) => task,
            // Expected outcomes of racing workers and late deliveries.
            Err(e)
                if e == ErrorCode::TaskNotFound
                    || e == ErrorCode::TaskCompleted
                    || e == ErrorCode::TaskRetriesExhausted =>
            {
                debug!(task_id = %id, code = %e.code(), "dropping id");
                return Ok(());
            }
            Err(e) => {
                error!(task_id = %id, error = %e, "claim failed");
                self.emit(AlertEvent {
                    stage: "claim".into(),
                    code: e.code(),
                    message: e.to_string(),
                    severity: e.severity(),
                    task_id: id.to_owned(),
                    attempts: 0,
                    max_retries: 0,
                    metadata: None,
                    timestamp: now_epoch(),
                })
                .await;
                return Err(e);
            }
        };

        info!(task_id = %task.id, attempt = task.attempts, "task claimed");

        match self.executor.execute(ExecuteRequest::from(&task)).await {
            Ok(result) => self.finish_success(&task, result).await,
            Err(exec_err) => self.finish_failure(&task, exec_err).await,
        }
    }

    async fn finish_success(&self, task: &Task, result: TaskResult) -> Result<()> {
        match self.store.mark_succeeded(&task.id, &result).await {
            Ok(()) => {
                info!(task_id = %task.id, attempts = task.attempts, "task succeeded");
                Ok(())
            }
            Err(store_err) => {
                // The work is done but the result is not durable; degrade to
                // a retryable failure so a later run can redo it (the
                // executor contract is safe to repeat).
                warn!(task_id = %task.id, error = %store_err, "failed to persist result");
                let message = format!("failed to persist result: {store_err}");
                self.store
                    .mark_failed(&task.id, ErrorCode::TaskProcessingFailed, &message, false)
                    .await?;
                self.republish_bounded(task).await;
                Ok(())
            }
        }
    }

    async fn finish_failure(&self, task: &Task, exec_err: TaskError) -> Result<()> {
        let code = exec_err.code();
        let err_retryable = exec_err.is_retryable();
        let retryable_now = err_retryable && task.attempts < task.max_retries;

        // Compensation runs only for non-retryable errors; retryable ones
        // always take the republish branch.
        if !err_retryable {
            if let Some(outcome) = self.compensate(task, &exec_err).await {
                return outcome;
            }
        }

        self.store
            .mark_failed(&task.id, code, exec_err.message(), !retryable_now)
            .await?;

        if task.attempts >= task.max_retries {
            self.emit(self.event(task, "terminal", code, exec_err.to_string(), exec_err.severity()))
                .await;
        } else if !err_retryable {
            self.emit(self.event(
                task,
                "non_retryable",
                code,
                exec_err.to_string(),
                exec_err.severity(),
            ))
            .await;
        } else {
            // Retryable, non-terminal: visible through logs, not alerts.
            debug!(
                task_id = %task.id,
                attempt = task.attempts,
                error = %exec_err,
                "task failed; will retry"
            );
        }

        if retryable_now {
            self.republish_bounded(task).await;
        }
        Ok(())
    }

    /// Run the recovery handler, if any. Returns `Some(outcome)` when
    /// compensation settled the task (degraded success), `None` when the
    /// ordinary failure path should continue.
    async fn compensate(&self, task: &Task, exec_err: &TaskError) -> Option<Result<()>> {
        let recovery = self.recovery.as_ref()?;

        match recovery.recover(task, exec_err).await {
            Err(rec_err) => {
                error!(task_id = %task.id, error = %rec_err, "compensation failed");
                self.emit(self.event(
                    task,
                    "compensate",
                    ErrorCode::TaskCompensationFailed,
                    rec_err.to_string(),
                    ErrorCode::TaskCompensationFailed.severity(),
                ))
                .await;
                None
            }
            Ok(Some(mut fallback)) => {
                if fallback.observations.is_empty() {
                    fallback.observations = format!("degraded: {exec_err}");
                }
                match self.store.mark_succeeded(&task.id, &fallback).await {
                    Ok(()) => {
                        info!(task_id = %task.id, "task settled with fallback result");
                        self.emit(self.event(
                            task,
                            "degraded",
                            exec_err.code(),
                            exec_err.to_string(),
                            exec_err.severity(),
                        ))
                        .await;
                        Some(Ok(()))
                    }
                    Err(store_err) => {
                        // Fall through to the ordinary failure path so the
                        // task is never stranded in `running`.
                        warn!(task_id = %task.id, error = %store_err, "failed to persist fallback");
                        None
                    }
                }
            }
            Ok(None) => None,
        }
    }

    /// Republish the id for another attempt, bounded by the retry budget.
    async fn republish_bounded(&self, task: &Task) {
        if task.attempts >= task.max_retries {
            return;
        }
        if let Err(e) = self.producer.publish(&task.id).await {
            warn!(task_id = %task.id, error = %e, "republish failed");
        }
    }

    fn event(
        &self,
        task: &Task,
        stage: &str,
        code: ErrorCode,
        message: String,
        severity: Severity,
    ) -> AlertEvent {
        AlertEvent {
            stage: stage.to_owned(),
            code,
            message,
            severity,
            task_id: task.id.clone(),
            attempts: task.attempts,
            max_retries: task.max_retries,
            metadata: task.metadata.clone(),
            timestamp: now_epoch(),
        }
    }

    async fn emit(&self, event: AlertEvent) {
        if let Err(e) = self.alerts.notify(&event).await {
            warn!(task_id = %event.task_id, error = %e, "alert dispatch failed");
        }
    }
}

#[async_trait]
impl TaskHandler for Processor {
    async fn handle(&self, id: &str) -> Result<()> {
        self.process(id).await
    }
}
