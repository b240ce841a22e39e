//! The `Executor` and `RecoveryHandler` traits -- the seams to the agent
//! runtime.
//!
//! The concrete executor (LLM inference plus chain RPC) is an external
//! collaborator; the core only dictates when it runs and how its failures
//! are classified. Errors returned by an executor should carry the most
//! specific [`ErrorCode`](crate::ErrorCode) available; adapters wrapping
//! unclassified failures use `TASK_PROCESSING_FAILED` (retryable).

use async_trait::async_trait;

use chaintask_db::error::Result;
use chaintask_db::models::{Metadata, Task, TaskResult};

use crate::TaskError;

/// The executor's view of a task: what to do, not how it is scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub goal: String,
    pub chain_action: Option<String>,
    pub address: Option<String>,
    pub metadata: Option<Metadata>,
}

impl From<&Task> for ExecuteRequest {
    fn from(task: &Task) -> Self {
        Self {
            goal: task.goal.clone(),
            chain_action: task.chain_action.clone(),
            address: task.address.clone(),
            metadata: task.metadata.clone(),
        }
    }
}

/// Runs one task attempt to completion.
///
/// Invocations must be safe to repeat: the scheduler guarantees at-least-once
/// dispatch with idempotent completion, not exactly-once execution.
///
/// # Object Safety
///
/// The trait is object-safe so executors can be stored as
/// `Arc<dyn Executor>` in the processor.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecuteRequest) -> Result<TaskResult>;
}

/// Optional compensation hook, consulted only for non-retryable executor
/// errors.
///
/// Returning `Ok(Some(result))` records a degraded success; `Ok(None)`
/// declines to compensate and lets the task fail; `Err` is reported as
/// `TASK_COMPENSATION_FAILED`.
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn recover(&self, task: &Task, cause: &TaskError) -> Result<Option<TaskResult>>;
}

// Compile-time assertion: both seams must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Executor, _: &dyn RecoveryHandler) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    /// A trivial executor that replies with the goal, used only to prove the
    /// trait can be implemented and used as `dyn Executor`.
    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, request: ExecuteRequest) -> Result<TaskResult> {
            Ok(TaskResult {
                reply: request.goal,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn echo_executor_roundtrip() {
        let executor: Box<dyn Executor> = Box::new(EchoExecutor);
        let task = Task::new("t-1", "check balance");

        let result = executor.execute(ExecuteRequest::from(&task)).await.unwrap();
        assert_eq!(result.reply, "check balance");
        assert!(result.thought.is_empty());
    }

    #[test]
    fn request_captures_executor_facing_fields() {
        let mut task = Task::new("t-1", "swap");
        task.chain_action = Some("eth_call".into());
        task.address = Some("0xabc".into());

        let request = ExecuteRequest::from(&task);
        assert_eq!(request.goal, "swap");
        assert_eq!(request.chain_action.as_deref(), Some("eth_call"));
        assert_eq!(request.address.as_deref(), Some("0xabc"));
        assert!(request.metadata.is_none());
    }
}
