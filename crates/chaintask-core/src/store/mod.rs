//! Durable task state.
//!
//! The [`TaskStore`] trait is the only owner of persisted task state; all
//! mutation flows through it and callers receive defensive copies. Two
//! backends conform to the contract: [`MemoryTaskStore`] (a map behind a
//! single writer lock) and [`SqlTaskStore`] (row-per-task PostgreSQL).

mod memory;
mod sql;

pub use memory::MemoryTaskStore;
pub use sql::SqlTaskStore;

use async_trait::async_trait;

use chaintask_db::error::{ErrorCode, Result};
use chaintask_db::filter::ListOptions;
use chaintask_db::models::{Task, TaskResult, TaskStats};

/// Contract for task persistence.
///
/// `claim` is the linearisation point for concurrent workers: at most one
/// caller can hold a task in `running` at any time, and `attempts` is
/// authoritative only because every dispatch goes through `claim`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record, stamping `created_at = updated_at = now`.
    /// Fails with `TASK_CONFLICT` when the id already exists.
    async fn create(&self, task: &Task) -> Result<Task>;

    /// Fetch a copy of a task, or `TASK_NOT_FOUND`.
    async fn get(&self, id: &str) -> Result<Task>;

    /// Atomically transition a `pending`/`failed` task with retry budget
    /// left to `running`, incrementing `attempts` and clearing the error
    /// fields. Returns the new snapshot.
    ///
    /// Error classification: `TASK_COMPLETED` when the task already
    /// succeeded, `TASK_CONFLICT` when it is running, and
    /// `TASK_RETRIES_EXHAUSTED` when no budget remains.
    async fn claim(&self, id: &str) -> Result<Task>;

    /// Record a successful execution. Idempotent: succeeding an
    /// already-succeeded task is a no-op success, so duplicate executor
    /// completions are absorbed.
    async fn mark_succeeded(&self, id: &str, result: &TaskResult) -> Result<()>;

    /// Record a failed execution. The `terminal` flag is advisory -- it is
    /// logged for audit but not persisted; exhaustion is always derived
    /// from `attempts` vs `max_retries`.
    async fn mark_failed(
        &self,
        id: &str,
        code: ErrorCode,
        message: &str,
        terminal: bool,
    ) -> Result<()>;

    /// List matching tasks, ordered and paged per the options. Returns an
    /// empty vec when nothing matches.
    async fn list(&self, opts: &ListOptions) -> Result<Vec<Task>>;

    /// Aggregate counts over the same filter predicate as `list`.
    async fn stats(&self, opts: &ListOptions) -> Result<TaskStats>;

    /// Release resources. Idempotent.
    async fn close(&self) -> Result<()>;
}

// Compile-time assertion: the store must be usable as `dyn TaskStore`.
const _: () = {
    fn _assert_object_safe(_: &dyn TaskStore) {}
};
