//! In-memory store backend: a map keyed by id behind a single writer lock.
//!
//! Suitable for tests and single-process deployments. No await happens
//! while the lock is held, so the async contract is trivially satisfied.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use chaintask_db::error::{ErrorCode, Result, TaskError};
use chaintask_db::filter::ListOptions;
use chaintask_db::models::{now_epoch, Task, TaskResult, TaskStats, TaskStatus};

use super::TaskStore;

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: Mutex<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Task>>> {
        self.inner
            .lock()
            .map_err(|_| TaskError::new(ErrorCode::StorageFailure, "task store lock poisoned"))
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<Task> {
        let mut tasks = self.lock()?;
        if tasks.contains_key(&task.id) {
            return Err(TaskError::conflict(&task.id));
        }
        let now = now_epoch();
        let mut stored = task.clone();
        stored.created_at = now;
        stored.updated_at = now;
        tasks.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Task> {
        let tasks = self.lock()?;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::not_found(id))
    }

    async fn claim(&self, id: &str) -> Result<Task> {
        let mut tasks = self.lock()?;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::not_found(id))?;

        match task.status {
            TaskStatus::Succeeded => return Err(TaskError::completed(id)),
            TaskStatus::Running => return Err(TaskError::conflict(id)),
            TaskStatus::Pending | TaskStatus::Failed => {}
        }
        if task.attempts >= task.max_retries {
            return Err(TaskError::retries_exhausted(
                id,
                task.attempts,
                task.max_retries,
            ));
        }

        task.status = TaskStatus::Running;
        task.attempts += 1;
        task.last_error.clear();
        task.error_code.clear();
        task.updated_at = task.updated_at.max(now_epoch());
        Ok(task.clone())
    }

    async fn mark_succeeded(&self, id: &str, result: &TaskResult) -> Result<()> {
        let mut tasks = self.lock()?;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::not_found(id))?;

        // Absorb duplicate completions: the first result wins.
        if task.status == TaskStatus::Succeeded {
            return Ok(());
        }

        task.status = TaskStatus::Succeeded;
        task.result = Some(result.clone());
        task.last_error.clear();
        task.error_code.clear();
        task.updated_at = task.updated_at.max(now_epoch());
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        code: ErrorCode,
        message: &str,
        terminal: bool,
    ) -> Result<()> {
        let mut tasks = self.lock()?;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::not_found(id))?;

        task.status = TaskStatus::Failed;
        task.last_error = message.to_owned();
        task.error_code = code.as_str().to_owned();
        task.updated_at = task.updated_at.max(now_epoch());
        debug!(task_id = %id, code = %code, terminal, "task marked failed");
        Ok(())
    }

    async fn list(&self, opts: &ListOptions) -> Result<Vec<Task>> {
        let opts = opts.normalized();
        let tasks = self.lock()?;

        let mut matching: Vec<Task> = tasks.values().filter(|t| opts.matches(t)).cloned().collect();
        matching.sort_by(|a, b| opts.compare(a, b));

        Ok(matching
            .into_iter()
            .skip(opts.offset as usize)
            .take(opts.limit as usize)
            .collect())
    }

    async fn stats(&self, opts: &ListOptions) -> Result<TaskStats> {
        let opts = opts.normalized();
        let tasks = self.lock()?;

        let mut stats = TaskStats::default();
        for task in tasks.values().filter(|t| opts.matches(t)) {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Succeeded => stats.succeeded += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
            if stats.total == 1 {
                stats.oldest_updated_at = task.updated_at;
                stats.newest_updated_at = task.updated_at;
            } else {
                stats.oldest_updated_at = stats.oldest_updated_at.min(task.updated_at);
                stats.newest_updated_at = stats.newest_updated_at.max(task.updated_at);
            }
        }
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
