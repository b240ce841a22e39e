//! PostgreSQL store backend.
//!
//! Claim is a single conditional UPDATE; one affected row means the claim
//! succeeded, zero rows triggers a follow-up read to classify the refusal.
//! The database serialises concurrent claims, so the row-count protocol is
//! the linearisation point.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use chaintask_db::config::DbConfig;
use chaintask_db::error::{ErrorCode, Result, TaskError};
use chaintask_db::filter::ListOptions;
use chaintask_db::models::{now_epoch, Task, TaskResult, TaskStats, TaskStatus};
use chaintask_db::{pool, queries::tasks as db};

use super::TaskStore;

#[derive(Debug, Clone)]
pub struct SqlTaskStore {
    pool: PgPool,
}

impl SqlTaskStore {
    /// Connect using the given config, creating the database when missing
    /// and running pending migrations.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        Ok(Self {
            pool: pool::bootstrap(config).await?,
        })
    }

    /// Wrap an existing pool. Migrations are the caller's responsibility.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for SqlTaskStore {
    async fn create(&self, task: &Task) -> Result<Task> {
        db::insert_task(&self.pool, task, now_epoch()).await
    }

    async fn get(&self, id: &str) -> Result<Task> {
        db::get_task(&self.pool, id)
            .await?
            .ok_or_else(|| TaskError::not_found(id))
    }

    async fn claim(&self, id: &str) -> Result<Task> {
        if let Some(task) = db::claim_task(&self.pool, id, now_epoch()).await? {
            return Ok(task);
        }

        // Zero rows affected: re-read to find out why the claim was refused.
        let task = db::get_task(&self.pool, id)
            .await?
            .ok_or_else(|| TaskError::not_found(id))?;
        match task.status {
            TaskStatus::Succeeded => Err(TaskError::completed(id)),
            TaskStatus::Running => Err(TaskError::conflict(id)),
            TaskStatus::Pending | TaskStatus::Failed => {
                if task.attempts >= task.max_retries {
                    Err(TaskError::retries_exhausted(
                        id,
                        task.attempts,
                        task.max_retries,
                    ))
                } else {
                    // The task became claimable again between the UPDATE and
                    // the read; report the race as a conflict and let the
                    // next delivery pick it up.
                    Err(TaskError::conflict(id))
                }
            }
        }
    }

    async fn mark_succeeded(&self, id: &str, result: &TaskResult) -> Result<()> {
        let rows = db::mark_task_succeeded(&self.pool, id, result, now_epoch()).await?;
        if rows == 1 {
            return Ok(());
        }

        // Zero rows: either the task is gone or it already succeeded (the
        // idempotent no-op case).
        let task = db::get_task(&self.pool, id)
            .await?
            .ok_or_else(|| TaskError::not_found(id))?;
        match task.status {
            TaskStatus::Succeeded => Ok(()),
            _ => Err(TaskError::new(
                ErrorCode::StorageFailure,
                format!("failed to mark task {id} succeeded"),
            )),
        }
    }

    async fn mark_failed(
        &self,
        id: &str,
        code: ErrorCode,
        message: &str,
        terminal: bool,
    ) -> Result<()> {
        let rows =
            db::mark_task_failed(&self.pool, id, code.as_str(), message, now_epoch()).await?;
        if rows == 0 {
            return Err(TaskError::not_found(id));
        }
        debug!(task_id = %id, code = %code, terminal, "task marked failed");
        Ok(())
    }

    async fn list(&self, opts: &ListOptions) -> Result<Vec<Task>> {
        db::list_tasks(&self.pool, &opts.normalized()).await
    }

    async fn stats(&self, opts: &ListOptions) -> Result<TaskStats> {
        db::task_stats(&self.pool, &opts.normalized()).await
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
