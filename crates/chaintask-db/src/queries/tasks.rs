//! Database query functions for the `task_states` table.
//!
//! These are mechanical row operations; claim classification and retry
//! policy live in `chaintask-core`. Every state-changing statement bumps
//! `updated_at` with `GREATEST(updated_at, $now)` so the per-task
//! monotonicity invariant survives clock hiccups.

use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{Result, TaskError};
use crate::filter::{ListOptions, Order};
use crate::models::{Task, TaskResult, TaskRow, TaskStats};

/// Insert a new task row with `created_at = updated_at = now`.
///
/// Returns the stored row. A primary-key collision maps to `TASK_CONFLICT`.
pub async fn insert_task(pool: &PgPool, task: &Task, now: i64) -> Result<Task> {
    let metadata = match &task.metadata {
        Some(map) => Some(serde_json::to_string(map)?),
        None => None,
    };
    let result = task.result.clone().unwrap_or_default();

    let row = sqlx::query_as::<_, TaskRow>(
        "INSERT INTO task_states \
           (id, goal, chain_action, address, metadata, status, attempts, max_retries, \
            last_error, error_code, result_thought, result_reply, result_chain_id, \
            result_block_number, result_observations, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $16) \
         RETURNING *",
    )
    .bind(&task.id)
    .bind(&task.goal)
    .bind(&task.chain_action)
    .bind(&task.address)
    .bind(&metadata)
    .bind(task.status)
    .bind(task.attempts)
    .bind(task.max_retries)
    .bind(&task.last_error)
    .bind(&task.error_code)
    .bind(&result.thought)
    .bind(&result.reply)
    .bind(&result.chain_id)
    .bind(&result.block_number)
    .bind(&result.observations)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
            TaskError::conflict(&task.id).with_source(e)
        } else {
            TaskError::from(e)
        }
    })?;

    row.into_task()
}

/// Fetch a single task by id.
pub async fn get_task(pool: &PgPool, id: &str) -> Result<Option<Task>> {
    let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM task_states WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(TaskRow::into_task).transpose()
}

/// Atomically claim a task for execution.
///
/// The WHERE clause is the whole claim contract: only `pending`/`failed`
/// tasks with retry budget left transition to `running`. One affected row
/// means the claim succeeded and the returned snapshot is authoritative;
/// zero rows means the caller must re-read to find out why.
pub async fn claim_task(pool: &PgPool, id: &str, now: i64) -> Result<Option<Task>> {
    let row = sqlx::query_as::<_, TaskRow>(
        "UPDATE task_states \
         SET status = 'running', \
             attempts = attempts + 1, \
             last_error = '', \
             error_code = '', \
             updated_at = GREATEST(updated_at, $2) \
         WHERE id = $1 \
           AND status IN ('pending', 'failed') \
           AND attempts < max_retries \
         RETURNING *",
    )
    .bind(id)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    row.map(TaskRow::into_task).transpose()
}

/// Record a successful execution.
///
/// The `status <> 'succeeded'` guard keeps completion idempotent: a
/// duplicate call leaves the first result in place. Returns the number of
/// rows affected (0 = task missing or already succeeded).
pub async fn mark_task_succeeded(
    pool: &PgPool,
    id: &str,
    result: &TaskResult,
    now: i64,
) -> Result<u64> {
    let outcome = sqlx::query(
        "UPDATE task_states \
         SET status = 'succeeded', \
             result_thought = $2, \
             result_reply = $3, \
             result_chain_id = $4, \
             result_block_number = $5, \
             result_observations = $6, \
             last_error = '', \
             error_code = '', \
             updated_at = GREATEST(updated_at, $7) \
         WHERE id = $1 AND status <> 'succeeded'",
    )
    .bind(id)
    .bind(&result.thought)
    .bind(&result.reply)
    .bind(&result.chain_id)
    .bind(&result.block_number)
    .bind(&result.observations)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected())
}

/// Record a failed execution. Returns the number of rows affected
/// (0 = task missing).
///
/// The caller's `terminal` flag is advisory and not persisted; exhaustion
/// is always derived from `attempts` vs `max_retries`.
pub async fn mark_task_failed(
    pool: &PgPool,
    id: &str,
    error_code: &str,
    message: &str,
    now: i64,
) -> Result<u64> {
    let outcome = sqlx::query(
        "UPDATE task_states \
         SET status = 'failed', \
             last_error = $2, \
             error_code = $3, \
             updated_at = GREATEST(updated_at, $4) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(message)
    .bind(error_code)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected())
}

/// Render the [`ListOptions`] predicate as SQL. Must stay in lockstep with
/// [`ListOptions::matches`].
fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, opts: &'a ListOptions) {
    qb.push(" WHERE TRUE");

    if !opts.statuses.is_empty() {
        let statuses: Vec<String> = opts.statuses.iter().map(|s| s.to_string()).collect();
        qb.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
    if opts.updated_since > 0 {
        qb.push(" AND updated_at >= ").push_bind(opts.updated_since);
    }
    if opts.updated_until > 0 {
        qb.push(" AND updated_at <= ").push_bind(opts.updated_until);
    }
    match opts.has_result {
        Some(true) => {
            qb.push(
                " AND (result_thought <> '' OR result_reply <> '' OR result_chain_id <> '' \
                 OR result_block_number <> '' OR result_observations <> '')",
            );
        }
        Some(false) => {
            qb.push(
                " AND result_thought = '' AND result_reply = '' AND result_chain_id = '' \
                 AND result_block_number = '' AND result_observations = ''",
            );
        }
        None => {}
    }
    if !opts.query.is_empty() {
        let columns = [
            "id",
            "goal",
            "COALESCE(chain_action, '')",
            "COALESCE(address, '')",
            "COALESCE(metadata, '')",
            "last_error",
            "result_thought",
            "result_reply",
            "result_chain_id",
            "result_block_number",
            "result_observations",
        ];
        qb.push(" AND (");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("strpos(")
                .push(column)
                .push(", ")
                .push_bind(opts.query.as_str())
                .push(") > 0");
        }
        qb.push(")");
    }
}

/// List tasks matching the options, ordered and paged.
///
/// The caller is expected to pass normalised options (the store layer does
/// this); limit and offset are applied as-is.
pub async fn list_tasks(pool: &PgPool, opts: &ListOptions) -> Result<Vec<Task>> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM task_states");
    push_filters(&mut qb, opts);

    match opts.order {
        Order::UpdatedDesc => qb.push(" ORDER BY updated_at DESC, created_at DESC, id DESC"),
        Order::UpdatedAsc => qb.push(" ORDER BY updated_at ASC, created_at ASC, id ASC"),
    };
    qb.push(" LIMIT ").push_bind(opts.limit);
    qb.push(" OFFSET ").push_bind(opts.offset);

    let rows: Vec<TaskRow> = qb.build_query_as().fetch_all(pool).await?;
    rows.into_iter().map(TaskRow::into_task).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    total: i64,
    pending: i64,
    running: i64,
    succeeded: i64,
    failed: i64,
    oldest_updated_at: i64,
    newest_updated_at: i64,
}

/// Aggregate counts over the same predicate as [`list_tasks`], ignoring
/// paging and ordering.
pub async fn task_stats(pool: &PgPool, opts: &ListOptions) -> Result<TaskStats> {
    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*) AS total, \
         COUNT(*) FILTER (WHERE status = 'pending') AS pending, \
         COUNT(*) FILTER (WHERE status = 'running') AS running, \
         COUNT(*) FILTER (WHERE status = 'succeeded') AS succeeded, \
         COUNT(*) FILTER (WHERE status = 'failed') AS failed, \
         COALESCE(MIN(updated_at), 0) AS oldest_updated_at, \
         COALESCE(MAX(updated_at), 0) AS newest_updated_at \
         FROM task_states",
    );
    push_filters(&mut qb, opts);

    let row: StatsRow = qb.build_query_as().fetch_one(pool).await?;
    Ok(TaskStats {
        total: row.total,
        pending: row.pending,
        running: row.running,
        succeeded: row.succeeded,
        failed: row.failed,
        oldest_updated_at: row.oldest_updated_at,
        newest_updated_at: row.newest_updated_at,
    })
}
