//! Contract tests for the in-memory store backend: claim classification,
//! idempotent completion, mutual exclusion, and the filter/paging surface.

use std::sync::Arc;

use chaintask_core::store::{MemoryTaskStore, TaskStore};
use chaintask_core::{ErrorCode, ListOptions, Order, Task, TaskResult, TaskStatus};

fn fixture(id: &str) -> Task {
    Task::new(id, format!("goal for {id}"))
}

#[tokio::test]
async fn create_get_roundtrip_and_conflict() {
    let store = MemoryTaskStore::new();

    let stored = store.create(&fixture("t-1")).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.attempts, 0);
    assert!(stored.created_at > 0);
    assert_eq!(stored.created_at, stored.updated_at);

    let fetched = store.get("t-1").await.unwrap();
    assert_eq!(fetched, stored);

    let err = store.create(&fixture("t-1")).await.unwrap_err();
    assert_eq!(err, ErrorCode::TaskConflict);

    let err = store.get("missing").await.unwrap_err();
    assert_eq!(err, ErrorCode::TaskNotFound);
}

#[tokio::test]
async fn returned_tasks_are_defensive_copies() {
    let store = MemoryTaskStore::new();
    store.create(&fixture("t-1")).await.unwrap();

    let mut copy = store.get("t-1").await.unwrap();
    copy.goal = "mutated by caller".into();

    assert_eq!(store.get("t-1").await.unwrap().goal, "goal for t-1");
}

#[tokio::test]
async fn claim_classification() {
    let store = MemoryTaskStore::new();

    // Missing task.
    assert_eq!(
        store.claim("missing").await.unwrap_err(),
        ErrorCode::TaskNotFound
    );

    let mut task = fixture("t-1");
    task.max_retries = 1;
    store.create(&task).await.unwrap();

    // First claim wins.
    let claimed = store.claim("t-1").await.unwrap();
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.attempts, 1);

    // A racing claim of the running task conflicts.
    assert_eq!(
        store.claim("t-1").await.unwrap_err(),
        ErrorCode::TaskConflict
    );

    // After a failure the budget is spent.
    store
        .mark_failed("t-1", ErrorCode::TaskProcessingFailed, "boom", true)
        .await
        .unwrap();
    assert_eq!(
        store.claim("t-1").await.unwrap_err(),
        ErrorCode::TaskRetriesExhausted
    );

    // A completed task reports completion, not conflict.
    let store = MemoryTaskStore::new();
    store.create(&fixture("t-2")).await.unwrap();
    store.claim("t-2").await.unwrap();
    store
        .mark_succeeded("t-2", &TaskResult::default())
        .await
        .unwrap();
    assert_eq!(
        store.claim("t-2").await.unwrap_err(),
        ErrorCode::TaskCompleted
    );
}

#[tokio::test]
async fn claim_clears_previous_error_fields() {
    let store = MemoryTaskStore::new();
    store.create(&fixture("t-1")).await.unwrap();

    store.claim("t-1").await.unwrap();
    store
        .mark_failed("t-1", ErrorCode::TaskProcessingFailed, "boom", false)
        .await
        .unwrap();

    let failed = store.get("t-1").await.unwrap();
    assert_eq!(failed.last_error, "boom");
    assert_eq!(failed.error_code, "TASK_PROCESSING_FAILED");

    let reclaimed = store.claim("t-1").await.unwrap();
    assert_eq!(reclaimed.last_error, "");
    assert_eq!(reclaimed.error_code, "");
    assert_eq!(reclaimed.attempts, 2);
}

#[tokio::test]
async fn concurrent_claims_are_mutually_exclusive() {
    let store = Arc::new(MemoryTaskStore::new());
    store.create(&fixture("t-1")).await.unwrap();

    let mut joins = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        joins.push(tokio::spawn(async move { store.claim("t-1").await }));
    }

    let mut wins = 0;
    for join in joins {
        if join.await.unwrap().is_ok() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "exactly one concurrent claim may succeed");

    let task = store.get("t-1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.attempts, 1);
}

#[tokio::test]
async fn mark_succeeded_is_idempotent() {
    let store = MemoryTaskStore::new();
    store.create(&fixture("t-1")).await.unwrap();
    store.claim("t-1").await.unwrap();

    let first = TaskResult {
        reply: "ok".into(),
        ..Default::default()
    };
    store.mark_succeeded("t-1", &first).await.unwrap();

    let after_first = store.get("t-1").await.unwrap();

    let duplicate = TaskResult {
        reply: "late duplicate".into(),
        ..Default::default()
    };
    store.mark_succeeded("t-1", &duplicate).await.unwrap();

    let after_second = store.get("t-1").await.unwrap();
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.result.unwrap().reply, "ok");
}

#[tokio::test]
async fn mark_failed_records_code_and_message() {
    let store = MemoryTaskStore::new();
    store.create(&fixture("t-1")).await.unwrap();
    store.claim("t-1").await.unwrap();

    store
        .mark_failed("t-1", ErrorCode::TaskPublishFailed, "queue down", true)
        .await
        .unwrap();

    let task = store.get("t-1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_code, "TASK_PUBLISH_FAILED");
    assert_eq!(task.last_error, "queue down");

    assert_eq!(
        store
            .mark_failed("missing", ErrorCode::TaskProcessingFailed, "x", false)
            .await
            .unwrap_err(),
        ErrorCode::TaskNotFound
    );
}

/// Scenario: three tasks settled as {pending, failed, succeeded} in that
/// order; filtered, ordered, paged. The failed task settles before the
/// succeeded one, so newest-first ordering (with the id tie-break for
/// same-second updates) is deterministic.
#[tokio::test]
async fn list_and_stats_follow_the_filter_contract() {
    let store = MemoryTaskStore::new();

    for (id, status) in [
        ("t-pending", TaskStatus::Pending),
        ("t-failed", TaskStatus::Failed),
        ("t-succeeded", TaskStatus::Succeeded),
    ] {
        store.create(&fixture(id)).await.unwrap();
        match status {
            TaskStatus::Failed => {
                store.claim(id).await.unwrap();
                store
                    .mark_failed(id, ErrorCode::TaskProcessingFailed, "boom", false)
                    .await
                    .unwrap();
            }
            TaskStatus::Succeeded => {
                store.claim(id).await.unwrap();
                let result = TaskResult {
                    reply: "done".into(),
                    ..Default::default()
                };
                store.mark_succeeded(id, &result).await.unwrap();
            }
            _ => {}
        }
    }

    let filter = ListOptions::new()
        .with_statuses([TaskStatus::Failed, TaskStatus::Succeeded])
        .with_page(1, 0);

    let page = store.list(&filter).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "t-succeeded");

    let page = store.list(&filter.clone().with_page(1, 1)).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "t-failed");

    let page = store.list(&filter.clone().with_page(1, 2)).await.unwrap();
    assert!(page.is_empty());

    let stats = store.stats(&filter).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);

    // P5: stats.total equals an unpaged list's length.
    let everything = ListOptions::new();
    let all = store
        .list(&everything.clone().with_page(100, 0))
        .await
        .unwrap();
    assert_eq!(store.stats(&everything).await.unwrap().total as usize, all.len());

    // Paging walks each row exactly once.
    let mut seen = Vec::new();
    for offset in 0..3 {
        for task in store
            .list(&ListOptions::new().with_page(1, offset))
            .await
            .unwrap()
        {
            seen.push(task.id);
        }
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3);

    let empty = store
        .list(&ListOptions::new().with_page(1, 3))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn list_order_is_deterministic_for_equal_timestamps() {
    let store = MemoryTaskStore::new();
    // Created within the same second: ties break on id.
    for id in ["b", "a", "c"] {
        store.create(&fixture(id)).await.unwrap();
    }

    let desc = store.list(&ListOptions::new()).await.unwrap();
    let asc = store
        .list(&ListOptions::new().with_order(Order::UpdatedAsc))
        .await
        .unwrap();

    let desc_ids: Vec<&str> = desc.iter().map(|t| t.id.as_str()).collect();
    let asc_ids: Vec<&str> = asc.iter().map(|t| t.id.as_str()).collect();
    let mut reversed = asc_ids.clone();
    reversed.reverse();
    assert_eq!(desc_ids, reversed);
}

#[tokio::test]
async fn close_is_idempotent() {
    let store = MemoryTaskStore::new();
    store.close().await.unwrap();
    store.close().await.unwrap();
}
