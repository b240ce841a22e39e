//! Composable list/stats options.
//!
//! The same options value drives both backends: the in-memory store applies
//! [`ListOptions::matches`] and [`ListOptions::compare`] directly, the SQL
//! store renders the equivalent WHERE/ORDER BY clauses. Keeping the
//! predicate in one place is what makes the two backends agree.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::{Task, TaskStatus};

/// Limit applied when the caller does not set one (or sets it to 0).
pub const DEFAULT_LIMIT: i64 = 20;

/// Hard ceiling on page size.
pub const MAX_LIMIT: i64 = 100;

/// Result ordering. Primary key is `updated_at`; ties break on `created_at`
/// then `id`, all in the same direction, so paging is deterministic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    #[default]
    UpdatedDesc,
    UpdatedAsc,
}

/// Filter, ordering, and paging options for `list` and `stats`.
///
/// Zero values mean "unbounded": an empty status set matches every status,
/// a zero time bound is open, an empty query matches everything. `stats`
/// applies the filter but ignores `limit`/`offset`/`order`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Statuses to include; empty means all.
    pub statuses: Vec<TaskStatus>,
    /// Inclusive lower bound on `updated_at` (epoch seconds, 0 = unbounded).
    pub updated_since: i64,
    /// Inclusive upper bound on `updated_at` (epoch seconds, 0 = unbounded).
    pub updated_until: i64,
    /// `Some(true)` keeps only tasks with a result, `Some(false)` only tasks
    /// without one, `None` both.
    pub has_result: Option<bool>,
    /// Case-sensitive substring match across id, goal, chain_action,
    /// address, metadata (as JSON text), last_error, and every result field.
    pub query: String,
    /// Page size; normalised into `[1, MAX_LIMIT]` with [`DEFAULT_LIMIT`]
    /// for unset/zero values.
    pub limit: i64,
    /// Rows to skip; negative values normalise to 0.
    pub offset: i64,
    pub order: Order,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(mut self, statuses: impl Into<Vec<TaskStatus>>) -> Self {
        self.statuses = statuses.into();
        self
    }

    pub fn with_updated_between(mut self, since: i64, until: i64) -> Self {
        self.updated_since = since;
        self.updated_until = until;
        self
    }

    pub fn with_has_result(mut self, has_result: bool) -> Self {
        self.has_result = Some(has_result);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// A copy with limit and offset clamped to their documented ranges.
    pub fn normalized(&self) -> Self {
        let mut opts = self.clone();
        if opts.limit <= 0 {
            opts.limit = DEFAULT_LIMIT;
        } else if opts.limit > MAX_LIMIT {
            opts.limit = MAX_LIMIT;
        }
        if opts.offset < 0 {
            opts.offset = 0;
        }
        opts
    }

    /// The filter predicate (status set, time window, result presence,
    /// free-text query). Paging and ordering are not part of the predicate.
    pub fn matches(&self, task: &Task) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if self.updated_since > 0 && task.updated_at < self.updated_since {
            return false;
        }
        if self.updated_until > 0 && task.updated_at > self.updated_until {
            return false;
        }
        if let Some(wants_result) = self.has_result {
            if task.result.is_some() != wants_result {
                return false;
            }
        }
        if !self.query.is_empty() && !self.query_matches(task) {
            return false;
        }
        true
    }

    fn query_matches(&self, task: &Task) -> bool {
        let q = self.query.as_str();
        task.id.contains(q)
            || task.goal.contains(q)
            || task.chain_action.as_deref().is_some_and(|s| s.contains(q))
            || task.address.as_deref().is_some_and(|s| s.contains(q))
            || task.metadata_text().contains(q)
            || task.last_error.contains(q)
            || task.result.as_ref().is_some_and(|r| {
                r.thought.contains(q)
                    || r.reply.contains(q)
                    || r.chain_id.contains(q)
                    || r.block_number.contains(q)
                    || r.observations.contains(q)
            })
    }

    /// Total order used for listing: `updated_at`, then `created_at`, then
    /// `id`, in the configured direction.
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        let ascending = a
            .updated_at
            .cmp(&b.updated_at)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id));
        match self.order {
            Order::UpdatedAsc => ascending,
            Order::UpdatedDesc => ascending.reverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskResult;

    fn task(id: &str, status: TaskStatus, updated_at: i64) -> Task {
        let mut t = Task::new(id, format!("goal for {id}"));
        t.status = status;
        t.created_at = updated_at;
        t.updated_at = updated_at;
        t
    }

    #[test]
    fn normalization_clamps_limit_and_offset() {
        let opts = ListOptions::new().with_page(0, -5).normalized();
        assert_eq!(opts.limit, DEFAULT_LIMIT);
        assert_eq!(opts.offset, 0);

        let opts = ListOptions::new().with_page(500, 3).normalized();
        assert_eq!(opts.limit, MAX_LIMIT);
        assert_eq!(opts.offset, 3);

        let opts = ListOptions::new().with_page(7, 2).normalized();
        assert_eq!(opts.limit, 7);
        assert_eq!(opts.offset, 2);
    }

    #[test]
    fn empty_status_set_matches_all() {
        let opts = ListOptions::new();
        assert!(opts.matches(&task("a", TaskStatus::Pending, 10)));
        assert!(opts.matches(&task("b", TaskStatus::Failed, 10)));
    }

    #[test]
    fn status_set_filters() {
        let opts =
            ListOptions::new().with_statuses([TaskStatus::Failed, TaskStatus::Succeeded]);
        assert!(!opts.matches(&task("a", TaskStatus::Pending, 10)));
        assert!(opts.matches(&task("b", TaskStatus::Failed, 10)));
    }

    #[test]
    fn time_window_is_inclusive() {
        let opts = ListOptions::new().with_updated_between(100, 200);
        assert!(!opts.matches(&task("a", TaskStatus::Pending, 99)));
        assert!(opts.matches(&task("b", TaskStatus::Pending, 100)));
        assert!(opts.matches(&task("c", TaskStatus::Pending, 200)));
        assert!(!opts.matches(&task("d", TaskStatus::Pending, 201)));
    }

    #[test]
    fn zero_bounds_are_open() {
        let opts = ListOptions::new().with_updated_between(0, 0);
        assert!(opts.matches(&task("a", TaskStatus::Pending, 1)));
        assert!(opts.matches(&task("b", TaskStatus::Pending, i64::MAX)));
    }

    #[test]
    fn has_result_tri_state() {
        let mut with_result = task("a", TaskStatus::Succeeded, 10);
        with_result.result = Some(TaskResult {
            reply: "ok".into(),
            ..Default::default()
        });
        let without = task("b", TaskStatus::Pending, 10);

        let any = ListOptions::new();
        assert!(any.matches(&with_result) && any.matches(&without));

        let only_with = ListOptions::new().with_has_result(true);
        assert!(only_with.matches(&with_result));
        assert!(!only_with.matches(&without));

        let only_without = ListOptions::new().with_has_result(false);
        assert!(!only_without.matches(&with_result));
        assert!(only_without.matches(&without));
    }

    #[test]
    fn free_text_query_spans_fields() {
        let mut t = task("task-7", TaskStatus::Failed, 10);
        t.chain_action = Some("eth_getBalance".into());
        t.last_error = "rpc timeout".into();
        let mut meta = crate::models::Metadata::new();
        meta.insert("tenant".into(), serde_json::json!("acme"));
        t.metadata = Some(meta);
        t.result = Some(TaskResult {
            observations: "degraded: upstream".into(),
            ..Default::default()
        });

        for needle in ["task-7", "goal for", "getBalance", "acme", "rpc timeout", "degraded"] {
            let opts = ListOptions::new().with_query(needle);
            assert!(opts.matches(&t), "expected match on {needle:?}");
        }

        let opts = ListOptions::new().with_query("absent");
        assert!(!opts.matches(&t));

        // Case-sensitive by contract.
        let opts = ListOptions::new().with_query("GETBALANCE");
        assert!(!opts.matches(&t));
    }

    #[test]
    fn compare_breaks_ties_deterministically() {
        let a = task("a", TaskStatus::Pending, 100);
        let b = task("b", TaskStatus::Pending, 100);
        let newer = task("c", TaskStatus::Pending, 200);

        let desc = ListOptions::new();
        assert_eq!(desc.compare(&newer, &a), Ordering::Less);
        assert_eq!(desc.compare(&a, &b), Ordering::Greater);

        let asc = ListOptions::new().with_order(Order::UpdatedAsc);
        assert_eq!(asc.compare(&a, &newer), Ordering::Less);
        assert_eq!(asc.compare(&a, &b), Ordering::Less);
    }
}
