use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::Result;

/// Default retry budget assigned at creation when the submitter does not
/// configure one.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Arbitrary caller-supplied metadata, stored verbatim and returned verbatim.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// Whether the status is terminal for external observers
    /// (`succeeded` or `failed`). A `failed` task may still be reclaimed
    /// while retries remain.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Output of a successful (or degraded-success) execution. All fields are
/// free-form strings produced by the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub thought: String,
    pub reply: String,
    pub chain_id: String,
    pub block_number: String,
    pub observations: String,
}

impl TaskResult {
    /// True when every field is empty -- the persisted encoding of
    /// "no result".
    pub fn is_empty(&self) -> bool {
        self.thought.is_empty()
            && self.reply.is_empty()
            && self.chain_id.is_empty()
            && self.block_number.is_empty()
            && self.observations.is_empty()
    }
}

/// The unit of work in the system: one record per submitted goal.
///
/// Timestamps are epoch seconds. `last_error`/`error_code` are empty strings
/// when the task has no recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub chain_action: Option<String>,
    pub address: Option<String>,
    pub metadata: Option<Metadata>,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_retries: i32,
    pub last_error: String,
    pub error_code: String,
    pub result: Option<TaskResult>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// A fresh `pending` task with the default retry budget and zeroed
    /// timestamps (the store stamps them on create).
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            chain_action: None,
            address: None,
            metadata: None,
            status: TaskStatus::Pending,
            attempts: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: String::new(),
            error_code: String::new(),
            result: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// The metadata map rendered as JSON text, or an empty string when
    /// absent. Used by the free-text filter and by the SQL encoding.
    pub fn metadata_text(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok())
            .unwrap_or_default()
    }
}

/// Aggregate view over a filtered set of tasks.
///
/// `oldest_updated_at`/`newest_updated_at` are 0 when `total` is 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub oldest_updated_at: i64,
    pub newest_updated_at: i64,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Flat row image of the `task_states` table.
///
/// `result = None` is encoded as all five `result_*` columns empty;
/// `metadata` is a nullable JSON text column.
#[derive(Debug, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub goal: String,
    pub chain_action: Option<String>,
    pub address: Option<String>,
    pub metadata: Option<String>,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_retries: i32,
    pub last_error: String,
    pub error_code: String,
    pub result_thought: String,
    pub result_reply: String,
    pub result_chain_id: String,
    pub result_block_number: String,
    pub result_observations: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskRow {
    /// Convert a row into the domain entity.
    ///
    /// Invalid JSON in the metadata column surfaces as `STORAGE_FAILURE`.
    pub fn into_task(self) -> Result<Task> {
        let metadata = match self.metadata {
            Some(text) if !text.is_empty() => Some(serde_json::from_str::<Metadata>(&text)?),
            _ => None,
        };

        let result = TaskResult {
            thought: self.result_thought,
            reply: self.result_reply,
            chain_id: self.result_chain_id,
            block_number: self.result_block_number,
            observations: self.result_observations,
        };
        let result = if result.is_empty() { None } else { Some(result) };

        Ok(Task {
            id: self.id,
            goal: self.goal,
            chain_action: self.chain_action,
            address: self.address,
            metadata,
            status: self.status,
            attempts: self.attempts,
            max_retries: self.max_retries,
            last_error: self.last_error,
            error_code: self.error_code,
            result,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Current wall-clock time as epoch seconds.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("checking".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn empty_result_encodes_as_none() {
        let row = TaskRow {
            id: "t-1".into(),
            goal: "check balance".into(),
            chain_action: None,
            address: None,
            metadata: None,
            status: TaskStatus::Pending,
            attempts: 0,
            max_retries: 3,
            last_error: String::new(),
            error_code: String::new(),
            result_thought: String::new(),
            result_reply: String::new(),
            result_chain_id: String::new(),
            result_block_number: String::new(),
            result_observations: String::new(),
            created_at: 100,
            updated_at: 100,
        };
        let task = row.into_task().unwrap();
        assert!(task.result.is_none());
    }

    #[test]
    fn invalid_metadata_json_is_a_storage_failure() {
        use crate::error::ErrorCode;

        let row = TaskRow {
            id: "t-1".into(),
            goal: "g".into(),
            chain_action: None,
            address: None,
            metadata: Some("{not json".into()),
            status: TaskStatus::Pending,
            attempts: 0,
            max_retries: 3,
            last_error: String::new(),
            error_code: String::new(),
            result_thought: String::new(),
            result_reply: String::new(),
            result_chain_id: String::new(),
            result_block_number: String::new(),
            result_observations: String::new(),
            created_at: 100,
            updated_at: 100,
        };
        let err = row.into_task().unwrap_err();
        assert_eq!(err, ErrorCode::StorageFailure);
    }

    #[test]
    fn metadata_text_renders_json() {
        let mut task = Task::new("t-1", "g");
        assert_eq!(task.metadata_text(), "");

        let mut meta = Metadata::new();
        meta.insert("chain".into(), serde_json::json!("sepolia"));
        task.metadata = Some(meta);
        assert_eq!(task.metadata_text(), r#"{"chain":"sepolia"}"#);
    }
}
