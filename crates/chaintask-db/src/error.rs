//! Typed error taxonomy.
//!
//! Every failure in the system is classified to an [`ErrorCode`]. Each code
//! carries three attributes (severity, retryable, alert) from an immutable
//! table compiled into the enum; call sites may override any of the three on
//! a per-error basis via [`TaskError::with_retryable`] and friends.
//!
//! Errors compare equal by code, so call sites can match without inspecting
//! messages:
//!
//! ```
//! use chaintask_db::error::{ErrorCode, TaskError};
//!
//! let err = TaskError::not_found("t-1");
//! assert_eq!(err, ErrorCode::TaskNotFound);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Convenience alias used throughout the workspace.
pub type Result<T, E = TaskError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Codes and attributes
// ---------------------------------------------------------------------------

/// Severity attached to an error code (and to the alert events derived from
/// it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The closed set of error codes the system emits.
///
/// The string form is the SCREAMING_SNAKE_CASE name (`TASK_NOT_FOUND`, ...),
/// which is what gets persisted in the `error_code` column and shipped in
/// alert payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TaskNotFound,
    TaskConflict,
    TaskCompleted,
    TaskRetriesExhausted,
    TaskValidationFailed,
    TaskPublishFailed,
    TaskProcessingFailed,
    TaskCompensationFailed,
    InvalidArgument,
    NotFound,
    InitializationFailure,
    StorageFailure,
    Timeout,
}

/// Default attributes for a code. Immutable after compile; per-error
/// overrides are carried on the [`TaskError`] value instead.
#[derive(Debug, Clone, Copy)]
struct Attrs {
    severity: Severity,
    retryable: bool,
    alert: bool,
}

impl ErrorCode {
    /// The canonical string form of the code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::TaskConflict => "TASK_CONFLICT",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::TaskRetriesExhausted => "TASK_RETRIES_EXHAUSTED",
            Self::TaskValidationFailed => "TASK_VALIDATION_FAILED",
            Self::TaskPublishFailed => "TASK_PUBLISH_FAILED",
            Self::TaskProcessingFailed => "TASK_PROCESSING_FAILED",
            Self::TaskCompensationFailed => "TASK_COMPENSATION_FAILED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::InitializationFailure => "INITIALIZATION_FAILURE",
            Self::StorageFailure => "STORAGE_FAILURE",
            Self::Timeout => "TIMEOUT",
        }
    }

    const fn attrs(self) -> Attrs {
        match self {
            Self::TaskNotFound => Attrs {
                severity: Severity::Warning,
                retryable: false,
                alert: false,
            },
            Self::TaskConflict => Attrs {
                severity: Severity::Warning,
                retryable: false,
                alert: false,
            },
            Self::TaskCompleted => Attrs {
                severity: Severity::Info,
                retryable: false,
                alert: false,
            },
            Self::TaskRetriesExhausted => Attrs {
                severity: Severity::Critical,
                retryable: false,
                alert: true,
            },
            Self::TaskValidationFailed => Attrs {
                severity: Severity::Warning,
                retryable: false,
                alert: false,
            },
            Self::TaskPublishFailed => Attrs {
                severity: Severity::Critical,
                retryable: true,
                alert: true,
            },
            Self::TaskProcessingFailed => Attrs {
                severity: Severity::Warning,
                retryable: true,
                alert: true,
            },
            Self::TaskCompensationFailed => Attrs {
                severity: Severity::Critical,
                retryable: false,
                alert: true,
            },
            Self::InvalidArgument => Attrs {
                severity: Severity::Warning,
                retryable: false,
                alert: false,
            },
            Self::NotFound => Attrs {
                severity: Severity::Warning,
                retryable: false,
                alert: false,
            },
            Self::InitializationFailure => Attrs {
                severity: Severity::Critical,
                retryable: false,
                alert: true,
            },
            Self::StorageFailure => Attrs {
                severity: Severity::Critical,
                retryable: true,
                alert: true,
            },
            Self::Timeout => Attrs {
                severity: Severity::Warning,
                retryable: true,
                alert: false,
            },
        }
    }

    /// Default severity for this code.
    pub const fn severity(self) -> Severity {
        self.attrs().severity
    }

    /// Whether errors with this code permit another claim (up to
    /// `max_retries`) by default.
    pub const fn retryable(self) -> bool {
        self.attrs().retryable
    }

    /// Whether errors with this code produce an alert event by default.
    pub const fn alert(self) -> bool {
        self.attrs().alert
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ErrorCodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TASK_NOT_FOUND" => Ok(Self::TaskNotFound),
            "TASK_CONFLICT" => Ok(Self::TaskConflict),
            "TASK_COMPLETED" => Ok(Self::TaskCompleted),
            "TASK_RETRIES_EXHAUSTED" => Ok(Self::TaskRetriesExhausted),
            "TASK_VALIDATION_FAILED" => Ok(Self::TaskValidationFailed),
            "TASK_PUBLISH_FAILED" => Ok(Self::TaskPublishFailed),
            "TASK_PROCESSING_FAILED" => Ok(Self::TaskProcessingFailed),
            "TASK_COMPENSATION_FAILED" => Ok(Self::TaskCompensationFailed),
            "INVALID_ARGUMENT" => Ok(Self::InvalidArgument),
            "NOT_FOUND" => Ok(Self::NotFound),
            "INITIALIZATION_FAILURE" => Ok(Self::InitializationFailure),
            "STORAGE_FAILURE" => Ok(Self::StorageFailure),
            "TIMEOUT" => Ok(Self::Timeout),
            other => Err(ErrorCodeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ErrorCode`] string.
#[derive(Debug, Clone)]
pub struct ErrorCodeParseError(pub String);

impl fmt::Display for ErrorCodeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {:?}", self.0)
    }
}

impl std::error::Error for ErrorCodeParseError {}

// ---------------------------------------------------------------------------
// The error value
// ---------------------------------------------------------------------------

/// A classified error: code, human message, optional cause, and optional
/// per-value attribute overrides.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TaskError {
    code: ErrorCode,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    retryable: Option<bool>,
    alert: Option<bool>,
    severity: Option<Severity>,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            retryable: None,
            alert: None,
            severity: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Override the retryable attribute for this error value only.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Override the alert attribute for this error value only.
    pub fn with_alert(mut self, alert: bool) -> Self {
        self.alert = Some(alert);
        self
    }

    /// Override the severity for this error value only.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Resolved retryable attribute (per-value override, else the code's).
    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or_else(|| self.code.retryable())
    }

    /// Resolved alert attribute (per-value override, else the code's).
    pub fn should_alert(&self) -> bool {
        self.alert.unwrap_or_else(|| self.code.alert())
    }

    /// Resolved severity (per-value override, else the code's).
    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or_else(|| self.code.severity())
    }

    // Constructors for the store-level outcomes that call sites match on.

    pub fn not_found(id: &str) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("task {id} not found"))
    }

    pub fn conflict(id: &str) -> Self {
        Self::new(
            ErrorCode::TaskConflict,
            format!("task {id} already exists or is already running"),
        )
    }

    pub fn completed(id: &str) -> Self {
        Self::new(
            ErrorCode::TaskCompleted,
            format!("task {id} already succeeded"),
        )
    }

    pub fn retries_exhausted(id: &str, attempts: i32, max_retries: i32) -> Self {
        Self::new(
            ErrorCode::TaskRetriesExhausted,
            format!("task {id} exhausted retries ({attempts}/{max_retries})"),
        )
    }
}

impl PartialEq<ErrorCode> for TaskError {
    fn eq(&self, other: &ErrorCode) -> bool {
        self.code == *other
    }
}

impl PartialEq<TaskError> for ErrorCode {
    fn eq(&self, other: &TaskError) -> bool {
        *self == other.code
    }
}

impl From<sqlx::Error> for TaskError {
    fn from(e: sqlx::Error) -> Self {
        TaskError::new(ErrorCode::StorageFailure, "database operation failed").with_source(e)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::new(ErrorCode::StorageFailure, "invalid JSON in stored field").with_source(e)
    }
}
