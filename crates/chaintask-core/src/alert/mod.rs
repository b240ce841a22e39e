//! Alert fan-out for terminal and degraded task events.
//!
//! Events are emitted after the corresponding state transition is
//! persisted, and alerting never blocks task progress: the processor logs
//! dispatcher failures and moves on.

mod notifiers;

pub use notifiers::{ChatNotifier, LogNotifier, WebhookNotifier};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use chaintask_db::error::{ErrorCode, Result, Severity, TaskError};
use chaintask_db::models::Metadata;

/// A terminal, degraded, or otherwise alert-worthy task event.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    /// Which branch of the processor emitted this: `terminal`,
    /// `non_retryable`, `degraded`, `compensate`, or `claim`.
    pub stage: String,
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub task_id: String,
    pub attempts: i32,
    pub max_retries: i32,
    pub metadata: Option<Metadata>,
    /// Epoch seconds at emission time.
    pub timestamp: i64,
}

/// A single delivery channel (log line, webhook, chat message, ...).
///
/// Implementations that are unconfigured (missing destination) should log
/// a warning and return `Ok` rather than fail the fan-out.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs and joined error messages.
    fn channel(&self) -> &str;

    async fn send(&self, event: &AlertEvent) -> Result<()>;
}

// Compile-time assertion: notifiers are stored as trait objects.
const _: () = {
    fn _assert_object_safe(_: &dyn Notifier) {}
};

/// Fans one event out to every configured notifier.
///
/// A failing notifier never prevents delivery to the others; failures are
/// logged and joined into a single error (first failure's code, all
/// messages).
#[derive(Default)]
pub struct AlertDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Deliver the event to every notifier, sequentially.
    pub async fn notify(&self, event: &AlertEvent) -> Result<()> {
        let mut first_code = None;
        let mut failures = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.send(event).await {
                warn!(channel = notifier.channel(), error = %e, "notifier failed");
                first_code.get_or_insert(e.code());
                failures.push(format!("{}: {e}", notifier.channel()));
            }
        }
        match first_code {
            None => Ok(()),
            Some(code) => Err(TaskError::new(code, failures.join("; "))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> AlertEvent {
        AlertEvent {
            stage: "terminal".into(),
            code: ErrorCode::TaskProcessingFailed,
            message: "boom".into(),
            severity: Severity::Warning,
            task_id: "t-1".into(),
            attempts: 2,
            max_retries: 2,
            metadata: None,
            timestamp: 1_700_000_000,
        }
    }

    struct CountingNotifier {
        name: &'static str,
        fail: bool,
        sent: AtomicUsize,
    }

    impl CountingNotifier {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                sent: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        fn channel(&self) -> &str {
            self.name
        }

        async fn send(&self, _event: &AlertEvent) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TaskError::new(ErrorCode::Timeout, "unreachable"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_dispatcher_is_a_no_op() {
        let dispatcher = AlertDispatcher::new();
        dispatcher.notify(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn one_failure_does_not_block_other_channels() {
        let failing = CountingNotifier::new("chat", true);
        let healthy = CountingNotifier::new("webhook", false);
        let dispatcher = AlertDispatcher::new()
            .with_notifier(failing.clone())
            .with_notifier(healthy.clone());

        let err = dispatcher.notify(&event()).await.unwrap_err();
        assert_eq!(err, ErrorCode::Timeout);
        assert!(err.message().contains("chat"));
        assert_eq!(failing.sent.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_serializes_with_taxonomy_code_string() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["code"], "TASK_PROCESSING_FAILED");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["stage"], "terminal");
    }
}
