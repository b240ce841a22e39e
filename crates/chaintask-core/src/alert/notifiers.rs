//! Built-in delivery channels: structured log lines, a generic JSON
//! webhook, and a chat-style webhook.

use async_trait::async_trait;
use tracing::{error, info, warn};

use chaintask_db::error::{ErrorCode, Result, Severity, TaskError};

use super::{AlertEvent, Notifier};

/// Emits the event as a structured log record at the event's severity.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &str {
        "log"
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        match event.severity {
            Severity::Critical => error!(
                task_id = %event.task_id,
                stage = %event.stage,
                code = %event.code,
                attempts = event.attempts,
                max_retries = event.max_retries,
                "{}", event.message
            ),
            Severity::Warning => warn!(
                task_id = %event.task_id,
                stage = %event.stage,
                code = %event.code,
                attempts = event.attempts,
                max_retries = event.max_retries,
                "{}", event.message
            ),
            Severity::Info => info!(
                task_id = %event.task_id,
                stage = %event.stage,
                code = %event.code,
                attempts = event.attempts,
                max_retries = event.max_retries,
                "{}", event.message
            ),
        }
        Ok(())
    }
}

/// POSTs the full event as JSON to a configured endpoint.
///
/// An empty URL means unconfigured: the notifier warns once per event and
/// reports success so the fan-out is unaffected.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> &str {
        "webhook"
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        if self.url.is_empty() {
            warn!(task_id = %event.task_id, "webhook notifier unconfigured; dropping alert");
            return Ok(());
        }

        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                TaskError::new(ErrorCode::Timeout, "webhook delivery failed").with_source(e)
            })?;
        if !response.status().is_success() {
            return Err(TaskError::new(
                ErrorCode::Timeout,
                format!("webhook returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Sends a one-line text summary to a chat-style incoming webhook
/// (`{"text": "..."}` payload).
pub struct ChatNotifier {
    url: String,
    client: reqwest::Client,
}

impl ChatNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    fn channel(&self) -> &str {
        "chat"
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        if self.url.is_empty() {
            warn!(task_id = %event.task_id, "chat notifier unconfigured; dropping alert");
            return Ok(());
        }

        let text = format!(
            "[{}] {} task {} ({}/{} attempts): {}",
            event.severity, event.code, event.task_id, event.attempts, event.max_retries,
            event.message
        );
        let payload = serde_json::json!({ "text": text });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                TaskError::new(ErrorCode::Timeout, "chat delivery failed").with_source(e)
            })?;
        if !response.status().is_success() {
            return Err(TaskError::new(
                ErrorCode::Timeout,
                format!("chat webhook returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> AlertEvent {
        AlertEvent {
            stage: "degraded".into(),
            code: ErrorCode::TaskProcessingFailed,
            message: "fallback used".into(),
            severity: Severity::Warning,
            task_id: "t-9".into(),
            attempts: 1,
            max_retries: 1,
            metadata: None,
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn unconfigured_webhook_reports_success() {
        let notifier = WebhookNotifier::new("");
        notifier.send(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn unconfigured_chat_reports_success() {
        let notifier = ChatNotifier::new("");
        notifier.send(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notifier = LogNotifier::new();
        notifier.send(&event()).await.unwrap();
    }
}
