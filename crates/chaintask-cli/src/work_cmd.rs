//! The `work` command: a worker pool over the configured queue.
//!
//! With a broker configured, workers consume from it like any other
//! deployment. Without one, the pool runs single-binary style: the
//! in-process queue is seeded from the store (concurrently, so seeding
//! can never dead-lock against the bounded channel) and drained by the
//! same process.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chaintask_core::alert::{AlertDispatcher, ChatNotifier, LogNotifier, WebhookNotifier};
use chaintask_core::store::{SqlTaskStore, TaskStore};
use chaintask_core::{ExecuteRequest, Executor, Processor, ProcessorConfig, TaskResult};

use crate::broker::{self, Broker};
use crate::config::CliConfig;

/// Executors the CLI can run tasks with.
///
/// `echo` is a placeholder runtime for smoke-testing the pipeline; real
/// deployments embed the library and wire the LLM/chain executor instead.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ExecutorKind {
    Echo,
}

/// Replies with the goal verbatim.
struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, request: ExecuteRequest) -> chaintask_core::Result<TaskResult> {
        Ok(TaskResult {
            thought: "echoing the goal without consulting a model".into(),
            reply: request.goal,
            ..Default::default()
        })
    }
}

pub async fn run(config: &CliConfig, workers: usize, executor: ExecutorKind) -> Result<()> {
    let store: Arc<dyn TaskStore> = Arc::new(SqlTaskStore::connect(&config.db).await?);

    let alerts = Arc::new(
        AlertDispatcher::new()
            .with_notifier(Arc::new(LogNotifier::new()))
            .with_notifier(Arc::new(WebhookNotifier::new(config.webhook_url.clone())))
            .with_notifier(Arc::new(ChatNotifier::new(config.chat_webhook_url.clone()))),
    );

    let executor: Arc<dyn Executor> = match executor {
        ExecutorKind::Echo => Arc::new(EchoExecutor),
    };

    let queue = Broker::connect(config).await?;
    let processor = Arc::new(Processor::new(
        store.clone(),
        queue.producer(),
        executor,
        alerts,
        ProcessorConfig { workers },
    ));

    if queue.is_in_process() {
        info!("no broker configured; running single-binary mode over the in-process queue");
        let seed_store = store.clone();
        let seed_producer = queue.producer();
        tokio::spawn(async move {
            match broker::seed_from_store(seed_store.as_ref(), seed_producer.as_ref()).await {
                Ok(seeded) => info!(seeded, "seeded in-process queue from the store"),
                Err(e) => warn!(error = %e, "failed to seed in-process queue"),
            }
        });
    }

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received; draining workers");
            cancel_on_signal.cancel();
        }
    });

    processor.run(queue.consumer(), cancel).await?;
    info!("worker pool stopped");
    Ok(())
}
