//! Read/write task commands: submit, get, list, stats, wait.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use chaintask_core::store::{SqlTaskStore, TaskStore};
use chaintask_core::{
    ListOptions, Metadata, Order, ServiceConfig, SubmitRequest, Task, TaskService, TaskStatus,
};

use crate::broker::Broker;
use crate::config::CliConfig;

async fn open_store(config: &CliConfig) -> Result<SqlTaskStore> {
    SqlTaskStore::connect(&config.db)
        .await
        .with_context(|| format!("failed to open task store at {}", config.db.database_url))
}

fn parse_statuses(arg: Option<String>) -> Result<Vec<TaskStatus>> {
    let Some(arg) = arg else { return Ok(Vec::new()) };
    arg.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<TaskStatus>().map_err(Into::into))
        .collect()
}

fn print_task(task: &Task, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(task)?);
        return Ok(());
    }

    println!(
        "{}  {}  attempts={}/{}  {}",
        task.id, task.status, task.attempts, task.max_retries, task.goal
    );
    if !task.last_error.is_empty() {
        println!("  last error [{}]: {}", task.error_code, task.last_error);
    }
    if let Some(result) = &task.result {
        if !result.reply.is_empty() {
            println!("  reply: {}", result.reply);
        }
        if !result.observations.is_empty() {
            println!("  observations: {}", result.observations);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn submit(
    config: &CliConfig,
    goal: String,
    id: Option<String>,
    chain_action: Option<String>,
    address: Option<String>,
    metadata: Option<String>,
    json: bool,
) -> Result<()> {
    let metadata = metadata
        .map(|text| {
            serde_json::from_str::<Metadata>(&text).context("--metadata must be a JSON object")
        })
        .transpose()?;

    let store: Arc<dyn TaskStore> = Arc::new(open_store(config).await?);
    // The broker value must outlive the submit: the in-process consumer
    // half lives inside it, and dropping it early would fail the publish.
    let broker = Broker::connect(config).await?;
    let service = TaskService::new(store, broker.producer(), ServiceConfig::default());

    let request = SubmitRequest {
        id,
        goal,
        chain_action,
        address,
        metadata,
    };
    let task = service.submit(request).await?;
    if broker.is_in_process() {
        info!(
            task_id = %task.id,
            "no broker configured; the task stays pending until an in-process `work` run picks it up"
        );
    }
    print_task(&task, json)?;
    service.close().await?;
    Ok(())
}

pub async fn get(config: &CliConfig, task_id: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let task = store.get(task_id).await?;
    print_task(&task, json)
}

pub async fn list(
    config: &CliConfig,
    status: Option<String>,
    query: Option<String>,
    limit: i64,
    offset: i64,
    ascending: bool,
    json: bool,
) -> Result<()> {
    let store = open_store(config).await?;

    let mut opts = ListOptions::new()
        .with_statuses(parse_statuses(status)?)
        .with_page(limit, offset);
    if let Some(query) = query {
        opts = opts.with_query(query);
    }
    if ascending {
        opts = opts.with_order(Order::UpdatedAsc);
    }

    let tasks = store.list(&opts).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("no matching tasks");
        return Ok(());
    }
    for task in &tasks {
        print_task(task, false)?;
    }
    Ok(())
}

pub async fn stats(config: &CliConfig, status: Option<String>, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let opts = ListOptions::new().with_statuses(parse_statuses(status)?);
    let stats = store.stats(&opts).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!(
        "total={} pending={} running={} succeeded={} failed={}",
        stats.total, stats.pending, stats.running, stats.succeeded, stats.failed
    );
    if stats.total > 0 {
        println!(
            "updated between {} and {}",
            stats.oldest_updated_at, stats.newest_updated_at
        );
    }
    Ok(())
}

pub async fn wait(config: &CliConfig, task_id: &str, interval_secs: u64, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let interval = Duration::from_secs(interval_secs.max(1));
    loop {
        let task = store.get(task_id).await?;
        if task.status.is_terminal() {
            return print_task(&task, json);
        }
        tokio::time::sleep(interval).await;
    }
}
