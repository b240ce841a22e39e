//! Core domain logic for chaintask: the task store contract with its
//! in-memory and SQL backends, queue abstractions, the submission service,
//! the processor worker pool with its retry/compensation state machine, and
//! the alert dispatcher.
//!
//! The large-model inference and chain I/O live behind the [`Executor`]
//! seam; this crate owns when, how many times, and under what failure
//! semantics those calls happen.

pub mod alert;
pub mod executor;
pub mod processor;
pub mod queue;
pub mod service;
pub mod store;

pub use chaintask_db::error::{ErrorCode, Result, Severity, TaskError};
pub use chaintask_db::filter::{ListOptions, Order};
pub use chaintask_db::models::{Metadata, Task, TaskResult, TaskStats, TaskStatus};

pub use executor::{ExecuteRequest, Executor, RecoveryHandler};
pub use processor::{Processor, ProcessorConfig};
pub use service::{ServiceConfig, SubmitRequest, TaskService};
pub use store::TaskStore;
