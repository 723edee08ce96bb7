//!
//! # Task System
//!
//! Visage's task system is a cooperative runtime for long-lived background work. A single worker
//! runs one task at a time; tasks voluntarily hand control back at checkpoints of their own
//! choosing, through the [`Interrupter`] object passed to [`Task::run`]. Whenever more than one
//! task is runnable, the worker asks the running task to suspend at its next checkpoint and
//! rotates the queue, so every task makes progress without any preemption.
//!
//! Bring your own unified error type and dispatch some tasks, the system handles enqueueing,
//! pause/resume/cancel commands, and graceful shutdown (unfinished tasks are handed back to their
//! dispatchers so they can be serialized and re-dispatched later, see [`SerializableTask`]).
//!
//! ## Basic example
//!
//! ```
//! use vg_task_system::{TaskSystem, Task, TaskId, ExecStatus, TaskOutput, Interrupter, TaskStatus};
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum SampleError {
//!     #[error("sample error")]
//!     SampleError,
//! }
//!
//! #[derive(Debug)]
//! pub struct ReadyTask {
//!     id: TaskId,
//! }
//!
//! #[async_trait]
//! impl Task<SampleError> for ReadyTask {
//!     fn id(&self) -> TaskId {
//!         self.id
//!     }
//!
//!     async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
//!         Ok(ExecStatus::Done(TaskOutput::Empty))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = TaskSystem::new();
//!
//!     let handle = system.dispatch(ReadyTask { id: TaskId::new_v4() }).await;
//!
//!     assert!(matches!(
//!         handle.await,
//!         Ok(TaskStatus::Done((_task_id, TaskOutput::Empty)))
//!     ));
//!
//!     system.shutdown().await;
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod message;
mod system;
mod task;
mod worker;

pub use error::{RunError, SystemError as TaskSystemError};
pub use system::{Dispatcher as TaskDispatcher, System as TaskSystem};
pub use task::{
	AnyTaskOutput, ExecStatus, Interrupter, InterrupterFuture, InterruptionKind, IntoAnyTaskOutput,
	IntoTask, SerializableTask, Task, TaskHandle, TaskId, TaskOutput, TaskRemoteController,
	TaskStatus,
};
