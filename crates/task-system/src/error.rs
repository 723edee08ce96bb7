use std::{error::Error as StdError, fmt};

use thiserror::Error;

use super::task::TaskId;

/// Errors from the task system itself, as opposed to errors returned by a task's `run` method.
#[derive(Debug, Error)]
pub enum SystemError {
	#[error("task not found <task_id='{0}'>")]
	TaskNotFound(TaskId),
}

/// Bound for the unified error type that all tasks dispatched to a single system must share.
pub trait RunError: StdError + fmt::Debug + Send + Sync + 'static {}

impl<T: StdError + fmt::Debug + Send + Sync + 'static> RunError for T {}
