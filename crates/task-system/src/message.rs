use tokio::sync::oneshot;

use super::{
	error::{RunError, SystemError},
	task::{TaskId, TaskWorkState},
};

pub(crate) enum WorkerMessage<E: RunError> {
	NewTask(TaskWorkState<E>),
	PauseTask {
		task_id: TaskId,
		ack: oneshot::Sender<Result<(), SystemError>>,
	},
	ResumeTask {
		task_id: TaskId,
		ack: oneshot::Sender<Result<(), SystemError>>,
	},
	CancelTask {
		task_id: TaskId,
		ack: oneshot::Sender<Result<(), SystemError>>,
	},
	ShutdownRequest(oneshot::Sender<()>),
}
