use std::{cell::RefCell, sync::Arc};

use async_channel as chan;
use tokio::{spawn, sync::oneshot, task::JoinHandle};
use tracing::{error, info, trace, warn};

use super::{
	error::RunError,
	message::WorkerMessage,
	task::{
		Interrupter, IntoTask, PanicOnSenderDrop, TaskHandle, TaskRemoteController, TaskWorkState,
		TaskWorktable,
	},
	worker,
};

/// The task system, a cooperative single-worker runtime for background tasks.
///
/// All tasks dispatched to one system share a single execution thread; fairness comes from tasks
/// yielding at their interrupter checkpoints, not from preemption.
pub struct System<E: RunError> {
	msgs_tx: chan::Sender<WorkerMessage<E>>,
	dispatcher: Dispatcher<E>,
	handle: RefCell<Option<JoinHandle<()>>>,
}

impl<E: RunError> System<E> {
	#[must_use]
	pub fn new() -> Self {
		let (msgs_tx, msgs_rx) = chan::bounded(8);

		let handle = spawn(async move {
			trace!("Task system worker starting...");
			worker::run(msgs_rx).await;
			info!("Task system worker gracefully shutdown");
		});

		Self {
			msgs_tx: msgs_tx.clone(),
			dispatcher: Dispatcher { msgs_tx },
			handle: RefCell::new(Some(handle)),
		}
	}

	pub async fn dispatch(&self, into_task: impl IntoTask<E>) -> TaskHandle<E> {
		self.dispatcher.dispatch(into_task).await
	}

	pub async fn dispatch_many(
		&self,
		into_tasks: impl IntoIterator<Item = impl IntoTask<E>> + Send,
	) -> Vec<TaskHandle<E>> {
		self.dispatcher.dispatch_many(into_tasks).await
	}

	#[must_use]
	pub fn get_dispatcher(&self) -> Dispatcher<E> {
		self.dispatcher.clone()
	}

	/// Gracefully shuts the system down: the running task is asked to yield at its next
	/// checkpoint and every unfinished task is handed back to its [`TaskHandle`] as
	/// [`TaskStatus::Shutdown`](super::TaskStatus::Shutdown).
	pub async fn shutdown(&self) {
		if let Some(handle) = self
			.handle
			.try_borrow_mut()
			.ok()
			.and_then(|mut maybe_handle| maybe_handle.take())
		{
			let (tx, rx) = oneshot::channel();

			self.msgs_tx
				.send(WorkerMessage::ShutdownRequest(tx))
				.await
				.expect("Task system channel closed trying to shutdown");

			rx.await
				.expect("Task system channel closed trying to shutdown");

			if let Err(e) = handle.await {
				error!(?e, "Task system failed to shutdown on handle await;");
			}
		} else {
			warn!("Trying to shutdown a task system that was already shutdown");
		}
	}
}

impl<E: RunError> Default for System<E> {
	fn default() -> Self {
		Self::new()
	}
}

/// SAFETY: Due to usage of refcell we lost `Sync` impl, but we only use it to have a shutdown
/// method receiving `&self` which is called once, and we also use `try_borrow_mut` so we never
/// panic
unsafe impl<E: RunError> Sync for System<E> {}

/// A handle to dispatch tasks into the system, cheap to clone and hand out to job code.
#[derive(Debug)]
pub struct Dispatcher<E: RunError> {
	msgs_tx: chan::Sender<WorkerMessage<E>>,
}

impl<E: RunError> Clone for Dispatcher<E> {
	fn clone(&self) -> Self {
		Self {
			msgs_tx: self.msgs_tx.clone(),
		}
	}
}

impl<E: RunError> Dispatcher<E> {
	/// # Panics
	///
	/// Will panic if the system was already shutdown
	pub async fn dispatch(&self, into_task: impl IntoTask<E>) -> TaskHandle<E> {
		let task = into_task.into_task();
		let task_id = task.id();

		let (done_tx, done_rx) = oneshot::channel();
		let (interrupt_tx, interrupt_rx) = chan::bounded(1);

		let worktable = Arc::new(TaskWorktable::new(interrupt_tx));

		trace!(%task_id, "Dispatching task;");

		self.msgs_tx
			.send(WorkerMessage::NewTask(TaskWorkState {
				task,
				worktable: Arc::clone(&worktable),
				interrupter: Arc::new(Interrupter::new(interrupt_rx)),
				done_tx: PanicOnSenderDrop::new(task_id, done_tx),
			}))
			.await
			.expect("Task system channel closed trying to dispatch a task");

		TaskHandle {
			done_rx,
			controller: TaskRemoteController {
				msgs_tx: self.msgs_tx.clone(),
				worktable,
				task_id,
			},
		}
	}

	pub async fn dispatch_many(
		&self,
		into_tasks: impl IntoIterator<Item = impl IntoTask<E>> + Send,
	) -> Vec<TaskHandle<E>> {
		let mut handles = Vec::new();

		for into_task in into_tasks {
			handles.push(self.dispatch(into_task).await);
		}

		handles
	}
}
