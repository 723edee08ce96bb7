use std::{
	collections::{HashMap, VecDeque},
	pin::pin,
	sync::Arc,
};

use async_channel as chan;
use futures::StreamExt;
use tokio::{spawn, sync::oneshot, task::JoinHandle};
use tracing::{trace, warn};

use super::{
	error::{RunError, SystemError},
	message::WorkerMessage,
	task::{ExecStatus, TaskId, TaskStatus, TaskWorkState, TaskWorktable},
};

type TaskOutputMessage<E> = (TaskId, TaskWorkState<E>, Result<ExecStatus, E>);

enum StreamMessage<E: RunError> {
	Commands(WorkerMessage<E>),
	TaskOutput(TaskOutputMessage<E>),
}

/// The single worker loop: processes commands and task outputs until a shutdown request arrives.
///
/// Task `run` futures are spawned so commands keep being processed while a task is running; the
/// task and its result come back through the output channel when the `run` invocation ends.
pub(crate) async fn run<E: RunError>(msgs_rx: chan::Receiver<WorkerMessage<E>>) {
	let (task_output_tx, task_output_rx) = chan::bounded::<TaskOutputMessage<E>>(8);

	let mut runner = Runner {
		queue: VecDeque::new(),
		paused: HashMap::new(),
		pending_resumes: Vec::new(),
		running: None,
		task_output_tx,
		task_output_rx: task_output_rx.clone(),
	};

	let mut msg_stream = pin!(futures::stream::select(
		msgs_rx.map(StreamMessage::Commands),
		task_output_rx.map(StreamMessage::TaskOutput),
	));

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::Commands(WorkerMessage::NewTask(state)) => runner.new_task(state),

			StreamMessage::Commands(WorkerMessage::PauseTask { task_id, ack }) => {
				runner.pause_task(task_id, ack);
			}

			StreamMessage::Commands(WorkerMessage::ResumeTask { task_id, ack }) => {
				runner.resume_task(task_id, ack);
			}

			StreamMessage::Commands(WorkerMessage::CancelTask { task_id, ack }) => {
				runner.cancel_task(task_id, ack);
			}

			StreamMessage::Commands(WorkerMessage::ShutdownRequest(tx)) => {
				runner.shutdown(tx).await;
				return;
			}

			StreamMessage::TaskOutput((task_id, state, res)) => {
				runner.process_task_output(task_id, state, res);
			}
		}
	}

	trace!("Task system channel closed, worker will exit");
}

struct RunningTask {
	task_id: TaskId,
	worktable: Arc<TaskWorktable>,
	suspend_requested: bool,
	handle: JoinHandle<()>,
}

struct Runner<E: RunError> {
	queue: VecDeque<TaskWorkState<E>>,
	paused: HashMap<TaskId, TaskWorkState<E>>,
	pending_resumes: Vec<TaskId>,
	running: Option<RunningTask>,
	task_output_tx: chan::Sender<TaskOutputMessage<E>>,
	task_output_rx: chan::Receiver<TaskOutputMessage<E>>,
}

impl<E: RunError> Runner<E> {
	fn new_task(&mut self, state: TaskWorkState<E>) {
		trace!(task_id = %state.id(), "Received new task;");

		self.queue.push_back(state);

		if self.running.is_none() {
			self.dispatch_next();
		} else {
			// Share the worker: the running task yields at its next checkpoint
			self.request_suspend();
		}
	}

	fn dispatch_next(&mut self) {
		debug_assert!(self.running.is_none());

		if let Some(state) = self.queue.pop_front() {
			self.running = Some(self.spawn_run(state));
		}

		if self.running.is_some() && !self.queue.is_empty() {
			self.request_suspend();
		}
	}

	fn spawn_run(&self, mut state: TaskWorkState<E>) -> RunningTask {
		let task_id = state.id();
		let worktable = Arc::clone(&state.worktable);
		let out_tx = self.task_output_tx.clone();

		state.worktable.set_started();

		trace!(%task_id, "Running task;");

		let handle = spawn(async move {
			let interrupter = Arc::clone(&state.interrupter);

			let res = state.task.run(&interrupter).await;

			out_tx
				.send((task_id, state, res))
				.await
				.expect("Task output channel closed sending task result");
		});

		RunningTask {
			task_id,
			worktable,
			suspend_requested: false,
			handle,
		}
	}

	fn request_suspend(&mut self) {
		if let Some(running) = self.running.as_mut() {
			if !running.suspend_requested {
				running.suspend_requested = true;
				running.worktable.suspend();
			}
		}
	}

	fn process_task_output(&mut self, task_id: TaskId, state: TaskWorkState<E>, res: Result<ExecStatus, E>) {
		if let Some(running) = self.running.take() {
			debug_assert!(running.task_id == task_id);
		}

		match res {
			Ok(ExecStatus::Paused) => {
				if state.worktable.has_suspended() {
					state.worktable.reset_suspended();
					trace!(%task_id, "Task suspended, requeueing;");
					self.queue.push_back(state);
				} else if let Some(idx) = self
					.pending_resumes
					.iter()
					.position(|pending_id| *pending_id == task_id)
				{
					// A resume arrived while the pause was still being delivered; the task goes
					// straight back to the queue
					self.pending_resumes.swap_remove(idx);
					state.worktable.set_unpause();
					self.queue.push_back(state);
				} else {
					trace!(%task_id, "Task paused;");
					state.worktable.set_paused();
					self.paused.insert(task_id, state);
				}
			}

			res => Self::send_terminal(task_id, state, res),
		}

		self.dispatch_next();
	}

	fn send_terminal(task_id: TaskId, state: TaskWorkState<E>, res: Result<ExecStatus, E>) {
		let TaskWorkState {
			worktable,
			interrupter,
			done_tx,
			..
		} = state;

		interrupter.close();

		let status = match res {
			Ok(ExecStatus::Done(out)) => {
				trace!(%task_id, "Task done;");
				worktable.set_completed();
				TaskStatus::Done((task_id, out))
			}
			Ok(ExecStatus::Canceled) => {
				trace!(%task_id, "Task canceled;");
				worktable.set_canceled();
				TaskStatus::Canceled
			}
			Ok(ExecStatus::Paused) => unreachable!("paused tasks are requeued or parked"),
			Err(e) => {
				trace!(%task_id, "Task failed;");
				worktable.set_failed();
				TaskStatus::Error(e)
			}
		};

		worktable.set_finalized();

		if done_tx.send(Ok(status)).is_err() {
			warn!(%task_id, "Task done channel closed before sending task status;");
		}
	}

	fn pause_task(&mut self, task_id: TaskId, ack: oneshot::Sender<Result<(), SystemError>>) {
		if let Some(running) = self
			.running
			.as_ref()
			.filter(|running| running.task_id == task_id)
		{
			let (tx, rx) = oneshot::channel();

			running.worktable.pause(tx);

			// Ack back to the controller once the task consumed the pause request; the actual
			// Paused status arrives later through the task output channel
			spawn(async move {
				if rx.await.is_err() {
					trace!(%task_id, "Pause request dropped, task reached a terminal state first");
				}
				ack.send(Ok(())).ok();
			});
		} else if let Some(idx) = self.queue.iter().position(|state| state.id() == task_id) {
			let state = self
				.queue
				.remove(idx)
				.expect("just found the index in the queue");
			state.worktable.set_paused();
			self.paused.insert(task_id, state);
			ack.send(Ok(())).ok();
		} else if self.paused.contains_key(&task_id) {
			ack.send(Ok(())).ok();
		} else {
			ack.send(Err(SystemError::TaskNotFound(task_id))).ok();
		}
	}

	fn resume_task(&mut self, task_id: TaskId, ack: oneshot::Sender<Result<(), SystemError>>) {
		if let Some(state) = self.paused.remove(&task_id) {
			state.worktable.set_unpause();
			self.queue.push_back(state);

			if self.running.is_none() {
				self.dispatch_next();
			} else {
				self.request_suspend();
			}

			ack.send(Ok(())).ok();
		} else if self
			.running
			.as_ref()
			.is_some_and(|running| running.task_id == task_id)
		{
			// A pause is still in flight for this task; remember the resume so the task is
			// requeued as soon as the Paused status lands
			self.pending_resumes.push(task_id);
			ack.send(Ok(())).ok();
		} else {
			ack.send(Err(SystemError::TaskNotFound(task_id))).ok();
		}
	}

	fn cancel_task(&mut self, task_id: TaskId, ack: oneshot::Sender<Result<(), SystemError>>) {
		if let Some(running) = self
			.running
			.as_ref()
			.filter(|running| running.task_id == task_id)
		{
			let (tx, rx) = oneshot::channel();

			running.worktable.cancel(tx);

			spawn(async move {
				if rx.await.is_err() {
					trace!(%task_id, "Cancel request dropped, task reached a terminal state first");
				}
				ack.send(Ok(())).ok();
			});
		} else if let Some(idx) = self.queue.iter().position(|state| state.id() == task_id) {
			let state = self
				.queue
				.remove(idx)
				.expect("just found the index in the queue");
			Self::send_canceled(state);
			ack.send(Ok(())).ok();
		} else if let Some(state) = self.paused.remove(&task_id) {
			Self::send_canceled(state);
			ack.send(Ok(())).ok();
		} else {
			ack.send(Err(SystemError::TaskNotFound(task_id))).ok();
		}
	}

	fn send_canceled(state: TaskWorkState<E>) {
		let TaskWorkState {
			worktable,
			interrupter,
			done_tx,
			..
		} = state;

		worktable.set_canceled();
		worktable.set_finalized();
		interrupter.close();

		if done_tx.send(Ok(TaskStatus::Canceled)).is_err() {
			warn!("Task done channel closed before sending cancel status;");
		}
	}

	async fn shutdown(&mut self, tx: oneshot::Sender<()>) {
		trace!("Worker beginning shutdown");

		if let Some(running) = self.running.take() {
			if !running.suspend_requested {
				running.worktable.suspend();
			}

			// The task hands itself back at its next checkpoint
			if let Ok((task_id, state, res)) = self.task_output_rx.recv().await {
				match res {
					Ok(ExecStatus::Paused) => Self::send_shutdown(state),
					res => Self::send_terminal(task_id, state, res),
				}
			}

			running.handle.await.ok();
		}

		for state in self
			.queue
			.drain(..)
			.chain(self.paused.drain().map(|(_, state)| state))
		{
			Self::send_shutdown(state);
		}

		tx.send(()).ok();
	}

	fn send_shutdown(state: TaskWorkState<E>) {
		let TaskWorkState {
			task,
			worktable,
			interrupter,
			done_tx,
		} = state;

		trace!(task_id = %task.id(), "Sending task back to the user on shutdown;");

		worktable.set_shutdown();
		worktable.set_finalized();
		interrupter.close();

		if done_tx.send(Ok(TaskStatus::Shutdown(task))).is_err() {
			warn!("Task done channel closed before sending shutdown status;");
		}
	}
}
