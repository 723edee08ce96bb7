use std::{
	fmt,
	future::{Future, IntoFuture},
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
};

use async_channel as chan;
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use tokio::sync::oneshot;
use tracing::{instrument, trace, warn};
use uuid::Uuid;

use super::{
	error::{RunError, SystemError},
	message::WorkerMessage,
};

/// A unique identifier for a task using the [`uuid`](https://docs.rs/uuid) crate.
pub type TaskId = Uuid;

/// A trait that represents any kind of output that a task can return.
///
/// The user will downcast it to the concrete type that the task returns. Most of the time,
/// tasks will not return anything, so it isn't a costly abstraction, as only a heap allocation
/// is needed when the user wants to return a [`Box<dyn AnyTaskOutput>`].
pub trait AnyTaskOutput: Send + Downcast + 'static {}

impl fmt::Debug for Box<dyn AnyTaskOutput> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<AnyTaskOutput>")
	}
}

impl_downcast!(AnyTaskOutput);

/// Blanket implementation for all types that implements `Send + 'static`
impl<T: Send + 'static> AnyTaskOutput for T {}

/// A helper trait to convert any type that implements [`AnyTaskOutput`] into a [`TaskOutput`], boxing it.
pub trait IntoAnyTaskOutput {
	fn into_output(self) -> TaskOutput;
}

/// Blanket implementation for all types that implements [`AnyTaskOutput`]
impl<T: AnyTaskOutput + 'static> IntoAnyTaskOutput for T {
	fn into_output(self) -> TaskOutput {
		TaskOutput::Out(Box::new(self))
	}
}

/// An enum representing whether a task returned anything or not.
#[derive(Debug)]
pub enum TaskOutput {
	Out(Box<dyn AnyTaskOutput>),
	Empty,
}

impl From<()> for TaskOutput {
	fn from((): ()) -> Self {
		Self::Empty
	}
}

/// An enum representing all possible outcomes for a task.
#[derive(Debug)]
pub enum TaskStatus<E: RunError> {
	/// The task has finished successfully and maybe has some output for the user.
	Done((TaskId, TaskOutput)),
	/// Task was gracefully cancelled by the user.
	Canceled,
	/// The task system was shutdown and we give back the task to the user so they can downcast it
	/// back to the original concrete type and store it on disk or any other storage to be re-dispatched later.
	Shutdown(Box<dyn Task<E>>),
	/// Task had an error so we return it back and the user can handle it appropriately.
	Error(E),
}

/// Represents whether the current [`Task::run`] method on a task finished successfully or was interrupted.
///
/// `Done` and `Canceled` variants can only happen once, while `Paused` can happen multiple times,
/// whenever the task reaches a checkpoint while a pause or suspend request is pending.
#[derive(Debug)]
pub enum ExecStatus {
	Done(TaskOutput),
	Paused,
	Canceled,
}

/// A helper trait to convert any type that implements [`Task<E>`] into a [`Box<dyn Task<E>>`], boxing it.
pub trait IntoTask<E>: Send {
	fn into_task(self) -> Box<dyn Task<E>>;
}

/// Blanket implementation for all types that implements [`Task<E>`] and `'static`
impl<T: Task<E> + 'static, E: RunError> IntoTask<E> for T {
	fn into_task(self) -> Box<dyn Task<E>> {
		Box::new(self)
	}
}

/// The main trait that represents a task that can be dispatched to the task system.
///
/// All tasks dispatched to a single system must return the same generic error type, so we can
/// have a unified error handling.
///
/// We're currently using the [`async_trait`](https://docs.rs/async-trait) crate to allow dyn async traits,
/// due to a limitation in the Rust language.
#[async_trait]
pub trait Task<E: RunError>: Downcast + Send + Sync + 'static {
	/// A unique identifier for the task, it will be used to identify the task on the system and also to the user.
	fn id(&self) -> TaskId;

	/// This method represents the work that should be done by the worker, it will be called when
	/// the task reaches the front of the run queue. We receive a `&mut self` so any internal data
	/// can be mutated on each `run` invocation; a task that returned [`ExecStatus::Paused`] will
	/// have `run` invoked again when it is resumed, and is expected to pick up where it left off.
	///
	/// The [`interrupter`](Interrupter) is a helper object that can be used to check if the user
	/// requested a pause or a cancel, so the task can decide the appropriated moment to yield,
	/// avoiding corrupted data or inconsistent states. Check it after completing a unit of work,
	/// not before: the system asks running tasks to suspend whenever others are waiting, and a
	/// task that checks first can be starved into yielding without ever making progress.
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E>;
}

impl_downcast!(Task<E> where E: RunError);

impl<E: RunError> fmt::Debug for Box<dyn Task<E>> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<Task>")
	}
}

/// Tasks that can be serialized when the system shuts down mid-run, to be re-dispatched on the
/// next run of the hosting process.
pub trait SerializableTask<E: RunError>: Task<E>
where
	Self: Sized,
{
	type SerializeError: std::error::Error + 'static;
	type DeserializeError: std::error::Error + 'static;
	type DeserializeCtx: 'static;

	fn serialize(self) -> impl Future<Output = Result<Vec<u8>, Self::SerializeError>> + Send;
	fn deserialize(
		data: &[u8],
		ctx: Self::DeserializeCtx,
	) -> impl Future<Output = Result<Self, Self::DeserializeError>> + Send;
}

pin_project_lite::pin_project! {
	/// Intermediate struct to wait until a pause or a cancel commands are sent by the user.
	#[must_use = "`InterrupterFuture` does nothing unless polled"]
	pub struct InterrupterFuture<'recv> {
		#[pin]
		fut: chan::Recv<'recv, InterruptionRequest>,
	}
}

impl Future for InterrupterFuture<'_> {
	type Output = InterruptionKind;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();

		match this.fut.poll(cx) {
			Poll::Ready(Ok(InterruptionRequest { kind, ack })) => {
				trace!(?kind, "Running task received interruption request");
				if ack.send(()).is_err() {
					warn!("TaskInterrupter ack channel closed");
				}
				if let InternalInterruptionKind::Suspend(has_suspended) = &kind {
					has_suspended.store(true, Ordering::SeqCst);
				}

				Poll::Ready(kind.into())
			}
			Poll::Ready(Err(chan::RecvError)) => {
				// In case the task handle was dropped, we can't receive any more interrupt messages
				// so we will never interrupt and the task will run freely until ended
				warn!("Task interrupter channel closed, will run task until it finishes!");
				Poll::Pending
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// We use an [`IntoFuture`] implementation to allow the user to use the `await` syntax on the
/// [`Interrupter`] object. With this trait, we return an [`InterrupterFuture`] that will await
/// until the user requests a pause or a cancel.
impl<'recv> IntoFuture for &'recv Interrupter {
	type Output = InterruptionKind;

	type IntoFuture = InterrupterFuture<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		InterrupterFuture {
			fut: self.interrupt_rx.recv(),
		}
	}
}

/// A helper object that can be used to check if the user requested a pause or a cancel, so the
/// task `run` implementation can decide the appropriated moment to pause or cancel the task.
#[derive(Debug)]
pub struct Interrupter {
	interrupt_rx: chan::Receiver<InterruptionRequest>,
}

impl Drop for Interrupter {
	fn drop(&mut self) {
		if !self.interrupt_rx.is_closed() {
			self.close();
		}
	}
}

impl Interrupter {
	pub(crate) fn new(interrupt_rx: chan::Receiver<InterruptionRequest>) -> Self {
		Self { interrupt_rx }
	}

	/// Check if the user requested a pause or a cancel, returning the kind of interruption that
	/// was requested in a non-blocking manner.
	pub fn try_check_interrupt(&self) -> Option<InterruptionKind> {
		if let Ok(InterruptionRequest { kind, ack }) = self.interrupt_rx.try_recv() {
			trace!(?kind, "Interrupter received interruption request");

			if let InternalInterruptionKind::Suspend(has_suspended) = &kind {
				has_suspended.store(true, Ordering::SeqCst);
			}

			if ack.send(()).is_err() {
				warn!("TaskInterrupter ack channel closed");
			}

			Some(kind.into())
		} else {
			None
		}
	}

	pub(crate) fn close(&self) {
		self.interrupt_rx.close();
		// Requests that were in-flight when the task reached a terminal state still get acked,
		// otherwise their senders would wait forever
		while let Ok(InterruptionRequest { kind, ack }) = self.interrupt_rx.try_recv() {
			trace!(
				?kind,
				"Interrupter received interruption request after task was completed"
			);
			if ack.send(()).is_err() {
				warn!("TaskInterrupter ack channel closed");
			}
		}
	}
}

#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		let interrupter: &Interrupter = $interrupter;

		match interrupter.try_check_interrupt() {
			Some($crate::InterruptionKind::Cancel) => {
				::tracing::trace!("Task was canceled by the user");
				return Ok($crate::ExecStatus::Canceled);
			}
			Some($crate::InterruptionKind::Pause) => {
				::tracing::trace!("Task was paused by the user or suspended by the task system");
				return Ok($crate::ExecStatus::Paused);
			}
			None => { /* Everything is Awesome! */ }
		}
	};
}

/// The kind of interruption that can be requested by the user, a pause or a cancel
#[derive(Debug, Clone, Copy)]
pub enum InterruptionKind {
	Pause,
	Cancel,
}

#[derive(Debug, Clone)]
enum InternalInterruptionKind {
	Pause,
	Suspend(Arc<AtomicBool>),
	Cancel,
}

impl From<InternalInterruptionKind> for InterruptionKind {
	fn from(kind: InternalInterruptionKind) -> Self {
		match kind {
			InternalInterruptionKind::Pause | InternalInterruptionKind::Suspend(_) => Self::Pause,
			InternalInterruptionKind::Cancel => Self::Cancel,
		}
	}
}

#[derive(Debug)]
pub(crate) struct InterruptionRequest {
	kind: InternalInterruptionKind,
	ack: oneshot::Sender<()>,
}

/// A remote controller of a task that can be used to pause, cancel or resume it.
#[derive(Debug)]
pub struct TaskRemoteController<E: RunError> {
	pub(crate) msgs_tx: chan::Sender<WorkerMessage<E>>,
	pub(crate) worktable: Arc<TaskWorktable>,
	pub(crate) task_id: TaskId,
}

impl<E: RunError> Clone for TaskRemoteController<E> {
	fn clone(&self) -> Self {
		Self {
			msgs_tx: self.msgs_tx.clone(),
			worktable: Arc::clone(&self.worktable),
			task_id: self.task_id,
		}
	}
}

impl<E: RunError> TaskRemoteController<E> {
	/// Get the unique identifier of the task
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.task_id
	}

	/// Gracefully pause the task at a safe point defined by the user using the [`Interrupter`]
	///
	/// # Panics
	///
	/// Will panic if the worker failed to ack the pause request
	#[instrument(skip(self), fields(task_id = %self.task_id))]
	pub async fn pause(&self) -> Result<(), SystemError> {
		if self.worktable.is_finalized() {
			trace!("Task is finalized, will not pause");
			return Ok(());
		}

		let (tx, rx) = oneshot::channel();

		self.msgs_tx
			.send(WorkerMessage::PauseTask {
				task_id: self.task_id,
				ack: tx,
			})
			.await
			.expect("Task system channel closed trying to pause task");

		rx.await
			.expect("Task system channel closed trying to receive pause response")
	}

	/// Gracefully cancel the task at a safe point defined by the user using the [`Interrupter`]
	///
	/// # Panics
	///
	/// Will panic if the worker failed to ack the cancel request
	#[instrument(skip(self), fields(task_id = %self.task_id))]
	pub async fn cancel(&self) -> Result<(), SystemError> {
		if self.worktable.is_finalized() {
			trace!("Task is finalized, will not cancel");
			return Ok(());
		}

		let (tx, rx) = oneshot::channel();

		self.msgs_tx
			.send(WorkerMessage::CancelTask {
				task_id: self.task_id,
				ack: tx,
			})
			.await
			.expect("Task system channel closed trying to cancel task");

		rx.await
			.expect("Task system channel closed trying to receive cancel response")
	}

	/// Marks the task to be resumed by the task system, it will be re-enqueued and run when its
	/// turn comes up again.
	///
	/// # Panics
	///
	/// Will panic if the worker failed to ack the resume request
	#[instrument(skip(self), fields(task_id = %self.task_id))]
	pub async fn resume(&self) -> Result<(), SystemError> {
		if self.worktable.is_finalized() {
			trace!("Task is finalized, will not resume");
			return Ok(());
		}

		let (tx, rx) = oneshot::channel();

		self.msgs_tx
			.send(WorkerMessage::ResumeTask {
				task_id: self.task_id,
				ack: tx,
			})
			.await
			.expect("Task system channel closed trying to resume task");

		rx.await
			.expect("Task system channel closed trying to receive resume response")
	}

	/// Verify if the task was already completed
	#[must_use]
	pub fn is_done(&self) -> bool {
		self.worktable.is_done()
			| self.worktable.has_shutdown()
			| self.worktable.has_canceled()
			| self.worktable.has_failed()
	}
}

/// A handle returned when a task is dispatched to the task system, it can be used to pause,
/// cancel, resume, or wait until the task gets completed.
#[derive(Debug)]
pub struct TaskHandle<E: RunError> {
	pub(crate) done_rx: oneshot::Receiver<Result<TaskStatus<E>, SystemError>>,
	pub(crate) controller: TaskRemoteController<E>,
}

impl<E: RunError> Future for TaskHandle<E> {
	type Output = Result<TaskStatus<E>, SystemError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.done_rx)
			.poll(cx)
			.map(|res| res.expect("TaskHandle done channel unexpectedly closed"))
	}
}

impl<E: RunError> TaskHandle<E> {
	/// Get the unique identifier of the task
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.controller.task_id
	}

	/// Gracefully pause the task at a safe point defined by the user using the [`Interrupter`]
	pub async fn pause(&self) -> Result<(), SystemError> {
		self.controller.pause().await
	}

	/// Gracefully cancel the task at a safe point defined by the user using the [`Interrupter`]
	pub async fn cancel(&self) -> Result<(), SystemError> {
		self.controller.cancel().await
	}

	/// Marks the task to be resumed by the task system, it will be re-enqueued and run when its
	/// turn comes up again.
	pub async fn resume(&self) -> Result<(), SystemError> {
		self.controller.resume().await
	}

	/// Gets the [`TaskRemoteController`] object that can be used to control the task remotely
	#[must_use]
	pub fn remote_controller(&self) -> TaskRemoteController<E> {
		self.controller.clone()
	}
}

#[derive(Debug)]
pub(crate) struct TaskWorktable {
	started: AtomicBool,
	is_running: AtomicBool,
	is_done: AtomicBool,
	is_paused: AtomicBool,
	has_canceled: AtomicBool,
	has_shutdown: AtomicBool,
	has_failed: AtomicBool,
	has_suspended: Arc<AtomicBool>,
	finalized: AtomicBool,
	interrupt_tx: chan::Sender<InterruptionRequest>,
}

impl TaskWorktable {
	pub fn new(interrupt_tx: chan::Sender<InterruptionRequest>) -> Self {
		Self {
			started: AtomicBool::new(false),
			is_running: AtomicBool::new(false),
			is_done: AtomicBool::new(false),
			is_paused: AtomicBool::new(false),
			has_canceled: AtomicBool::new(false),
			has_shutdown: AtomicBool::new(false),
			has_failed: AtomicBool::new(false),
			has_suspended: Arc::new(AtomicBool::new(false)),
			finalized: AtomicBool::new(false),
			interrupt_tx,
		}
	}

	pub fn set_started(&self) {
		self.started.store(true, Ordering::Relaxed);
		self.is_running.store(true, Ordering::Relaxed);
	}

	pub fn set_completed(&self) {
		self.is_done.store(true, Ordering::Relaxed);
		self.is_running.store(false, Ordering::Relaxed);
	}

	pub fn set_canceled(&self) {
		self.has_canceled.store(true, Ordering::Relaxed);
		self.is_running.store(false, Ordering::Relaxed);
	}

	pub fn set_paused(&self) {
		self.is_paused.store(true, Ordering::Relaxed);
		self.is_running.store(false, Ordering::Relaxed);
	}

	pub fn set_unpause(&self) {
		self.is_paused.store(false, Ordering::Relaxed);
	}

	pub fn set_failed(&self) {
		self.has_failed.store(true, Ordering::Relaxed);
		self.is_running.store(false, Ordering::Relaxed);
	}

	pub fn set_shutdown(&self) {
		self.has_shutdown.store(true, Ordering::Relaxed);
		self.is_running.store(false, Ordering::Relaxed);
	}

	pub fn set_finalized(&self) {
		self.finalized.store(true, Ordering::Release);
	}

	pub fn reset_suspended(&self) {
		self.has_suspended.store(false, Ordering::SeqCst);
	}

	/// Sends a pause request to the task's [`Interrupter`], to be consumed at its next
	/// checkpoint; `outer_tx` resolves once the task acks the request.
	pub fn pause(self: &Arc<Self>, outer_tx: oneshot::Sender<()>) {
		trace!("Sending pause signal to Interrupter object on task");
		tokio::spawn({
			let this = Arc::clone(self);

			async move {
				let (tx, rx) = oneshot::channel();

				if this
					.interrupt_tx
					.send(InterruptionRequest {
						kind: InternalInterruptionKind::Pause,
						ack: tx,
					})
					.await
					.is_ok()
				{
					if rx.await.is_err() {
						trace!("Pause request was dropped before the task acked it");
					}

					this.is_paused.store(true, Ordering::Release);
					this.is_running.store(false, Ordering::Release);
				}

				if outer_tx.send(()).is_err() {
					trace!("Pause ack channel closed, task probably already finished");
				}
			}
		});
	}

	/// Asks the running task to yield at its next checkpoint so another queued task can take the
	/// worker; a suspended task is requeued instead of parked.
	pub fn suspend(self: &Arc<Self>) {
		trace!("Sending suspend signal to Interrupter object on task");
		tokio::spawn({
			let this = Arc::clone(self);
			let has_suspended = Arc::clone(&self.has_suspended);

			async move {
				let (tx, rx) = oneshot::channel();

				if this
					.interrupt_tx
					.send(InterruptionRequest {
						kind: InternalInterruptionKind::Suspend(has_suspended),
						ack: tx,
					})
					.await
					.is_ok() && rx.await.is_err()
				{
					trace!("Suspend request was dropped, task probably already finished");
				}
			}
		});
	}

	/// Sends a cancel request to the task's [`Interrupter`]; `outer_tx` resolves once the task
	/// acks the request.
	pub fn cancel(self: &Arc<Self>, outer_tx: oneshot::Sender<()>) {
		trace!("Sending cancel signal to Interrupter object on task");
		tokio::spawn({
			let this = Arc::clone(self);

			async move {
				let (tx, rx) = oneshot::channel();

				if this
					.interrupt_tx
					.send(InterruptionRequest {
						kind: InternalInterruptionKind::Cancel,
						ack: tx,
					})
					.await
					.is_ok()
				{
					if rx.await.is_err() {
						trace!("Cancel request was dropped before the task acked it");
					}

					this.has_canceled.store(true, Ordering::Release);
					this.is_running.store(false, Ordering::Release);
				}

				if outer_tx.send(()).is_err() {
					trace!("Cancel ack channel closed, task probably already finished");
				}
			}
		});
	}

	pub fn is_done(&self) -> bool {
		self.is_done.load(Ordering::Acquire)
	}

	pub fn is_paused(&self) -> bool {
		self.is_paused.load(Ordering::Acquire)
	}

	pub fn has_canceled(&self) -> bool {
		self.has_canceled.load(Ordering::Acquire)
	}

	pub fn has_failed(&self) -> bool {
		self.has_failed.load(Ordering::Acquire)
	}

	pub fn has_shutdown(&self) -> bool {
		self.has_shutdown.load(Ordering::Acquire)
	}

	pub fn has_suspended(&self) -> bool {
		self.has_suspended.load(Ordering::SeqCst)
	}

	pub fn is_finalized(&self) -> bool {
		self.finalized.load(Ordering::Acquire)
	}
}

pub(crate) struct TaskWorkState<E: RunError> {
	pub(crate) task: Box<dyn Task<E>>,
	pub(crate) worktable: Arc<TaskWorktable>,
	pub(crate) interrupter: Arc<Interrupter>,
	pub(crate) done_tx: PanicOnSenderDrop<E>,
}

impl<E: RunError> TaskWorkState<E> {
	#[inline]
	pub fn id(&self) -> TaskId {
		self.task.id()
	}
}

#[derive(Debug)]
pub(crate) struct PanicOnSenderDrop<E: RunError> {
	task_id: TaskId,
	maybe_done_tx: Option<oneshot::Sender<Result<TaskStatus<E>, SystemError>>>,
}

impl<E: RunError> PanicOnSenderDrop<E> {
	pub fn new(
		task_id: TaskId,
		done_tx: oneshot::Sender<Result<TaskStatus<E>, SystemError>>,
	) -> Self {
		Self {
			task_id,
			maybe_done_tx: Some(done_tx),
		}
	}

	pub fn send(
		mut self,
		res: Result<TaskStatus<E>, SystemError>,
	) -> Result<(), Result<TaskStatus<E>, SystemError>> {
		self.maybe_done_tx
			.take()
			.expect("tried to send a task output twice to the same task handle")
			.send(res)
	}
}

impl<E: RunError> Drop for PanicOnSenderDrop<E> {
	#[track_caller]
	fn drop(&mut self) {
		trace!(task_id = %self.task_id, "Dropping TaskWorkState");
		assert!(
			self.maybe_done_tx.is_none(),
			"TaskHandle done channel dropped before sending a result: {}",
			std::panic::Location::caller()
		);
	}
}
