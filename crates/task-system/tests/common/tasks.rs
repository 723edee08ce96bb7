use std::{
	future::IntoFuture,
	sync::{Arc, Mutex},
	time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::info;

use vg_task_system::{
	check_interruption, ExecStatus, Interrupter, InterruptionKind, Task, TaskId, TaskOutput,
};

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("sample error")]
	SampleError,
}

/// A task that completes as soon as it runs.
#[derive(Debug)]
pub struct ReadyTask {
	id: TaskId,
}

impl Default for ReadyTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for ReadyTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Ok(ExecStatus::Done(TaskOutput::Empty))
	}
}

/// A task that never completes on its own, it just waits for an interruption request.
#[derive(Debug)]
pub struct NeverTask {
	id: TaskId,
}

impl Default for NeverTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for NeverTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		match interrupter.into_future().await {
			InterruptionKind::Pause => Ok(ExecStatus::Paused),
			InterruptionKind::Cancel => Ok(ExecStatus::Canceled),
		}
	}
}

/// A task that always fails.
#[derive(Debug)]
pub struct BogusTask {
	id: TaskId,
}

impl Default for BogusTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for BogusTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Err(SampleError::SampleError)
	}
}

/// A task that signals when it begins, pauses once, and completes on its second `run` invocation.
#[derive(Debug)]
pub struct PauseOnceTask {
	id: TaskId,
	began_tx: Option<oneshot::Sender<()>>,
	has_paused: bool,
}

impl PauseOnceTask {
	#[must_use]
	pub fn new() -> (Self, oneshot::Receiver<()>) {
		let (began_tx, began_rx) = oneshot::channel();

		(
			Self {
				id: TaskId::new_v4(),
				began_tx: Some(began_tx),
				has_paused: false,
			},
			began_rx,
		)
	}
}

#[async_trait]
impl Task<SampleError> for PauseOnceTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		if let Some(began_tx) = self.began_tx.take() {
			began_tx.send(()).expect("began channel closed");
		}

		if self.has_paused {
			info!("Resumed after pause, completing");
			return Ok(ExecStatus::Done(TaskOutput::Empty));
		}

		match interrupter.into_future().await {
			InterruptionKind::Pause => {
				self.has_paused = true;
				Ok(ExecStatus::Paused)
			}
			InterruptionKind::Cancel => Ok(ExecStatus::Canceled),
		}
	}
}

/// A task that appends `(label, step)` entries to a shared log, checking the interrupter between
/// steps; used to observe cooperative interleaving between tasks sharing the worker.
#[derive(Debug)]
pub struct StepLoggerTask {
	id: TaskId,
	label: char,
	next_step: u32,
	total_steps: u32,
	log: Arc<Mutex<Vec<(char, u32)>>>,
}

impl StepLoggerTask {
	#[must_use]
	pub fn new(label: char, total_steps: u32, log: Arc<Mutex<Vec<(char, u32)>>>) -> Self {
		Self {
			id: TaskId::new_v4(),
			label,
			next_step: 0,
			total_steps,
			log,
		}
	}
}

#[async_trait]
impl Task<SampleError> for StepLoggerTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		while self.next_step < self.total_steps {
			self.log
				.lock()
				.expect("step log lock poisoned")
				.push((self.label, self.next_step));
			self.next_step += 1;

			tokio::time::sleep(Duration::from_millis(1)).await;

			// Work first, then yield: every slice makes progress even when a suspend request is
			// already waiting
			check_interruption!(interrupter);
		}

		Ok(ExecStatus::Done(TaskOutput::Empty))
	}
}
