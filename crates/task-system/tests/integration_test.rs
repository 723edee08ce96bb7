use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_test::traced_test;

use vg_task_system::{TaskOutput, TaskStatus, TaskSystem};

mod common;

use common::tasks::{BogusTask, NeverTask, PauseOnceTask, ReadyTask, SampleError, StepLoggerTask};

#[tokio::test]
#[traced_test]
async fn done_test() {
	let system = TaskSystem::new();

	let handle = system.dispatch(ReadyTask::default()).await;

	assert!(matches!(
		handle.await,
		Ok(TaskStatus::Done((_task_id, TaskOutput::Empty)))
	));

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn cancel_test() {
	let system = TaskSystem::new();

	let handle = system.dispatch(NeverTask::default()).await;

	info!("issuing cancel");
	handle.cancel().await.unwrap();

	assert!(matches!(handle.await, Ok(TaskStatus::Canceled)));

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn error_test() {
	let system = TaskSystem::new();

	let handle = system.dispatch(BogusTask::default()).await;

	assert!(matches!(
		handle.await,
		Ok(TaskStatus::Error(SampleError::SampleError))
	));

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn pause_test() {
	let system = TaskSystem::new();

	let (task, began_rx) = PauseOnceTask::new();

	let handle = system.dispatch(task).await;

	info!("Task dispatched, now we wait for it to begin...");

	began_rx.await.unwrap();

	handle.pause().await.unwrap();

	info!("Paused task, now we resume it...");

	handle.resume().await.unwrap();

	info!("Resumed task, now we wait for it to complete...");

	assert!(matches!(
		handle.await,
		Ok(TaskStatus::Done((_task_id, TaskOutput::Empty)))
	));

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn shutdown_test() {
	let system = TaskSystem::new();

	let handle = system.dispatch(NeverTask::default()).await;

	system.shutdown().await;

	assert!(matches!(handle.await, Ok(TaskStatus::Shutdown(_))));
}

#[tokio::test]
#[traced_test]
async fn interleave_test() {
	let system = TaskSystem::new();

	let log = Arc::new(Mutex::new(Vec::new()));

	let handles = system
		.dispatch_many(vec![
			StepLoggerTask::new('a', 100, Arc::clone(&log)),
			StepLoggerTask::new('b', 100, Arc::clone(&log)),
		])
		.await;

	for handle in handles {
		assert!(matches!(
			handle.await,
			Ok(TaskStatus::Done((_task_id, TaskOutput::Empty)))
		));
	}

	{
		let log = log.lock().unwrap();

		assert_eq!(log.len(), 200);

		// With a single cooperative worker, the second task can only have run at all if the
		// first one suspended at a checkpoint before finishing
		let first_b = log
			.iter()
			.position(|(label, _)| *label == 'b')
			.expect("task b never ran");
		let last_a = log
			.iter()
			.rposition(|(label, _)| *label == 'a')
			.expect("task a never ran");

		assert!(
			first_b < last_a,
			"tasks did not interleave: first b step at {first_b}, last a step at {last_a}"
		);
	}

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn cancel_queued_task_test() {
	let system = TaskSystem::new();

	// Occupies the worker until shutdown
	let never_handle = system.dispatch(NeverTask::default()).await;

	let (task, _began_rx) = PauseOnceTask::new();
	let queued_handle = system.dispatch(task).await;

	queued_handle.cancel().await.unwrap();

	assert!(matches!(queued_handle.await, Ok(TaskStatus::Canceled)));

	system.shutdown().await;

	assert!(matches!(never_handle.await, Ok(TaskStatus::Shutdown(_))));
}
