//! Multi-user orchestration: one stale-images task per eligible user.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use vg_task_system::{TaskDispatcher, TaskOutput, TaskStatus};

use crate::{
	records::{ModelVersion, UserId},
	stale_images::{self, Output, StaleImagesRemover},
	store::Database,
	vfs::Vfs,
	Error,
};

/// Outcome of a sweep across all enumerated users.
#[derive(Debug, Default)]
pub struct SweepSummary {
	/// Removed-record count per user, in processing order; skipped users report zero.
	pub per_user: Vec<(UserId, u64)>,
	pub total_removed: u64,
}

/// Runs the stale images removal for every user the store enumerates, dispatching one task per
/// user and awaiting them in order.
///
/// Users whose needs-scan flag is unset (and who aren't in forced resync mode) are no-ops, logged
/// and reported with a zero count. A store or filesystem failure aborts the sweep; the failing
/// user's checkpoint stays at its last committed batch, so the next sweep resumes there.
#[instrument(skip(db, vfs, dispatcher), err)]
pub async fn sweep_eligible_users(
	db: &Database,
	vfs: &Arc<dyn Vfs>,
	model_version: ModelVersion,
	dispatcher: &TaskDispatcher<Error>,
) -> Result<SweepSummary, Error> {
	let users = db
		.users()
		.users()
		.await
		.map_err(stale_images::Error::from)?;

	info!(user_count = users.len(), "Starting stale images sweep;");

	let mut summary = SweepSummary::default();

	for user_id in users {
		let handle = dispatcher
			.dispatch(StaleImagesRemover::new(
				user_id.clone(),
				model_version,
				db.clone(),
				Arc::clone(vfs),
			))
			.await;

		match handle.await {
			Ok(TaskStatus::Done((_task_id, TaskOutput::Out(out)))) => {
				let output = out
					.downcast::<Output>()
					.expect("stale images task always returns an Output");

				if output.skipped {
					debug!(%user_id, "User skipped, no scan needed;");
				} else {
					debug!(
						%user_id,
						removed_count = output.removed_count,
						"User scan finished;"
					);
				}

				summary.total_removed += output.removed_count;
				summary.per_user.push((user_id, output.removed_count));
			}

			Ok(TaskStatus::Done((task_id, TaskOutput::Empty))) => {
				warn!(%user_id, %task_id, "Stale images task returned an empty output;");
				summary.per_user.push((user_id, 0));
			}

			Ok(TaskStatus::Canceled) => {
				warn!(%user_id, "Sweep canceled mid-run;");
				break;
			}

			Ok(TaskStatus::Shutdown(_)) => {
				warn!(%user_id, "Task system shutdown mid-sweep, user will resume from its checkpoint;");
				break;
			}

			Ok(TaskStatus::Error(e)) => return Err(e),

			Err(system_error) => {
				warn!(%user_id, %system_error, "Task system refused the sweep task;");
				break;
			}
		}
	}

	info!(
		total_removed = summary.total_removed,
		"Stale images sweep finished;"
	);

	Ok(summary)
}
