use std::{
	collections::{HashMap, HashSet},
	mem,
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, Level};

use vg_task_system::{
	ExecStatus, Interrupter, InterruptionKind, IntoAnyTaskOutput, SerializableTask, Task, TaskId,
};

use super::{ExclusionCache, BATCH_SIZE, YIELD_INTERVAL};
use crate::{
	deleter::remove_image_with_dependents,
	records::{FileId, ImageId, ImageRecord, ModelVersion},
	stale_images,
	store::{Database, StoreError},
	vfs::Vfs,
	Error,
};

/// Reconciles one user's known-image records against their storage, removing records whose file
/// is gone, policy-hidden, or under an exclusion marker directory.
///
/// The task is resumable at two granularities: the in-memory cursor advances per record, so a
/// suspended task picks up exactly where it yielded; the persisted checkpoint advances once per
/// batch, so a scan cut down by a crash redoes at most one batch.
#[derive(Debug)]
pub struct StaleImagesRemover {
	// Task control
	id: TaskId,

	// Received input args
	user_id: String,
	model_version: ModelVersion,

	// Inner state
	cursor: ImageId,
	started: bool,
	exclusion_cache: ExclusionCache,

	// Out collector
	output: Output,

	// Dependencies
	db: Database,
	vfs: Arc<dyn Vfs>,
}

/// Why a record was classified stale.
#[derive(Debug, Clone, Copy)]
enum StaleKind {
	/// Absent from the bulk existence result; no node was ever resolved for it.
	MissingFromBulk,
	/// Passed the bulk check but could not be resolved to a node anymore.
	NotResolvable,
	/// Resolved to a mount the detection policy excludes.
	PolicyMount,
	/// Lives under an exclusion marker directory.
	Excluded,
}

/// Outcome of one user's reconciliation pass.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Output {
	/// The user was skipped because no scan was needed and none was forced.
	pub skipped: bool,

	/// Records whose disposition (kept or removed) was fully resolved.
	pub scanned_count: u64,

	/// Total records removed.
	pub removed_count: u64,

	/// Removed straight from the bulk existence check, without resolving a node.
	pub missing_from_bulk: u64,

	/// Removed because the node was unresolvable or on a policy-excluded mount.
	pub policy_removed: u64,

	/// Removed because the file lives under an exclusion marker directory.
	pub excluded_removed: u64,

	/// Exclusion cache counters for this scan.
	pub exclusion_cache_hits: u64,
	pub exclusion_cache_misses: u64,

	/// Time spent scanning this user, accumulated across suspensions.
	pub scan_time: Duration,

	/// Record-level oddities that didn't abort the scan.
	pub errors: Vec<stale_images::NonCriticalError>,
}

impl Output {
	/// Flat metrics map for report sinks.
	#[must_use]
	pub fn to_metrics(&self) -> HashMap<String, serde_json::Value> {
		HashMap::from([
			("skipped".into(), json!(self.skipped)),
			("scanned_count".into(), json!(self.scanned_count)),
			("removed_count".into(), json!(self.removed_count)),
			("missing_from_bulk".into(), json!(self.missing_from_bulk)),
			("policy_removed".into(), json!(self.policy_removed)),
			("excluded_removed".into(), json!(self.excluded_removed)),
			(
				"exclusion_cache_hits".into(),
				json!(self.exclusion_cache_hits),
			),
			(
				"exclusion_cache_misses".into(),
				json!(self.exclusion_cache_misses),
			),
			("scan_time".into(), json!(self.scan_time)),
		])
	}
}

#[async_trait]
impl Task<Error> for StaleImagesRemover {
	fn id(&self) -> TaskId {
		self.id
	}

	#[instrument(
		skip(self, interrupter),
		fields(
			task_id = %self.id,
			user_id = %self.user_id,
			model_version = %self.model_version,
		),
		ret(level = Level::TRACE),
		err,
	)]
	#[allow(clippy::blocks_in_conditions)] // Due to `err` on `instrument` macro above
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		let start_time = Instant::now();

		if !self.started {
			if !self
				.scan_wanted()
				.await
				.map_err(stale_images::Error::from)?
			{
				debug!("No scan needed and none forced, skipping user;");
				self.output.skipped = true;
				self.output.scan_time = start_time.elapsed();

				return Ok(ExecStatus::Done(mem::take(&mut self.output).into_output()));
			}

			self.cursor = self
				.db
				.settings()
				.checkpoint(&self.user_id)
				.await
				.map_err(stale_images::Error::from)?;

			self.exclusion_cache.reset();
			self.started = true;

			if self.cursor > 0 {
				debug!(cursor = self.cursor, "Resuming scan from persisted checkpoint;");
			}
		}

		loop {
			let batch = self
				.db
				.images()
				.images_after(&self.user_id, self.model_version, self.cursor, BATCH_SIZE)
				.await
				.map_err(stale_images::Error::from)?;

			if batch.is_empty() {
				break;
			}

			trace!(
				batch_len = batch.len(),
				cursor = self.cursor,
				"Fetched batch of image records;"
			);

			let file_ids = batch.iter().map(|image| image.file_id).collect::<Vec<_>>();

			// One round trip classifies the whole batch; only survivors get the per-node checks
			let existing = self
				.vfs
				.existing_files(&self.user_id, &file_ids)
				.await
				.map_err(stale_images::Error::from)?;

			for (idx, image) in batch.iter().enumerate() {
				if let Some(kind) = self.classify(image, &existing).await? {
					remove_image_with_dependents(&self.db, image)
						.await
						.map_err(stale_images::Error::from)?;

					self.output.removed_count += 1;
					match kind {
						StaleKind::MissingFromBulk => self.output.missing_from_bulk += 1,
						StaleKind::NotResolvable | StaleKind::PolicyMount => {
							self.output.policy_removed += 1;
						}
						StaleKind::Excluded => self.output.excluded_removed += 1,
					}
				}

				self.output.scanned_count += 1;
				self.cursor = image.id;

				if (idx + 1) % YIELD_INTERVAL == 0 {
					if let Some(kind) = interrupter.try_check_interrupt() {
						return Ok(self.interrupt(kind, start_time));
					}
				}
			}

			// The batch is fully resolved, commit its resume point
			self.db
				.settings()
				.set_checkpoint(&self.user_id, self.cursor)
				.await
				.map_err(stale_images::Error::from)?;

			trace!(checkpoint = self.cursor, "Committed batch checkpoint;");

			if let Some(kind) = interrupter.try_check_interrupt() {
				return Ok(self.interrupt(kind, start_time));
			}
		}

		// A completed scan has no meaningful resume point
		self.db
			.settings()
			.set_checkpoint(&self.user_id, 0)
			.await
			.map_err(stale_images::Error::from)?;

		self.db
			.settings()
			.set_needs_scan(&self.user_id, false)
			.await
			.map_err(stale_images::Error::from)?;

		self.sync_cache_counters();
		self.output.scan_time += start_time.elapsed();

		debug!(
			removed_count = self.output.removed_count,
			scanned_count = self.output.scanned_count,
			"Stale images removal finished for user;"
		);

		Ok(ExecStatus::Done(mem::take(&mut self.output).into_output()))
	}
}

impl StaleImagesRemover {
	#[must_use]
	pub fn new(
		user_id: impl Into<String>,
		model_version: ModelVersion,
		db: Database,
		vfs: Arc<dyn Vfs>,
	) -> Self {
		Self {
			id: TaskId::new_v4(),
			user_id: user_id.into(),
			model_version,
			cursor: 0,
			started: false,
			exclusion_cache: ExclusionCache::new(),
			output: Output::default(),
			db,
			vfs,
		}
	}

	async fn scan_wanted(&self) -> Result<bool, StoreError> {
		if self.db.settings().needs_scan(&self.user_id).await? {
			return Ok(true);
		}

		self.db.settings().full_resync_requested(&self.user_id).await
	}

	/// `Some(kind)` when the record is stale and must be removed, `None` when it is kept.
	async fn classify(
		&mut self,
		image: &ImageRecord,
		existing: &HashSet<FileId>,
	) -> Result<Option<StaleKind>, stale_images::Error> {
		if !existing.contains(&image.file_id) {
			return Ok(Some(StaleKind::MissingFromBulk));
		}

		let Some(node) = self.vfs.resolve(&self.user_id, image.file_id).await? else {
			// The bulk index and live resolution are eventually consistent; gone is gone
			return Ok(Some(StaleKind::NotResolvable));
		};

		if !node.mount_type.detection_eligible() {
			trace!(
				file_id = image.file_id,
				mount_type = %node.mount_type,
				"File lives on a policy-excluded mount;"
			);
			return Ok(Some(StaleKind::PolicyMount));
		}

		if node.path.parent().is_none() {
			self.output
				.errors
				.push(stale_images::NonCriticalError::ImageWithoutParentDirectory(
					image.id,
				));
		}

		if self
			.exclusion_cache
			.is_excluded(&*self.vfs, &self.user_id, &node.path)
			.await?
		{
			return Ok(Some(StaleKind::Excluded));
		}

		Ok(None)
	}

	fn interrupt(&mut self, kind: InterruptionKind, start_time: Instant) -> ExecStatus {
		trace!(?kind, cursor = self.cursor, "Scan interrupted;");

		self.sync_cache_counters();
		self.output.scan_time += start_time.elapsed();

		match kind {
			InterruptionKind::Pause => ExecStatus::Paused,
			InterruptionKind::Cancel => ExecStatus::Canceled,
		}
	}

	fn sync_cache_counters(&mut self) {
		self.output.exclusion_cache_hits = self.exclusion_cache.hits();
		self.output.exclusion_cache_misses = self.exclusion_cache.misses();
	}
}

#[derive(Serialize, Deserialize)]
struct SaveState {
	id: TaskId,
	user_id: String,
	model_version: ModelVersion,
	cursor: ImageId,
	started: bool,
	output: Output,
}

impl SerializableTask<Error> for StaleImagesRemover {
	type SerializeError = rmp_serde::encode::Error;

	type DeserializeError = rmp_serde::decode::Error;

	type DeserializeCtx = (Database, Arc<dyn Vfs>);

	async fn serialize(self) -> Result<Vec<u8>, Self::SerializeError> {
		let Self {
			id,
			user_id,
			model_version,
			cursor,
			started,
			output,
			..
		} = self;

		rmp_serde::to_vec_named(&SaveState {
			id,
			user_id,
			model_version,
			cursor,
			started,
			output,
		})
	}

	async fn deserialize(
		data: &[u8],
		(db, vfs): Self::DeserializeCtx,
	) -> Result<Self, Self::DeserializeError> {
		rmp_serde::from_slice::<SaveState>(data).map(
			|SaveState {
			     id,
			     user_id,
			     model_version,
			     cursor,
			     started,
			     output,
			 }| Self {
				id,
				user_id,
				model_version,
				cursor,
				started,
				// The cache is scoped to a live scan and never persists across restarts
				exclusion_cache: ExclusionCache::new(),
				output,
				db,
				vfs,
			},
		)
	}
}
