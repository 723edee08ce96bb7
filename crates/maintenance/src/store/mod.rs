//! Boundary traits for the record tables and per-user settings.
//!
//! The real persistence engine lives outside this crate; maintenance tasks only ever see these
//! traits, bundled in a [`Database`] handle. The [`memory`] module provides a reference backend.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::records::{ImageId, ImageRecord, ModelVersion, UserId};

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(String),
}

#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
	/// An ordered page of image records for `user_id`: `id > after`, matching `model_version`,
	/// ascending by id, at most `limit` entries.
	///
	/// Ascending order is mandatory, it is what makes the persisted checkpoint an exact resume
	/// point. Implementations are expected to push the filtering down to the storage engine
	/// rather than loading the full table.
	async fn images_after(
		&self,
		user_id: &str,
		model_version: ModelVersion,
		after: ImageId,
		limit: usize,
	) -> Result<Vec<ImageRecord>, StoreError>;

	async fn remove_image(&self, image_id: ImageId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait FaceStore: Send + Sync + 'static {
	async fn remove_faces_by_image(&self, image_id: ImageId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PersonStore: Send + Sync + 'static {
	/// Marks every person cluster whose membership includes one of the image's faces for
	/// re-clustering.
	///
	/// Must be called while the faces still exist: the invalidation inspects current face
	/// membership to find the affected clusters.
	async fn invalidate_persons_for_image(&self, image_id: ImageId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
	/// Last processed image id for the user's running scan; `0` means the next scan starts from
	/// the beginning.
	async fn checkpoint(&self, user_id: &str) -> Result<ImageId, StoreError>;

	async fn set_checkpoint(&self, user_id: &str, last_processed: ImageId)
		-> Result<(), StoreError>;

	/// Whether a fresh full pass over this user's records is required; cleared only after a scan
	/// completes.
	async fn needs_scan(&self, user_id: &str) -> Result<bool, StoreError>;

	async fn set_needs_scan(&self, user_id: &str, needed: bool) -> Result<(), StoreError>;

	/// Whether the user was put in forced full-resync mode, which scans regardless of
	/// [`needs_scan`](Self::needs_scan).
	async fn full_resync_requested(&self, user_id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
	/// Users eligible for processing this run, in a stable order.
	async fn users(&self) -> Result<Vec<UserId>, StoreError>;
}

/// One handle bundling all the stores, handed to maintenance tasks the way jobs receive their
/// database client.
#[derive(Clone)]
pub struct Database {
	images: Arc<dyn ImageStore>,
	faces: Arc<dyn FaceStore>,
	persons: Arc<dyn PersonStore>,
	settings: Arc<dyn SettingsStore>,
	users: Arc<dyn UserStore>,
}

impl fmt::Debug for Database {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Database").finish_non_exhaustive()
	}
}

impl Database {
	#[must_use]
	pub fn new(
		images: Arc<dyn ImageStore>,
		faces: Arc<dyn FaceStore>,
		persons: Arc<dyn PersonStore>,
		settings: Arc<dyn SettingsStore>,
		users: Arc<dyn UserStore>,
	) -> Self {
		Self {
			images,
			faces,
			persons,
			settings,
			users,
		}
	}

	#[must_use]
	pub fn images(&self) -> &dyn ImageStore {
		&*self.images
	}

	#[must_use]
	pub fn faces(&self) -> &dyn FaceStore {
		&*self.faces
	}

	#[must_use]
	pub fn persons(&self) -> &dyn PersonStore {
		&*self.persons
	}

	#[must_use]
	pub fn settings(&self) -> &dyn SettingsStore {
		&*self.settings
	}

	#[must_use]
	pub fn users(&self) -> &dyn UserStore {
		&*self.users
	}
}
