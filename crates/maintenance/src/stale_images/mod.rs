//! Stale image reconciliation.
//!
//! A per-user, resumable scan over the known-image table: records whose file no longer exists,
//! lives on a policy-excluded mount, or sits under an exclusion marker directory are removed
//! together with their dependent face and person data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::ImageId;

mod exclusion;
mod task;

pub use exclusion::ExclusionCache;
pub use task::{Output, StaleImagesRemover};

/// How many image records are pulled from the database per batch; the checkpoint is persisted
/// once per batch.
pub const BATCH_SIZE: usize = 1000;

/// How many records are processed between interrupter checkpoints within a batch.
pub const YIELD_INTERVAL: usize = 200;

#[derive(Debug, Error)]
pub enum Error {
	#[error("database error: {0}")]
	Store(#[from] crate::store::StoreError),
	#[error("filesystem error: {0}")]
	Vfs(#[from] crate::vfs::VfsError),
}

/// Record-level oddities that don't abort a scan; collected and surfaced with the scan output.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum NonCriticalError {
	#[error("image resolves to a path without a parent directory <image_id='{0}'>")]
	ImageWithoutParentDirectory(ImageId),
}
