//! Filesystem boundary consumed by maintenance tasks.
//!
//! Existence is answered in bulk (one round trip per batch, the scan's main throughput lever),
//! resolution yields at most one node with its mount classification, and the exclusion check is
//! the expensive ancestor walk that [`ExclusionCache`](crate::stale_images::ExclusionCache)
//! amortizes.

use std::{
	collections::HashSet,
	fmt,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::FileId;

pub mod local;

pub use local::LocalVfs;

/// Marker file names whose presence excludes a directory subtree from detection.
pub const EXCLUSION_MARKERS: [&str; 2] = [".nomedia", ".noface"];

/// File I/O error that includes the path that caused the error
#[derive(Debug, Error)]
#[error("file I/O error: {source}; path: '{}'", .path.display())]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: std::io::Error,
}

impl FileIOError {
	pub fn from_std_io_err(path: impl AsRef<Path>, source: std::io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
		}
	}
}

#[derive(Debug, Error)]
pub enum VfsError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("storage backend error: {0}")]
	Backend(String),
}

/// Type of mount (system, external, etc) a resolved node lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountType {
	/// The user's own system storage
	System,
	/// External/removable storage
	External,
	/// Network-attached or shared storage
	Network,
	/// Virtual/container storage
	Virtual,
}

impl MountType {
	#[must_use]
	pub fn from_string(mount_type: &str) -> Self {
		match mount_type {
			"External" => Self::External,
			"Network" => Self::Network,
			"Virtual" => Self::Virtual,
			_ => Self::System,
		}
	}

	/// Only files on the user's own system storage are eligible for detection; external, shared
	/// and virtual mounts are excluded by policy, so records pointing there count as stale.
	#[must_use]
	pub const fn detection_eligible(self) -> bool {
		matches!(self, Self::System)
	}
}

impl fmt::Display for MountType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::System => write!(f, "System"),
			Self::External => write!(f, "External"),
			Self::Network => write!(f, "Network"),
			Self::Virtual => write!(f, "Virtual"),
		}
	}
}

/// A resolved filesystem node for a tracked storage object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
	pub file_id: FileId,
	pub path: PathBuf,
	pub mount_type: MountType,
}

#[async_trait]
pub trait Vfs: fmt::Debug + Send + Sync + 'static {
	/// Bulk existence check: the subset of `file_ids` currently present in `user_id`'s storage
	/// scope, answered in a single round trip.
	async fn existing_files(
		&self,
		user_id: &str,
		file_ids: &[FileId],
	) -> Result<HashSet<FileId>, VfsError>;

	/// Resolves a storage object to at most one filesystem node.
	///
	/// `None` is a normal answer: the bulk index and live resolution are only eventually
	/// consistent, so callers treat an unresolvable object as gone, not as an error.
	async fn resolve(&self, user_id: &str, file_id: FileId) -> Result<Option<FileNode>, VfsError>;

	/// Walks the ancestor directories of `path` looking for an exclusion marker.
	///
	/// This is the expensive per-node check; scans only reach for it after the bulk existence
	/// lookup passed, and memoize negative answers per parent directory.
	async fn is_under_exclusion_marker(
		&self,
		user_id: &str,
		path: &Path,
	) -> Result<bool, VfsError>;
}
