//! Local-disk implementation of the [`Vfs`] boundary, for single-node deployments and the
//! test-suite.

use std::{
	collections::{HashMap, HashSet},
	path::{Path, PathBuf},
	sync::Mutex,
};

use async_trait::async_trait;
use tokio::fs;
use tracing::trace;

use super::{FileIOError, FileNode, MountType, Vfs, VfsError, EXCLUSION_MARKERS};
use crate::records::{FileId, UserId};

/// Serves a directory tree where each user's files live under `<root>/<user_id>/files`.
///
/// Storage object ids map to user-relative paths through a catalog the caller maintains; in a
/// real deployment that mapping belongs to the file index. Mount types are classified through a
/// table of user-relative path prefixes, longest prefix wins, everything else is [`MountType::System`].
#[derive(Debug)]
pub struct LocalVfs {
	root: PathBuf,
	catalog: Mutex<HashMap<(UserId, FileId), PathBuf>>,
	mounts: Vec<(PathBuf, MountType)>,
}

impl LocalVfs {
	#[must_use]
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			catalog: Mutex::new(HashMap::new()),
			mounts: Vec::new(),
		}
	}

	/// Classifies every file under the user-relative `prefix` as living on `mount_type`.
	#[must_use]
	pub fn with_mount(mut self, prefix: impl Into<PathBuf>, mount_type: MountType) -> Self {
		self.mounts.push((prefix.into(), mount_type));
		self
	}

	/// Registers the user-relative path a storage object id resolves to.
	pub fn register_file(
		&self,
		user_id: impl Into<UserId>,
		file_id: FileId,
		relative_path: impl Into<PathBuf>,
	) {
		self.catalog
			.lock()
			.expect("vfs catalog lock poisoned")
			.insert((user_id.into(), file_id), relative_path.into());
	}

	fn user_root(&self, user_id: &str) -> PathBuf {
		self.root.join(user_id).join("files")
	}

	fn relative_path(&self, user_id: &str, file_id: FileId) -> Option<PathBuf> {
		self.catalog
			.lock()
			.expect("vfs catalog lock poisoned")
			.get(&(user_id.to_owned(), file_id))
			.cloned()
	}

	fn classify_mount(&self, relative_path: &Path) -> MountType {
		self.mounts
			.iter()
			.filter(|(prefix, _)| relative_path.starts_with(prefix))
			.max_by_key(|(prefix, _)| prefix.components().count())
			.map_or(MountType::System, |(_, mount_type)| *mount_type)
	}
}

#[async_trait]
impl Vfs for LocalVfs {
	async fn existing_files(
		&self,
		user_id: &str,
		file_ids: &[FileId],
	) -> Result<HashSet<FileId>, VfsError> {
		let user_root = self.user_root(user_id);
		let mut existing = HashSet::with_capacity(file_ids.len());

		for &file_id in file_ids {
			let Some(relative_path) = self.relative_path(user_id, file_id) else {
				continue;
			};

			let path = user_root.join(relative_path);

			if fs::try_exists(&path)
				.await
				.map_err(|e| FileIOError::from_std_io_err(&path, e))?
			{
				existing.insert(file_id);
			}
		}

		trace!(
			user_id,
			queried = file_ids.len(),
			existing = existing.len(),
			"Answered bulk existence check;"
		);

		Ok(existing)
	}

	async fn resolve(&self, user_id: &str, file_id: FileId) -> Result<Option<FileNode>, VfsError> {
		let Some(relative_path) = self.relative_path(user_id, file_id) else {
			return Ok(None);
		};

		let path = self.user_root(user_id).join(&relative_path);

		if !fs::try_exists(&path)
			.await
			.map_err(|e| FileIOError::from_std_io_err(&path, e))?
		{
			return Ok(None);
		}

		Ok(Some(FileNode {
			file_id,
			mount_type: self.classify_mount(&relative_path),
			path,
		}))
	}

	async fn is_under_exclusion_marker(
		&self,
		user_id: &str,
		path: &Path,
	) -> Result<bool, VfsError> {
		let user_root = self.user_root(user_id);

		let mut current = path.parent();

		while let Some(dir) = current {
			// The walk never leaves the user's own files subtree
			if !dir.starts_with(&user_root) {
				break;
			}

			for marker in EXCLUSION_MARKERS {
				let marker_path = dir.join(marker);

				if fs::try_exists(&marker_path)
					.await
					.map_err(|e| FileIOError::from_std_io_err(&marker_path, e))?
				{
					trace!(marker_path = %marker_path.display(), "Found exclusion marker;");
					return Ok(true);
				}
			}

			current = dir.parent();
		}

		Ok(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tokio::fs;

	async fn touch(path: &Path) {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).await.unwrap();
		}
		fs::write(path, b"").await.unwrap();
	}

	#[tokio::test]
	async fn existence_and_resolution() {
		let dir = tempfile::tempdir().unwrap();
		let vfs = LocalVfs::new(dir.path()).with_mount("usb", MountType::External);

		let user_root = dir.path().join("alice/files");
		touch(&user_root.join("album/a.jpg")).await;
		touch(&user_root.join("usb/b.jpg")).await;

		vfs.register_file("alice", 1, "album/a.jpg");
		vfs.register_file("alice", 2, "usb/b.jpg");
		vfs.register_file("alice", 3, "album/deleted.jpg");

		let existing = vfs.existing_files("alice", &[1, 2, 3, 4]).await.unwrap();
		assert_eq!(existing, HashSet::from([1, 2]));

		let node = vfs.resolve("alice", 1).await.unwrap().unwrap();
		assert_eq!(node.mount_type, MountType::System);

		let node = vfs.resolve("alice", 2).await.unwrap().unwrap();
		assert_eq!(node.mount_type, MountType::External);

		assert!(vfs.resolve("alice", 3).await.unwrap().is_none());
		assert!(vfs.resolve("alice", 4).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn marker_walk_stops_at_user_root() {
		let dir = tempfile::tempdir().unwrap();
		let vfs = LocalVfs::new(dir.path());

		let user_root = dir.path().join("bob/files");
		touch(&user_root.join("hidden/sub/a.jpg")).await;
		touch(&user_root.join("hidden/.nomedia")).await;
		touch(&user_root.join("visible/b.jpg")).await;
		// A marker above the user's files subtree must not leak into the walk
		touch(&dir.path().join("bob/.nomedia")).await;

		assert!(vfs
			.is_under_exclusion_marker("bob", &user_root.join("hidden/sub/a.jpg"))
			.await
			.unwrap());

		assert!(!vfs
			.is_under_exclusion_marker("bob", &user_root.join("visible/b.jpg"))
			.await
			.unwrap());
	}
}
