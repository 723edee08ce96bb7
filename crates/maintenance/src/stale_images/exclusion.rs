use std::{
	collections::HashSet,
	path::{Path, PathBuf},
};

use tracing::trace;

use crate::vfs::{Vfs, VfsError};

/// Memoizes "this directory has been verified not excluded" for the duration of one user's scan.
///
/// Only negative results are stored. An exclusion marker covers its whole subtree, so a marker
/// spotted once is acted on immediately and there is nothing worth remembering; a parent that
/// has been walked and found clean, on the other hand, covers every sibling that shares it.
/// The cache lives on the scan task and is never persisted.
#[derive(Debug, Default)]
pub struct ExclusionCache {
	verified_dirs: HashSet<PathBuf>,
	hits: u64,
	misses: u64,
}

impl ExclusionCache {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether `path` lives under an exclusion marker directory, consulting the cache before
	/// paying for the ancestor walk.
	pub async fn is_excluded(
		&mut self,
		vfs: &dyn Vfs,
		user_id: &str,
		path: &Path,
	) -> Result<bool, VfsError> {
		let Some(parent) = path.parent() else {
			// Nothing to key the memoization on, pay for the walk every time
			return vfs.is_under_exclusion_marker(user_id, path).await;
		};

		if self.verified_dirs.contains(parent) {
			self.hits += 1;
			return Ok(false);
		}

		self.misses += 1;

		let excluded = vfs.is_under_exclusion_marker(user_id, path).await?;

		if !excluded {
			self.verified_dirs.insert(parent.to_path_buf());
		}

		Ok(excluded)
	}

	/// Clears memoized directories and counters; called when a scan starts so nothing leaks
	/// between users.
	pub fn reset(&mut self) {
		trace!(
			hits = self.hits,
			misses = self.misses,
			"Resetting exclusion cache;"
		);

		self.verified_dirs.clear();
		self.hits = 0;
		self.misses = 0;
	}

	#[must_use]
	pub const fn hits(&self) -> u64 {
		self.hits
	}

	#[must_use]
	pub const fn misses(&self) -> u64 {
		self.misses
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::{
		collections::HashSet as StdHashSet,
		sync::atomic::{AtomicU64, Ordering},
	};

	use async_trait::async_trait;

	use crate::{
		records::FileId,
		vfs::{FileNode, VfsError},
	};

	#[derive(Debug, Default)]
	struct StubVfs {
		excluded_dirs: StdHashSet<PathBuf>,
		walks: AtomicU64,
	}

	impl StubVfs {
		fn walks(&self) -> u64 {
			self.walks.load(Ordering::Relaxed)
		}
	}

	#[async_trait]
	impl Vfs for StubVfs {
		async fn existing_files(
			&self,
			_user_id: &str,
			_file_ids: &[FileId],
		) -> Result<StdHashSet<FileId>, VfsError> {
			Ok(StdHashSet::new())
		}

		async fn resolve(
			&self,
			_user_id: &str,
			_file_id: FileId,
		) -> Result<Option<FileNode>, VfsError> {
			Ok(None)
		}

		async fn is_under_exclusion_marker(
			&self,
			_user_id: &str,
			path: &Path,
		) -> Result<bool, VfsError> {
			self.walks.fetch_add(1, Ordering::Relaxed);

			Ok(path
				.ancestors()
				.any(|ancestor| self.excluded_dirs.contains(ancestor)))
		}
	}

	#[tokio::test]
	async fn sibling_of_clean_file_hits_the_cache() {
		let vfs = StubVfs::default();
		let mut cache = ExclusionCache::new();

		assert!(!cache
			.is_excluded(&vfs, "alice", Path::new("/alice/files/album/a.jpg"))
			.await
			.unwrap());
		assert!(!cache
			.is_excluded(&vfs, "alice", Path::new("/alice/files/album/b.jpg"))
			.await
			.unwrap());

		assert_eq!(cache.misses(), 1);
		assert_eq!(cache.hits(), 1);
		assert_eq!(vfs.walks(), 1);
	}

	#[tokio::test]
	async fn excluded_results_are_never_cached() {
		let vfs = StubVfs {
			excluded_dirs: StdHashSet::from([PathBuf::from("/alice/files/private")]),
			..Default::default()
		};
		let mut cache = ExclusionCache::new();

		for path in ["/alice/files/private/a.jpg", "/alice/files/private/b.jpg"] {
			assert!(cache
				.is_excluded(&vfs, "alice", Path::new(path))
				.await
				.unwrap());
		}

		// Both siblings paid for the walk: a positive result covers its subtree but is acted on
		// immediately, so it never lands in the cache
		assert_eq!(cache.misses(), 2);
		assert_eq!(cache.hits(), 0);
		assert_eq!(vfs.walks(), 2);
	}

	#[tokio::test]
	async fn reset_drops_memoized_directories() {
		let vfs = StubVfs::default();
		let mut cache = ExclusionCache::new();

		let path = Path::new("/alice/files/album/a.jpg");

		cache.is_excluded(&vfs, "alice", path).await.unwrap();
		cache.reset();
		cache.is_excluded(&vfs, "alice", path).await.unwrap();

		assert_eq!(cache.hits(), 0);
		assert_eq!(cache.misses(), 1);
		assert_eq!(vfs.walks(), 2);
	}
}
