//! In-memory reference backend for the store traits.
//!
//! Backs the test-suite and small demo setups; every mutation is also appended to an event log so
//! tests can assert ordering invariants like the deletion cascade and the checkpoint sequence.

use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::{
	Database, FaceStore, ImageStore, PersonStore, SettingsStore, StoreError, UserStore,
};
use crate::records::{
	FaceId, FaceRecord, ImageId, ImageRecord, ModelVersion, PersonId, PersonRecord, UserId,
};

/// Observable store mutations, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
	PersonsInvalidated {
		image_id: ImageId,
	},
	FacesRemoved {
		image_id: ImageId,
	},
	ImageRemoved {
		image_id: ImageId,
	},
	CheckpointSet {
		user_id: UserId,
		last_processed: ImageId,
	},
	NeedsScanSet {
		user_id: UserId,
		needed: bool,
	},
}

#[derive(Debug, Default)]
struct Tables {
	images: BTreeMap<ImageId, ImageRecord>,
	faces: BTreeMap<FaceId, FaceRecord>,
	persons: BTreeMap<PersonId, PersonRecord>,
	checkpoints: BTreeMap<UserId, ImageId>,
	needs_scan: BTreeMap<UserId, bool>,
	full_resync: BTreeMap<UserId, bool>,
	users: Vec<UserId>,
	events: Vec<StoreEvent>,
	images_after_calls: u64,
	fail_images_after_on_call: Option<u64>,
}

/// Shared-state in-memory backend; clones share the same tables.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
	inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// A [`Database`] handle serving every store trait from this backend.
	#[must_use]
	pub fn database(&self) -> Database {
		let store = Arc::new(self.clone());

		Database::new(
			Arc::clone(&store) as Arc<dyn ImageStore>,
			Arc::clone(&store) as Arc<dyn FaceStore>,
			Arc::clone(&store) as Arc<dyn PersonStore>,
			Arc::clone(&store) as Arc<dyn SettingsStore>,
			store as Arc<dyn UserStore>,
		)
	}

	pub fn insert_user(&self, user_id: impl Into<UserId>, needs_scan: bool) {
		let user_id = user_id.into();
		let mut tables = self.lock();

		tables.needs_scan.insert(user_id.clone(), needs_scan);
		tables.users.push(user_id);
	}

	pub fn insert_image(&self, record: ImageRecord) {
		self.lock().images.insert(record.id, record);
	}

	pub fn insert_face(&self, record: FaceRecord) {
		self.lock().faces.insert(record.id, record);
	}

	pub fn insert_person(&self, record: PersonRecord) {
		self.lock().persons.insert(record.id, record);
	}

	pub fn set_full_resync(&self, user_id: impl Into<UserId>, requested: bool) {
		self.lock().full_resync.insert(user_id.into(), requested);
	}

	/// Fails the nth `images_after` call (1-based) with an injected error, to simulate the
	/// storage engine going away mid-scan.
	pub fn fail_images_after_on_call(&self, call: u64) {
		self.lock().fail_images_after_on_call = Some(call);
	}

	#[must_use]
	pub fn image_count(&self) -> usize {
		self.lock().images.len()
	}

	#[must_use]
	pub fn face_count(&self) -> usize {
		self.lock().faces.len()
	}

	#[must_use]
	pub fn invalid_person_count(&self) -> usize {
		self.lock()
			.persons
			.values()
			.filter(|person| !person.is_valid)
			.count()
	}

	#[must_use]
	pub fn stored_checkpoint(&self, user_id: &str) -> ImageId {
		self.lock().checkpoints.get(user_id).copied().unwrap_or(0)
	}

	#[must_use]
	pub fn stored_needs_scan(&self, user_id: &str) -> bool {
		self.lock().needs_scan.get(user_id).copied().unwrap_or(false)
	}

	#[must_use]
	pub fn events(&self) -> Vec<StoreEvent> {
		self.lock().events.clone()
	}

	#[must_use]
	pub fn images_after_calls(&self) -> u64 {
		self.lock().images_after_calls
	}

	fn lock(&self) -> MutexGuard<'_, Tables> {
		self.inner.lock().expect("memory store lock poisoned")
	}
}

#[async_trait]
impl ImageStore for MemoryStore {
	async fn images_after(
		&self,
		user_id: &str,
		model_version: ModelVersion,
		after: ImageId,
		limit: usize,
	) -> Result<Vec<ImageRecord>, StoreError> {
		let mut tables = self.lock();

		tables.images_after_calls += 1;

		if tables.fail_images_after_on_call == Some(tables.images_after_calls) {
			return Err(StoreError::Database(
				"injected failure fetching image records".into(),
			));
		}

		// BTreeMap iteration comes out id-ordered, which is the ordering contract
		Ok(tables
			.images
			.values()
			.filter(|image| {
				image.user_id == user_id
					&& image.model_version == model_version
					&& image.id > after
			})
			.take(limit)
			.cloned()
			.collect())
	}

	async fn remove_image(&self, image_id: ImageId) -> Result<(), StoreError> {
		let mut tables = self.lock();

		tables.images.remove(&image_id);
		tables.events.push(StoreEvent::ImageRemoved { image_id });

		Ok(())
	}
}

#[async_trait]
impl FaceStore for MemoryStore {
	async fn remove_faces_by_image(&self, image_id: ImageId) -> Result<(), StoreError> {
		let mut tables = self.lock();

		tables.faces.retain(|_, face| face.image_id != image_id);
		tables.events.push(StoreEvent::FacesRemoved { image_id });

		Ok(())
	}
}

#[async_trait]
impl PersonStore for MemoryStore {
	async fn invalidate_persons_for_image(&self, image_id: ImageId) -> Result<(), StoreError> {
		let mut tables = self.lock();

		let affected_persons = tables
			.faces
			.values()
			.filter(|face| face.image_id == image_id)
			.filter_map(|face| face.person_id)
			.collect::<Vec<_>>();

		for person_id in affected_persons {
			if let Some(person) = tables.persons.get_mut(&person_id) {
				person.is_valid = false;
			}
		}

		tables
			.events
			.push(StoreEvent::PersonsInvalidated { image_id });

		Ok(())
	}
}

#[async_trait]
impl SettingsStore for MemoryStore {
	async fn checkpoint(&self, user_id: &str) -> Result<ImageId, StoreError> {
		Ok(self.lock().checkpoints.get(user_id).copied().unwrap_or(0))
	}

	async fn set_checkpoint(
		&self,
		user_id: &str,
		last_processed: ImageId,
	) -> Result<(), StoreError> {
		let mut tables = self.lock();

		tables.checkpoints.insert(user_id.to_owned(), last_processed);
		tables.events.push(StoreEvent::CheckpointSet {
			user_id: user_id.to_owned(),
			last_processed,
		});

		Ok(())
	}

	async fn needs_scan(&self, user_id: &str) -> Result<bool, StoreError> {
		Ok(self.lock().needs_scan.get(user_id).copied().unwrap_or(false))
	}

	async fn set_needs_scan(&self, user_id: &str, needed: bool) -> Result<(), StoreError> {
		let mut tables = self.lock();

		tables.needs_scan.insert(user_id.to_owned(), needed);
		tables.events.push(StoreEvent::NeedsScanSet {
			user_id: user_id.to_owned(),
			needed,
		});

		Ok(())
	}

	async fn full_resync_requested(&self, user_id: &str) -> Result<bool, StoreError> {
		Ok(self
			.lock()
			.full_resync
			.get(user_id)
			.copied()
			.unwrap_or(false))
	}
}

#[async_trait]
impl UserStore for MemoryStore {
	async fn users(&self) -> Result<Vec<UserId>, StoreError> {
		Ok(self.lock().users.clone())
	}
}
