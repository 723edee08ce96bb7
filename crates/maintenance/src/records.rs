use serde::{Deserialize, Serialize};

/// Monotonically increasing image record identifier; the total, stable ordering within a user is
/// what makes the scan checkpoint a valid resume point.
pub type ImageId = i64;

/// Storage object identifier, assigned by the file index that owns the actual files.
pub type FileId = i64;

pub type FaceId = i64;

pub type PersonId = i64;

/// Version of the detection model that produced a record; scans only ever touch records matching
/// the active version.
pub type ModelVersion = i32;

pub type UserId = String;

/// One tracked image for one user.
///
/// Created by the ingestion pipeline, never mutated by maintenance code, destroyed by the stale
/// images removal when its file is gone or no longer eligible for detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
	pub id: ImageId,
	pub user_id: UserId,
	pub file_id: FileId,
	pub model_version: ModelVersion,
}

/// A face detected within an image; transitively owned by its [`ImageRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRecord {
	pub id: FaceId,
	pub image_id: ImageId,
	/// The person cluster this face was assigned to, if clustering already ran.
	pub person_id: Option<PersonId>,
}

/// A person cluster aggregating faces across many images; independently persisted, so it must be
/// invalidated (marked for re-clustering) before any of its constituent faces disappear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
	pub id: PersonId,
	pub user_id: UserId,
	pub is_valid: bool,
}
