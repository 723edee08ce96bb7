//! The shared cascade for removing an image record and everything that depends on it.
//!
//! Every maintenance task that drops image records goes through here; the ordering below is a
//! cross-cutting invariant and must not be re-spelled at call sites.

use tracing::trace;

use crate::{
	records::ImageRecord,
	store::{Database, StoreError},
};

/// Deletes a stale image record and its dependents.
///
/// Person invalidation runs first: it inspects the faces that still reference the image to find
/// the affected clusters. Only then the faces are removed, and the image record last.
pub async fn remove_image_with_dependents(
	db: &Database,
	image: &ImageRecord,
) -> Result<(), StoreError> {
	trace!(
		image_id = image.id,
		file_id = image.file_id,
		"Removing stale image record and its dependents;"
	);

	db.persons().invalidate_persons_for_image(image.id).await?;
	db.faces().remove_faces_by_image(image.id).await?;
	db.images().remove_image(image.id).await?;

	Ok(())
}
