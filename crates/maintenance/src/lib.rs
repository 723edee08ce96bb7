//! Visage maintenance core.
//!
//! Background reconciliation for the face-recognition backend: long-lived, resumable tasks that
//! keep the known-image, face, and person tables consistent with what is actually on storage.
//! Tasks run on [`vg_task_system`]'s cooperative single-worker runtime and reach the persistence
//! engine and the filesystem only through the boundary traits in [`store`] and [`vfs`].

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use thiserror::Error;

pub mod deleter;
pub mod records;
pub mod stale_images;
pub mod store;
pub mod sweep;
pub mod vfs;

/// Unified error type for maintenance tasks, as the task system requires.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	StaleImages(#[from] stale_images::Error),
}
