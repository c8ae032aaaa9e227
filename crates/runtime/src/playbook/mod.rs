//! The playbook: an append-mostly, deduplicated, counter-annotated bullet
//! store grouped by section
//!
//! The playbook is the evolving auxiliary context the generator consumes.
//! All mutation goes through [`PlaybookStore`], which enforces single-writer
//! discipline and hands out immutable snapshots to readers.

pub mod bullet;
pub mod delta;
pub mod refine;
pub mod store;

pub use bullet::{Bullet, BulletId, BulletTag, Tag};
pub use delta::{AppliedDelta, Delta, Operation};
pub use refine::{RefineOptions, RefineReport};
pub use store::{PlaybookDocument, PlaybookError, PlaybookStats, PlaybookStore};
