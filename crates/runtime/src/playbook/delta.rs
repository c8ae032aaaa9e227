//! Delta: the only way the playbook changes
//!
//! A delta is a small ordered list of ADD/UPDATE/DELETE operations on named
//! bullets. Wholesale rewrites are structurally impossible: there is no
//! "replace section" operation, and the curator's collapse guard rejects
//! deltas that touch too much of any one section.

use serde::{Deserialize, Serialize};

use super::bullet::BulletId;

/// One localized, section-scoped mutation.
///
/// The serde representation matches the curator's JSON contract:
/// `{"type": "ADD", "section": ..., "content": ...}` and so on. IDs supplied
/// by the model for ADD operations are ignored by construction; the store
/// assigns IDs on commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Operation {
    Add { section: String, content: String },
    Update { id: BulletId, content: String },
    Delete { id: BulletId },
}

impl Operation {
    /// The bullet targeted by this operation, if it names one.
    pub fn target(&self) -> Option<&BulletId> {
        match self {
            Operation::Add { .. } => None,
            Operation::Update { id, .. } => Some(id),
            Operation::Delete { id } => Some(id),
        }
    }
}

/// An ordered list of operations produced by one curation step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub operations: Vec<Operation>,
}

impl Delta {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// The outcome of committing a delta: which bullets changed and which
/// operations were dropped (with the reason logged at the drop site).
#[derive(Debug, Clone, Default)]
pub struct AppliedDelta {
    pub added: Vec<BulletId>,
    pub updated: Vec<BulletId>,
    pub deleted: Vec<BulletId>,
    /// Sections with added or updated bullets, in first-touch order;
    /// these are the dedup candidates for a proactive refine sweep
    pub affected_sections: Vec<String>,
    /// Number of operations dropped for per-operation errors
    pub dropped: usize,
}

impl AppliedDelta {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}
