//! Bullet: the atomic unit of the playbook
//!
//! A bullet is an ID'd, counter-annotated piece of strategic knowledge.
//! IDs are namespaced by section prefix and never reused; counters only
//! ever increase.

use serde::{Deserialize, Serialize};

/// Opaque bullet identifier, `<prefix>-NNNNN` (e.g. `ctx-00263`).
///
/// Assigned by the store at creation, globally unique for the playbook's
/// entire lifetime. Deleted IDs are tombstoned, never reissued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BulletId(String);

impl BulletId {
    /// Format an ID from a section prefix and sequence number.
    pub fn new(prefix: &str, sequence: u64) -> Self {
        Self(format!("{prefix}-{sequence:05}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(prefix, sequence)`, if the ID is well-formed.
    pub fn parts(&self) -> Option<(&str, u64)> {
        let (prefix, seq) = self.0.rsplit_once('-')?;
        let sequence = seq.parse::<u64>().ok()?;
        Some((prefix, sequence))
    }
}

impl std::fmt::Display for BulletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BulletId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BulletId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single playbook bullet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    pub id: BulletId,
    pub section: String,
    pub content: String,
    pub helpful_count: u32,
    pub harmful_count: u32,
    /// Lazily computed, invalidated on content mutation, never persisted.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Logical creation timestamp (monotonic store counter)
    pub created_at: u64,
    /// Logical timestamp of the last content mutation
    pub updated_at: u64,
}

impl Bullet {
    /// Net usefulness signal used by refinement retention and pruning.
    pub fn score(&self) -> i64 {
        i64::from(self.helpful_count) - i64::from(self.harmful_count)
    }

    /// The generator-facing rendering of this bullet.
    pub fn render_line(&self) -> String {
        format!(
            "[{}] helpful={} harmful={} :: {}",
            self.id, self.helpful_count, self.harmful_count, self.content
        )
    }
}

/// Reflector verdict on a cited bullet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Helpful,
    Harmful,
    Neutral,
}

/// A per-bullet tag from the reflector, restricted to cited IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletTag {
    pub id: BulletId,
    pub tag: Tag,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bullet_id_format() {
        let id = BulletId::new("ctx", 263);
        assert_eq!(id.as_str(), "ctx-00263");
        assert_eq!(id.parts(), Some(("ctx", 263)));
    }

    #[test]
    fn test_bullet_id_parts_rejects_malformed() {
        assert_eq!(BulletId::from("nodash").parts(), None);
        assert_eq!(BulletId::from("ctx-xyz").parts(), None);
    }

    #[test]
    fn test_render_line_format() {
        let bullet = Bullet {
            id: BulletId::new("ctx", 1),
            section: "strategies_and_hard_rules".into(),
            content: "Prefer the contacts API over description parsing.".into(),
            helpful_count: 3,
            harmful_count: 1,
            embedding: None,
            created_at: 10,
            updated_at: 10,
        };
        assert_eq!(
            bullet.render_line(),
            "[ctx-00001] helpful=3 harmful=1 :: Prefer the contacts API over description parsing."
        );
        assert_eq!(bullet.score(), 2);
    }

    #[test]
    fn test_tag_serde_is_snake_case() {
        let json = serde_json::to_string(&Tag::Helpful).unwrap();
        assert_eq!(json, "\"helpful\"");
        let tag: Tag = serde_json::from_str("\"neutral\"").unwrap();
        assert_eq!(tag, Tag::Neutral);
    }

    #[test]
    fn test_bullet_serde_skips_embedding() {
        let bullet = Bullet {
            id: BulletId::new("api", 2),
            section: "apis_to_use_for_specific_information".into(),
            content: "x".into(),
            helpful_count: 0,
            harmful_count: 0,
            embedding: Some(vec![0.1, 0.2]),
            created_at: 1,
            updated_at: 1,
        };
        let json = serde_json::to_string(&bullet).unwrap();
        assert!(!json.contains("embedding"));
        let restored: Bullet = serde_json::from_str(&json).unwrap();
        assert!(restored.embedding.is_none());
    }
}
