//! Playbook store: single-writer bullet collection with snapshot reads
//!
//! Owns all bullets. Mutation happens only through [`PlaybookStore::apply`],
//! [`PlaybookStore::tag_cited`], and the grow-and-refine sweep; readers get
//! cloned snapshots and never hold the lock across a suspension point.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::config::SectionConfig;

use super::bullet::{Bullet, BulletId, BulletTag, Tag};
use super::delta::{AppliedDelta, Delta, Operation};

/// Errors from playbook operations.
#[derive(Debug, thiserror::Error)]
pub enum PlaybookError {
    #[error("Unknown or tombstoned bullet ID: {id}")]
    UnknownBulletId { id: BulletId },

    #[error("Bullet content of {size} bytes exceeds the {cap}-byte cap (section {section})")]
    OversizedBullet {
        section: String,
        size: usize,
        cap: usize,
    },

    #[error("Unknown section: {section}")]
    UnknownSection { section: String },

    #[error("Checkpoint error: {reason}")]
    Checkpoint { reason: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Embedding failed during refinement: {0}")]
    Embedding(String),
}

/// Mutable playbook state, guarded by the store's writer lock.
pub(crate) struct PlaybookState {
    /// Configured sections, in rendering order
    pub(crate) sections: Vec<SectionConfig>,
    /// Live bullets per section, in insertion order
    pub(crate) live: BTreeMap<String, Vec<Bullet>>,
    /// IDs of deleted bullets; never reissued
    pub(crate) tombstones: BTreeSet<BulletId>,
    /// Next sequence number per section prefix
    pub(crate) next_id: BTreeMap<String, u64>,
    /// Logical clock, bumped on every content mutation
    pub(crate) clock: u64,
}

impl PlaybookState {
    fn find(&self, id: &BulletId) -> Option<&Bullet> {
        self.live.values().flatten().find(|b| &b.id == id)
    }

    fn find_mut(&mut self, id: &BulletId) -> Option<&mut Bullet> {
        self.live.values_mut().flatten().find(|b| &b.id == id)
    }

    fn prefix_of(&self, section: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == section)
            .map(|s| s.prefix.as_str())
    }
}

/// Statistics snapshot for logging and the `show` command.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybookStats {
    pub live_by_section: BTreeMap<String, usize>,
    pub live_total: usize,
    pub tombstoned: usize,
    pub helpful_total: u64,
    pub harmful_total: u64,
}

/// The persisted playbook format (version 1). Embeddings are not persisted;
/// they are recomputed on demand after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookDocument {
    pub version: u32,
    pub sections: Vec<String>,
    pub next_id: BTreeMap<String, u64>,
    pub tombstones: Vec<BulletId>,
    pub bullets: Vec<Bullet>,
}

impl PlaybookDocument {
    /// Render the document the way the store renders a live playbook.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let bullets: Vec<&Bullet> =
                self.bullets.iter().filter(|b| &b.section == section).collect();
            render_section(&mut out, section, &bullets);
        }
        out
    }
}

fn render_section(out: &mut String, name: &str, bullets: &[&Bullet]) {
    if bullets.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str("## ");
    out.push_str(name);
    out.push('\n');
    for bullet in bullets {
        out.push_str(&bullet.render_line());
        out.push('\n');
    }
}

/// Thread-safe playbook store with single-writer mutation.
pub struct PlaybookStore {
    pub(crate) inner: RwLock<PlaybookState>,
    bpe: Option<tiktoken_rs::CoreBPE>,
}

impl PlaybookStore {
    /// Create an empty playbook over the configured sections.
    pub fn new(sections: Vec<SectionConfig>) -> Self {
        let live = sections
            .iter()
            .map(|s| (s.name.clone(), Vec::new()))
            .collect();
        let next_id = sections.iter().map(|s| (s.prefix.clone(), 1)).collect();

        Self {
            inner: RwLock::new(PlaybookState {
                sections,
                live,
                tombstones: BTreeSet::new(),
                next_id,
                clock: 0,
            }),
            bpe: tiktoken_rs::cl100k_base().ok(),
        }
    }

    /// Configured sections, in rendering order.
    pub fn sections(&self) -> Vec<SectionConfig> {
        self.inner.read().sections.clone()
    }

    /// Produce the generator-facing playbook view. Section order is the
    /// configured order; within-section order is insertion order of live
    /// bullets. Empty sections are omitted.
    pub fn render(&self, filter: Option<&[String]>) -> String {
        let state = self.inner.read();
        let mut out = String::new();
        for section in &state.sections {
            if let Some(wanted) = filter {
                if !wanted.iter().any(|w| w == &section.name) {
                    continue;
                }
            }
            if let Some(bullets) = state.live.get(&section.name) {
                let refs: Vec<&Bullet> = bullets.iter().collect();
                render_section(&mut out, &section.name, &refs);
            }
        }
        out
    }

    /// Token count of the full render, for refinement budgets. Uses
    /// cl100k_base when available, a chars/4 heuristic otherwise.
    pub fn render_token_count(&self) -> usize {
        self.count_tokens(&self.render(None))
    }

    pub(crate) fn count_tokens(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.chars().count() / 4,
        }
    }

    /// Return just the cited bullets, in the order they were rendered.
    pub fn snapshot_for_cited(&self, cited: &[BulletId]) -> Vec<Bullet> {
        let wanted: HashSet<&BulletId> = cited.iter().collect();
        let state = self.inner.read();
        let mut out = Vec::new();
        for section in &state.sections {
            if let Some(bullets) = state.live.get(&section.name) {
                for bullet in bullets {
                    if wanted.contains(&bullet.id) {
                        out.push(bullet.clone());
                    }
                }
            }
        }
        out
    }

    /// Set of all live bullet IDs.
    pub fn live_ids(&self) -> HashSet<BulletId> {
        self.inner
            .read()
            .live
            .values()
            .flatten()
            .map(|b| b.id.clone())
            .collect()
    }

    /// Number of live bullets in one section.
    pub fn live_count(&self, section: &str) -> usize {
        self.inner
            .read()
            .live
            .get(section)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total number of live bullets.
    pub fn len(&self) -> usize {
        self.inner.read().live.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a live bullet by ID.
    pub fn get(&self, id: &BulletId) -> Option<Bullet> {
        self.inner.read().find(id).cloned()
    }

    /// Atomically apply a delta. Per-operation failures (unknown section,
    /// unknown or tombstoned ID, oversized content) are logged and dropped;
    /// the rest of the delta is applied. ADD assigns the next sequential
    /// section-scoped ID, UPDATE invalidates the embedding, DELETE moves the
    /// bullet to the tombstone set.
    pub fn apply(&self, delta: &Delta, max_bullet_bytes: usize) -> AppliedDelta {
        let mut state = self.inner.write();
        let mut applied = AppliedDelta::default();

        for op in &delta.operations {
            match op {
                Operation::Add { section, content } => {
                    let Some(prefix) = state.prefix_of(section).map(str::to_string) else {
                        tracing::warn!(section = %section, "dropping ADD for unknown section");
                        applied.dropped += 1;
                        continue;
                    };
                    if content.len() > max_bullet_bytes {
                        tracing::warn!(
                            section = %section,
                            size = content.len(),
                            cap = max_bullet_bytes,
                            "dropping oversized ADD"
                        );
                        applied.dropped += 1;
                        continue;
                    }

                    let sequence = state.next_id.entry(prefix.clone()).or_insert(1);
                    let id = BulletId::new(&prefix, *sequence);
                    *sequence += 1;

                    state.clock += 1;
                    let clock = state.clock;
                    let bullet = Bullet {
                        id: id.clone(),
                        section: section.clone(),
                        content: content.clone(),
                        helpful_count: 0,
                        harmful_count: 0,
                        embedding: None,
                        created_at: clock,
                        updated_at: clock,
                    };
                    if let Some(bullets) = state.live.get_mut(section) {
                        bullets.push(bullet);
                    }

                    tracing::debug!(id = %id, section = %section, "added bullet");
                    if !applied.affected_sections.contains(section) {
                        applied.affected_sections.push(section.clone());
                    }
                    applied.added.push(id);
                }
                Operation::Update { id, content } => {
                    if content.len() > max_bullet_bytes {
                        tracing::warn!(
                            id = %id,
                            size = content.len(),
                            cap = max_bullet_bytes,
                            "dropping oversized UPDATE"
                        );
                        applied.dropped += 1;
                        continue;
                    }
                    state.clock += 1;
                    let clock = state.clock;
                    let Some(bullet) = state.find_mut(id) else {
                        // Clock bump without a mutation is harmless; the
                        // counter only has to be monotonic.
                        tracing::warn!(id = %id, "dropping UPDATE for unknown bullet");
                        applied.dropped += 1;
                        continue;
                    };
                    bullet.content = content.clone();
                    bullet.updated_at = clock;
                    bullet.embedding = None;
                    let section = bullet.section.clone();

                    tracing::debug!(id = %id, "updated bullet");
                    if !applied.affected_sections.contains(&section) {
                        applied.affected_sections.push(section);
                    }
                    applied.updated.push(id.clone());
                }
                Operation::Delete { id } => {
                    let Some(section) = state.find(id).map(|b| b.section.clone()) else {
                        tracing::warn!(id = %id, "dropping DELETE for unknown bullet");
                        applied.dropped += 1;
                        continue;
                    };
                    if let Some(bullets) = state.live.get_mut(&section) {
                        bullets.retain(|b| &b.id != id);
                    }
                    state.tombstones.insert(id.clone());
                    state.clock += 1;

                    tracing::debug!(id = %id, section = %section, "deleted bullet");
                    applied.deleted.push(id.clone());
                }
            }
        }

        applied
    }

    /// Atomically increment helpful/harmful counters according to the
    /// reflector's tags. Only IDs present in both the cited set and the tag
    /// list are touched; neutral tags are no-ops. Returns how many counters
    /// were incremented.
    pub fn tag_cited(&self, cited: &HashSet<BulletId>, tags: &[BulletTag]) -> usize {
        let mut state = self.inner.write();
        let mut touched = 0;
        for tag in tags {
            if !cited.contains(&tag.id) {
                tracing::debug!(id = %tag.id, "ignoring tag for uncited bullet");
                continue;
            }
            let Some(bullet) = state.find_mut(&tag.id) else {
                tracing::debug!(id = %tag.id, "ignoring tag for unknown bullet");
                continue;
            };
            match tag.tag {
                Tag::Helpful => {
                    bullet.helpful_count += 1;
                    touched += 1;
                }
                Tag::Harmful => {
                    bullet.harmful_count += 1;
                    touched += 1;
                }
                Tag::Neutral => {}
            }
        }
        touched
    }

    /// Serialize the full store into the persisted document format.
    pub fn checkpoint(&self) -> PlaybookDocument {
        let state = self.inner.read();
        let mut bullets = Vec::with_capacity(state.live.values().map(Vec::len).sum());
        for section in &state.sections {
            if let Some(section_bullets) = state.live.get(&section.name) {
                bullets.extend(section_bullets.iter().cloned());
            }
        }
        PlaybookDocument {
            version: 1,
            sections: state.sections.iter().map(|s| s.name.clone()).collect(),
            next_id: state.next_id.clone(),
            tombstones: state.tombstones.iter().cloned().collect(),
            bullets,
        }
    }

    /// Rebuild a store from a persisted document. The configured sections
    /// must cover every section named in the document; ID uniqueness and
    /// sequence counters are validated on the way in.
    pub fn restore(
        doc: PlaybookDocument,
        sections: Vec<SectionConfig>,
    ) -> Result<Self, PlaybookError> {
        if doc.version != 1 {
            return Err(PlaybookError::Checkpoint {
                reason: format!("unsupported version {}", doc.version),
            });
        }

        let known: HashSet<&str> = sections.iter().map(|s| s.name.as_str()).collect();
        for name in &doc.sections {
            if !known.contains(name.as_str()) {
                return Err(PlaybookError::Checkpoint {
                    reason: format!("document section '{name}' missing from configuration"),
                });
            }
        }

        let mut seen: HashSet<BulletId> = doc.tombstones.iter().cloned().collect();
        if seen.len() != doc.tombstones.len() {
            return Err(PlaybookError::Checkpoint {
                reason: "duplicate tombstone IDs".into(),
            });
        }

        let mut live: BTreeMap<String, Vec<Bullet>> = sections
            .iter()
            .map(|s| (s.name.clone(), Vec::new()))
            .collect();
        let mut next_id = doc.next_id.clone();
        let mut clock = 0;

        for bullet in doc.bullets {
            if !known.contains(bullet.section.as_str()) {
                return Err(PlaybookError::Checkpoint {
                    reason: format!("bullet {} names unknown section", bullet.id),
                });
            }
            if !seen.insert(bullet.id.clone()) {
                return Err(PlaybookError::Checkpoint {
                    reason: format!("duplicate bullet ID {}", bullet.id),
                });
            }
            if let Some((prefix, sequence)) = bullet.id.parts() {
                let next = next_id.entry(prefix.to_string()).or_insert(1);
                if *next <= sequence {
                    tracing::warn!(
                        id = %bullet.id,
                        "next_id counter behind existing ID, advancing"
                    );
                    *next = sequence + 1;
                }
            }
            clock = clock.max(bullet.created_at).max(bullet.updated_at);
            if let Some(bullets) = live.get_mut(&bullet.section) {
                bullets.push(bullet);
            }
        }

        // Make sure configured prefixes all have a counter.
        for section in &sections {
            next_id.entry(section.prefix.clone()).or_insert(1);
        }

        Ok(Self {
            inner: RwLock::new(PlaybookState {
                sections,
                live,
                tombstones: doc.tombstones.into_iter().collect(),
                next_id,
                clock,
            }),
            bpe: tiktoken_rs::cl100k_base().ok(),
        })
    }

    /// Pretty-printed JSON of the current checkpoint.
    pub fn to_json(&self) -> Result<String, PlaybookError> {
        serde_json::to_string_pretty(&self.checkpoint()).map_err(|e| PlaybookError::Checkpoint {
            reason: e.to_string(),
        })
    }

    /// Write the checkpoint to disk atomically (temp file + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PlaybookError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &json).map_err(|e| PlaybookError::Io {
            message: format!("{}: {}", tmp.display(), e),
        })?;
        std::fs::rename(&tmp, path).map_err(|e| PlaybookError::Io {
            message: format!("{}: {}", path.display(), e),
        })?;
        tracing::info!(path = %path.display(), bullets = self.len(), "playbook checkpoint written");
        Ok(())
    }

    /// Load a checkpoint from disk.
    pub fn load(
        path: impl AsRef<Path>,
        sections: Vec<SectionConfig>,
    ) -> Result<Self, PlaybookError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| PlaybookError::Io {
            message: format!("{}: {}", path.display(), e),
        })?;
        let doc: PlaybookDocument =
            serde_json::from_str(&contents).map_err(|e| PlaybookError::Checkpoint {
                reason: e.to_string(),
            })?;
        Self::restore(doc, sections)
    }

    /// Counters and sizes for logging and the `show` command.
    pub fn stats(&self) -> PlaybookStats {
        let state = self.inner.read();
        let mut live_by_section = BTreeMap::new();
        let mut helpful_total = 0u64;
        let mut harmful_total = 0u64;
        let mut live_total = 0;
        for (name, bullets) in &state.live {
            live_by_section.insert(name.clone(), bullets.len());
            live_total += bullets.len();
            for bullet in bullets {
                helpful_total += u64::from(bullet.helpful_count);
                harmful_total += u64::from(bullet.harmful_count);
            }
        }
        PlaybookStats {
            live_by_section,
            live_total,
            tombstoned: state.tombstones.len(),
            helpful_total,
            harmful_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SectionConfig;

    fn sections() -> Vec<SectionConfig> {
        vec![
            SectionConfig::new("strategies_and_hard_rules", "ctx"),
            SectionConfig::new("formulas_and_calculations", "calc"),
        ]
    }

    fn add(section: &str, content: &str) -> Operation {
        Operation::Add {
            section: section.into(),
            content: content.into(),
        }
    }

    #[test]
    fn test_add_assigns_sequential_section_scoped_ids() {
        let store = PlaybookStore::new(sections());
        let applied = store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "first"),
                add("formulas_and_calculations", "second"),
                add("strategies_and_hard_rules", "third"),
            ]),
            1024,
        );
        assert_eq!(
            applied.added,
            vec![
                BulletId::from("ctx-00001"),
                BulletId::from("calc-00001"),
                BulletId::from("ctx-00002"),
            ]
        );
        assert_eq!(applied.dropped, 0);
    }

    #[test]
    fn test_render_preserves_insertion_order() {
        let store = PlaybookStore::new(sections());
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "alpha"),
                add("strategies_and_hard_rules", "beta"),
                add("strategies_and_hard_rules", "gamma"),
            ]),
            1024,
        );
        let render = store.render(None);
        let alpha = render.find("alpha").unwrap();
        let beta = render.find("beta").unwrap();
        let gamma = render.find("gamma").unwrap();
        assert!(alpha < beta && beta < gamma);
        assert!(render.starts_with("## strategies_and_hard_rules\n"));
        // Empty section omitted
        assert!(!render.contains("formulas_and_calculations"));
    }

    #[test]
    fn test_unknown_section_add_is_dropped() {
        let store = PlaybookStore::new(sections());
        let applied = store.apply(&Delta::new(vec![add("no_such_section", "x")]), 1024);
        assert!(applied.added.is_empty());
        assert_eq!(applied.dropped, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_oversized_add_is_dropped() {
        let store = PlaybookStore::new(sections());
        let big = "x".repeat(2000);
        let applied = store.apply(
            &Delta::new(vec![add("strategies_and_hard_rules", &big)]),
            1024,
        );
        assert_eq!(applied.dropped, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_replaces_content_and_invalidates_embedding() {
        let store = PlaybookStore::new(sections());
        store.apply(&Delta::new(vec![add("strategies_and_hard_rules", "old")]), 1024);
        {
            let mut state = store.inner.write();
            state.find_mut(&BulletId::from("ctx-00001")).unwrap().embedding =
                Some(vec![1.0, 0.0]);
        }

        let applied = store.apply(
            &Delta::new(vec![Operation::Update {
                id: BulletId::from("ctx-00001"),
                content: "new".into(),
            }]),
            1024,
        );
        assert_eq!(applied.updated.len(), 1);

        let bullet = store.get(&BulletId::from("ctx-00001")).unwrap();
        assert_eq!(bullet.content, "new");
        assert!(bullet.embedding.is_none());
        assert!(bullet.updated_at > bullet.created_at);
    }

    #[test]
    fn test_delete_tombstones_and_never_reissues() {
        let store = PlaybookStore::new(sections());
        store.apply(&Delta::new(vec![add("strategies_and_hard_rules", "a")]), 1024);
        store.apply(
            &Delta::new(vec![Operation::Delete {
                id: BulletId::from("ctx-00001"),
            }]),
            1024,
        );
        assert!(store.is_empty());

        // Updating or deleting the tombstoned ID fails
        let applied = store.apply(
            &Delta::new(vec![Operation::Update {
                id: BulletId::from("ctx-00001"),
                content: "resurrect".into(),
            }]),
            1024,
        );
        assert_eq!(applied.dropped, 1);

        // A fresh ADD gets a new ID, not the tombstoned one
        let applied = store.apply(&Delta::new(vec![add("strategies_and_hard_rules", "b")]), 1024);
        assert_eq!(applied.added, vec![BulletId::from("ctx-00002")]);
    }

    #[test]
    fn test_identical_deltas_yield_distinct_ids() {
        let store = PlaybookStore::new(sections());
        let delta = Delta::new(vec![add("strategies_and_hard_rules", "same content")]);
        let first = store.apply(&delta, 1024);
        let second = store.apply(&delta, 1024);
        assert_ne!(first.added, second.added);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_empty_delta_is_noop() {
        let store = PlaybookStore::new(sections());
        store.apply(&Delta::new(vec![add("strategies_and_hard_rules", "a")]), 1024);
        let before = store.to_json().unwrap();
        let applied = store.apply(&Delta::default(), 1024);
        assert!(applied.is_noop());
        assert_eq!(store.to_json().unwrap(), before);
    }

    #[test]
    fn test_tag_cited_only_touches_cited_ids() {
        let store = PlaybookStore::new(sections());
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "a"),
                add("strategies_and_hard_rules", "b"),
            ]),
            1024,
        );

        let cited: HashSet<BulletId> = [BulletId::from("ctx-00001")].into_iter().collect();
        let tags = vec![
            BulletTag {
                id: BulletId::from("ctx-00001"),
                tag: Tag::Helpful,
            },
            // Not cited: must be ignored even though it is live
            BulletTag {
                id: BulletId::from("ctx-00002"),
                tag: Tag::Harmful,
            },
        ];
        let touched = store.tag_cited(&cited, &tags);
        assert_eq!(touched, 1);
        assert_eq!(store.get(&BulletId::from("ctx-00001")).unwrap().helpful_count, 1);
        assert_eq!(store.get(&BulletId::from("ctx-00002")).unwrap().harmful_count, 0);
    }

    #[test]
    fn test_neutral_tag_is_noop() {
        let store = PlaybookStore::new(sections());
        store.apply(&Delta::new(vec![add("strategies_and_hard_rules", "a")]), 1024);
        let cited: HashSet<BulletId> = [BulletId::from("ctx-00001")].into_iter().collect();
        let touched = store.tag_cited(
            &cited,
            &[BulletTag {
                id: BulletId::from("ctx-00001"),
                tag: Tag::Neutral,
            }],
        );
        assert_eq!(touched, 0);
        let bullet = store.get(&BulletId::from("ctx-00001")).unwrap();
        assert_eq!(bullet.helpful_count + bullet.harmful_count, 0);
    }

    #[test]
    fn test_checkpoint_restore_round_trip() {
        let store = PlaybookStore::new(sections());
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "alpha"),
                add("formulas_and_calculations", "beta"),
            ]),
            1024,
        );
        store.apply(
            &Delta::new(vec![Operation::Delete {
                id: BulletId::from("calc-00001"),
            }]),
            1024,
        );
        let cited: HashSet<BulletId> = [BulletId::from("ctx-00001")].into_iter().collect();
        store.tag_cited(
            &cited,
            &[BulletTag {
                id: BulletId::from("ctx-00001"),
                tag: Tag::Helpful,
            }],
        );

        let doc = store.checkpoint();
        let restored = PlaybookStore::restore(doc.clone(), sections()).unwrap();
        assert_eq!(restored.checkpoint(), doc);
        assert_eq!(restored.render(None), store.render(None));

        // Restored counters continue from where the original left off
        let applied = restored.apply(
            &Delta::new(vec![add("formulas_and_calculations", "gamma")]),
            1024,
        );
        assert_eq!(applied.added, vec![BulletId::from("calc-00002")]);
    }

    #[test]
    fn test_restore_rejects_duplicate_ids() {
        let bullet = Bullet {
            id: BulletId::from("ctx-00001"),
            section: "strategies_and_hard_rules".into(),
            content: "x".into(),
            helpful_count: 0,
            harmful_count: 0,
            embedding: None,
            created_at: 1,
            updated_at: 1,
        };
        let doc = PlaybookDocument {
            version: 1,
            sections: vec!["strategies_and_hard_rules".into()],
            next_id: BTreeMap::from([("ctx".into(), 2)]),
            tombstones: vec![],
            bullets: vec![bullet.clone(), bullet],
        };
        assert!(PlaybookStore::restore(doc, sections()).is_err());
    }

    #[test]
    fn test_restore_rejects_unknown_version() {
        let doc = PlaybookDocument {
            version: 2,
            sections: vec![],
            next_id: BTreeMap::new(),
            tombstones: vec![],
            bullets: vec![],
        };
        assert!(PlaybookStore::restore(doc, sections()).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playbook.json");

        let store = PlaybookStore::new(sections());
        store.apply(&Delta::new(vec![add("strategies_and_hard_rules", "persisted")]), 1024);
        store.save(&path).unwrap();

        let loaded = PlaybookStore::load(&path, sections()).unwrap();
        assert_eq!(loaded.checkpoint(), store.checkpoint());
    }

    #[test]
    fn test_snapshot_for_cited_preserves_render_order() {
        let store = PlaybookStore::new(sections());
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "a"),
                add("strategies_and_hard_rules", "b"),
                add("formulas_and_calculations", "c"),
            ]),
            1024,
        );
        let snapshot = store.snapshot_for_cited(&[
            BulletId::from("calc-00001"),
            BulletId::from("ctx-00001"),
            BulletId::from("ctx-99999"),
        ]);
        let ids: Vec<&str> = snapshot.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["ctx-00001", "calc-00001"]);
    }

    #[test]
    fn test_stats() {
        let store = PlaybookStore::new(sections());
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "a"),
                add("formulas_and_calculations", "b"),
            ]),
            1024,
        );
        store.apply(
            &Delta::new(vec![Operation::Delete {
                id: BulletId::from("calc-00001"),
            }]),
            1024,
        );
        let stats = store.stats();
        assert_eq!(stats.live_total, 1);
        assert_eq!(stats.tombstoned, 1);
        assert_eq!(stats.live_by_section["strategies_and_hard_rules"], 1);
    }
}
