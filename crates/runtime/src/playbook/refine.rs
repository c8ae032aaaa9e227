//! Grow-and-refine: the dedup and pruning sweep that keeps the playbook
//! compact without ever summarizing it
//!
//! Embeddings are computed outside the writer lock; the sweep itself runs
//! entirely under one write guard. Within each connected component of
//! near-duplicates the strongest bullet survives; if a token budget is set,
//! the weakest bullets are pruned until the render fits, always preserving
//! at least one bullet per non-empty section.

use std::collections::HashMap;

use crate::embedding::{cosine_similarity, EmbeddingService};

use super::bullet::{Bullet, BulletId};
use super::store::{PlaybookError, PlaybookStore};

/// Options for one sweep.
#[derive(Debug, Clone)]
pub struct RefineOptions {
    /// Cosine similarity at or above which two bullets are duplicates
    pub threshold: f32,
    /// Optional hard token budget for the rendered playbook
    pub budget_tokens: Option<usize>,
    /// Restrict the dedup pass to these sections; `None` sweeps all
    pub sections: Option<Vec<String>>,
}

/// What a sweep did.
#[derive(Debug, Clone, Default)]
pub struct RefineReport {
    /// Bullets removed as near-duplicates
    pub deduped: Vec<BulletId>,
    /// Bullets removed to meet the token budget
    pub pruned: Vec<BulletId>,
    /// Embeddings computed during this sweep
    pub embedded: usize,
}

/// Union-find over bullet indices for duplicate components.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

/// Retention order within a duplicate component: highest net score wins,
/// ties go to the older bullet.
fn stronger(a: &Bullet, b: &Bullet) -> bool {
    (a.score(), std::cmp::Reverse(a.created_at), std::cmp::Reverse(a.id.clone()))
        > (b.score(), std::cmp::Reverse(b.created_at), std::cmp::Reverse(b.id.clone()))
}

impl PlaybookStore {
    /// Run one grow-and-refine sweep.
    ///
    /// 1. Compute missing embeddings for live bullets in the target sections
    ///    (outside the lock).
    /// 2. Within each section, join bullets whose cosine similarity meets
    ///    the threshold into components and keep only the strongest of each.
    /// 3. If a token budget is given and the render still exceeds it, drop
    ///    bullets by ascending score until it fits.
    pub async fn grow_and_refine(
        &self,
        embedder: &dyn EmbeddingService,
        options: &RefineOptions,
    ) -> Result<RefineReport, PlaybookError> {
        let mut report = RefineReport::default();

        let target_sections: Vec<String> = match &options.sections {
            Some(names) => names.clone(),
            None => self.sections().into_iter().map(|s| s.name).collect(),
        };

        // Phase 1: gather texts that need embeddings, without holding the
        // lock across the embedding call.
        let missing: Vec<(BulletId, String)> = {
            let state = self.inner.read();
            target_sections
                .iter()
                .filter_map(|name| state.live.get(name))
                .flatten()
                .filter(|b| b.embedding.is_none())
                .map(|b| (b.id.clone(), b.content.clone()))
                .collect()
        };

        if !missing.is_empty() {
            let texts: Vec<&str> = missing.iter().map(|(_, t)| t.as_str()).collect();
            let vectors = embedder
                .embed_batch(texts)
                .await
                .map_err(|e| PlaybookError::Embedding(e.to_string()))?;

            let mut state = self.inner.write();
            for ((id, _), vector) in missing.iter().zip(vectors) {
                // A bullet may have been deleted or rewritten while we were
                // embedding; only fill vectors that are still missing.
                if let Some(bullet) = state
                    .live
                    .values_mut()
                    .flatten()
                    .find(|b| &b.id == id && b.embedding.is_none())
                {
                    bullet.embedding = Some(vector);
                    report.embedded += 1;
                }
            }
        }

        // Phase 2 + 3 run under a single write guard.
        let mut state = self.inner.write();

        for name in &target_sections {
            let Some(bullets) = state.live.get(name) else {
                continue;
            };
            if bullets.len() < 2 {
                continue;
            }

            let mut uf = UnionFind::new(bullets.len());
            for i in 0..bullets.len() {
                for j in (i + 1)..bullets.len() {
                    let (Some(a), Some(b)) = (&bullets[i].embedding, &bullets[j].embedding)
                    else {
                        continue;
                    };
                    if cosine_similarity(a, b) >= options.threshold {
                        uf.union(i, j);
                    }
                }
            }

            // Pick the survivor per component.
            let mut survivor: HashMap<usize, usize> = HashMap::new();
            for i in 0..bullets.len() {
                let root = uf.find(i);
                match survivor.get(&root) {
                    Some(&best) if !stronger(&bullets[i], &bullets[best]) => {}
                    _ => {
                        survivor.insert(root, i);
                    }
                }
            }

            let losers: Vec<BulletId> = bullets
                .iter()
                .enumerate()
                .filter(|(i, _)| survivor.get(&uf.find(*i)) != Some(i))
                .map(|(_, b)| b.id.clone())
                .collect();

            if losers.is_empty() {
                continue;
            }

            if let Some(section_bullets) = state.live.get_mut(name) {
                section_bullets.retain(|b| !losers.contains(&b.id));
            }
            for id in &losers {
                tracing::info!(id = %id, section = %name, "deduplicated bullet");
                state.tombstones.insert(id.clone());
            }
            state.clock += 1;
            report.deduped.extend(losers);
        }

        // Phase 3: token budget pruning over the whole playbook.
        if let Some(budget) = options.budget_tokens {
            loop {
                let render: String = {
                    let mut out = String::new();
                    for section in &state.sections {
                        if let Some(bullets) = state.live.get(&section.name) {
                            if bullets.is_empty() {
                                continue;
                            }
                            out.push_str("## ");
                            out.push_str(&section.name);
                            out.push('\n');
                            for b in bullets {
                                out.push_str(&b.render_line());
                                out.push('\n');
                            }
                        }
                    }
                    out
                };
                if self.count_tokens(&render) <= budget {
                    break;
                }

                // Weakest bullet in any section that still has more than one.
                let victim: Option<(String, BulletId)> = state
                    .live
                    .iter()
                    .filter(|(_, bullets)| bullets.len() > 1)
                    .flat_map(|(name, bullets)| {
                        bullets.iter().map(move |b| (name.clone(), b))
                    })
                    .min_by_key(|(_, b)| (b.score(), std::cmp::Reverse(b.created_at)))
                    .map(|(name, b)| (name, b.id.clone()));

                let Some((section, id)) = victim else {
                    tracing::warn!(
                        budget,
                        "cannot meet token budget without emptying a section"
                    );
                    break;
                };

                if let Some(bullets) = state.live.get_mut(&section) {
                    bullets.retain(|b| b.id != id);
                }
                state.tombstones.insert(id.clone());
                state.clock += 1;
                tracing::info!(id = %id, section = %section, "pruned bullet for token budget");
                report.pruned.push(id);
            }
        }

        Ok(report)
    }

    /// Whether a lazy-policy sweep is due: the rendered playbook exceeds
    /// the configured token ceiling.
    pub fn over_token_ceiling(&self, ceiling: usize) -> bool {
        self.render_token_count() > ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SectionConfig;
    use crate::embedding::HashEmbeddingService;
    use crate::playbook::delta::{Delta, Operation};
    use crate::playbook::store::PlaybookStore;
    use crate::playbook::bullet::{BulletTag, Tag};
    use std::collections::HashSet;

    fn sections() -> Vec<SectionConfig> {
        vec![
            SectionConfig::new("strategies_and_hard_rules", "ctx"),
            SectionConfig::new("verification_checklist", "chk"),
        ]
    }

    fn add(section: &str, content: &str) -> Operation {
        Operation::Add {
            section: section.into(),
            content: content.into(),
        }
    }

    fn options(threshold: f32) -> RefineOptions {
        RefineOptions {
            threshold,
            budget_tokens: None,
            sections: None,
        }
    }

    #[tokio::test]
    async fn test_dedup_keeps_strongest_of_near_identical_pair() {
        let store = PlaybookStore::new(sections());
        let embedder = HashEmbeddingService::new(256);

        store.apply(
            &Delta::new(vec![
                add(
                    "strategies_and_hard_rules",
                    "always fetch contacts from the phone app before filtering transactions",
                ),
                add(
                    "strategies_and_hard_rules",
                    "always fetch contacts from the phone app before filtering the transactions",
                ),
                add(
                    "strategies_and_hard_rules",
                    "paginate API calls with a while loop and explicit break condition",
                ),
            ]),
            1024,
        );

        // Make the first of the near-identical pair the stronger one.
        let cited: HashSet<_> = [crate::playbook::BulletId::from("ctx-00001")]
            .into_iter()
            .collect();
        store.tag_cited(
            &cited,
            &[BulletTag {
                id: crate::playbook::BulletId::from("ctx-00001"),
                tag: Tag::Helpful,
            }],
        );

        let report = store.grow_and_refine(&embedder, &options(0.9)).await.unwrap();
        assert_eq!(report.deduped, vec![crate::playbook::BulletId::from("ctx-00002")]);
        assert_eq!(store.len(), 2);

        // The survivor keeps its own counters: the max of the pair, not a sum.
        let survivor = store.get(&crate::playbook::BulletId::from("ctx-00001")).unwrap();
        assert_eq!(survivor.helpful_count + survivor.harmful_count, 1);
    }

    #[tokio::test]
    async fn test_dedup_tie_break_keeps_older() {
        let store = PlaybookStore::new(sections());
        let embedder = HashEmbeddingService::new(256);
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "verify every total against the raw ledger"),
                add("strategies_and_hard_rules", "verify every total against the raw ledger"),
            ]),
            1024,
        );

        let report = store.grow_and_refine(&embedder, &options(0.92)).await.unwrap();
        assert_eq!(report.deduped, vec![crate::playbook::BulletId::from("ctx-00002")]);
        assert!(store.get(&crate::playbook::BulletId::from("ctx-00001")).is_some());
    }

    #[tokio::test]
    async fn test_dedup_closure_property() {
        let store = PlaybookStore::new(sections());
        let embedder = HashEmbeddingService::new(256);
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "one two three four five"),
                add("strategies_and_hard_rules", "one two three four five six"),
                add("strategies_and_hard_rules", "completely different advice about retries"),
            ]),
            1024,
        );

        let threshold = 0.9;
        store
            .grow_and_refine(&embedder, &options(threshold))
            .await
            .unwrap();

        // No two live bullets in the same section may still be near-duplicates.
        let state = store.inner.read();
        for bullets in state.live.values() {
            for i in 0..bullets.len() {
                for j in (i + 1)..bullets.len() {
                    let (Some(a), Some(b)) = (&bullets[i].embedding, &bullets[j].embedding)
                    else {
                        continue;
                    };
                    assert!(cosine_similarity(a, b) < threshold);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_dedup_does_not_cross_sections() {
        let store = PlaybookStore::new(sections());
        let embedder = HashEmbeddingService::new(256);
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "check the reconciliation totals twice"),
                add("verification_checklist", "check the reconciliation totals twice"),
            ]),
            1024,
        );

        let report = store.grow_and_refine(&embedder, &options(0.92)).await.unwrap();
        assert!(report.deduped.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_budget_prune_preserves_one_per_section() {
        let store = PlaybookStore::new(sections());
        let embedder = HashEmbeddingService::new(256);
        let mut ops = Vec::new();
        for i in 0..6 {
            ops.push(add(
                "strategies_and_hard_rules",
                &format!("distinct strategy number {i} with some padding words attached"),
            ));
        }
        ops.push(add("verification_checklist", "lone checklist entry"));
        store.apply(&Delta::new(ops), 1024);

        let report = store
            .grow_and_refine(
                &embedder,
                &RefineOptions {
                    threshold: 0.99,
                    budget_tokens: Some(1),
                    sections: None,
                },
            )
            .await
            .unwrap();

        // Pruned down to the floor: one bullet per non-empty section.
        assert!(!report.pruned.is_empty());
        assert_eq!(store.live_count("strategies_and_hard_rules"), 1);
        assert_eq!(store.live_count("verification_checklist"), 1);
    }

    #[tokio::test]
    async fn test_refine_on_clean_playbook_is_noop() {
        let store = PlaybookStore::new(sections());
        let embedder = HashEmbeddingService::new(256);
        store.apply(
            &Delta::new(vec![
                add("strategies_and_hard_rules", "first idea about pagination limits"),
                add("verification_checklist", "second idea about contact lookups"),
            ]),
            1024,
        );
        let before = store.render(None);

        let report = store.grow_and_refine(&embedder, &options(0.92)).await.unwrap();
        assert!(report.deduped.is_empty());
        assert!(report.pruned.is_empty());
        assert_eq!(store.render(None), before);
    }

    #[test]
    fn test_over_token_ceiling() {
        let store = PlaybookStore::new(sections());
        assert!(!store.over_token_ceiling(10));
        store.apply(
            &Delta::new(vec![add(
                "strategies_and_hard_rules",
                &"long content ".repeat(50),
            )]),
            1024,
        );
        assert!(store.over_token_ceiling(10));
    }
}
