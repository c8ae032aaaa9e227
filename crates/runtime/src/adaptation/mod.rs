//! Adaptation loops: offline multi-epoch training and online test-time
//! refinement
//!
//! Orchestrates generator → reflector → curator per sample. Nothing above
//! this layer observes LLM errors; the loops surface only a run summary
//! with per-reason skip counts.

pub mod dataset;
pub mod journal;
pub mod offline;
pub mod online;
pub mod sample;

pub use dataset::{load_samples, Sample};
pub use journal::{AdaptEvent, AdaptJournal, JournalEntry};
pub use offline::{OfflineOptions, ValidationMetric};
pub use online::Prediction;
pub use sample::{SampleRun, SampleSkip};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{AceConfig, RefinePolicy};
use crate::embedding::EmbeddingService;
use crate::llm::ChatClient;
use crate::playbook::{AppliedDelta, PlaybookError, PlaybookStore, RefineOptions};
use crate::roles::{Curator, Generator, PromptTemplates, Reflector};

/// Errors that abort an adaptation run outright.
#[derive(Debug, thiserror::Error)]
pub enum AdaptError {
    #[error("Dataset error: {message}")]
    Dataset { message: String },

    #[error(transparent)]
    Playbook(#[from] PlaybookError),
}

/// Why a sample was skipped. Terminal per sample; the loop always continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Unrecoverable provider error after retries
    LlmFatal,
    /// A role call timed out
    Timeout,
    /// Reflector JSON stayed malformed after the re-ask
    ReflectorParse,
    /// Curator JSON stayed malformed after the re-ask
    CuratorParse,
    /// The collapse guard rejected the delta
    Collapse,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::LlmFatal => "llm_fatal",
            SkipReason::Timeout => "timeout",
            SkipReason::ReflectorParse => "reflector_parse",
            SkipReason::CuratorParse => "curator_parse",
            SkipReason::Collapse => "collapse",
        };
        write!(f, "{s}")
    }
}

/// Aggregate outcome of an adaptation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub done: usize,
    pub skipped_by_reason: BTreeMap<String, usize>,
    pub bullets_added: usize,
    pub bullets_updated: usize,
    pub bullets_deleted: usize,
    pub epochs_run: u32,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped_by_reason.entry(reason.to_string()).or_default() += 1;
    }

    pub fn record_applied(&mut self, applied: &AppliedDelta) {
        self.bullets_added += applied.added.len();
        self.bullets_updated += applied.updated.len();
        self.bullets_deleted += applied.deleted.len();
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped_by_reason.values().sum()
    }
}

/// Cooperative cancellation, honored at sample boundaries only; in-flight
/// LLM calls complete or time out.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The assembled adaptation engine: store, roles, journal, cancellation.
pub struct Adapter {
    pub(crate) store: Arc<PlaybookStore>,
    pub(crate) generator: Arc<Generator>,
    pub(crate) reflector: Arc<Reflector>,
    pub(crate) curator: Arc<Curator>,
    pub(crate) embedder: Arc<dyn EmbeddingService>,
    pub(crate) journal: Arc<AdaptJournal>,
    pub(crate) config: AceConfig,
    pub(crate) cancel: CancellationHandle,
}

impl Adapter {
    /// Wire up the three roles and an empty playbook.
    pub fn new(
        config: AceConfig,
        client: Arc<dyn ChatClient>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        let templates = Arc::new(PromptTemplates::default());
        Self {
            store: Arc::new(PlaybookStore::new(config.sections.clone())),
            generator: Arc::new(Generator::new(client.clone(), templates.clone(), &config)),
            reflector: Arc::new(Reflector::new(client.clone(), templates.clone(), &config)),
            curator: Arc::new(Curator::new(client, templates, embedder.clone(), &config)),
            embedder,
            journal: Arc::new(AdaptJournal::default()),
            config,
            cancel: CancellationHandle::new(),
        }
    }

    /// Start from an existing playbook (offline warm-up for online mode,
    /// or resuming offline training).
    pub fn with_store(mut self, store: PlaybookStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn store(&self) -> &Arc<PlaybookStore> {
        &self.store
    }

    pub fn journal(&self) -> &Arc<AdaptJournal> {
        &self.journal
    }

    /// Handle for cooperative cancellation (e.g. wired to SIGINT).
    pub fn cancellation(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    /// Under the lazy policy, sweep once the rendered playbook exceeds the
    /// token ceiling. No-op under the proactive policy.
    pub(crate) async fn maybe_lazy_refine(&self) {
        if self.config.refine.policy != RefinePolicy::Lazy {
            return;
        }
        if !self.store.over_token_ceiling(self.config.refine.token_ceiling) {
            return;
        }
        let options = RefineOptions {
            threshold: self.config.refine.dedup_threshold,
            budget_tokens: Some(self.config.refine.token_ceiling),
            sections: None,
        };
        match self
            .store
            .grow_and_refine(self.embedder.as_ref(), &options)
            .await
        {
            Ok(report) => {
                tracing::info!(
                    deduped = report.deduped.len(),
                    pruned = report.pruned.len(),
                    "lazy refine sweep completed"
                );
            }
            Err(err) => tracing::warn!(error = %err, "lazy refine sweep failed"),
        }
    }
}
