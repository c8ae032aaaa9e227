//! Curator: converts an insight bundle into a delta and commits it
//!
//! The curator is the only path by which the playbook mutates. It validates
//! the model's operations, enforces the no-monolithic-rewrite collapse
//! guard, assigns IDs on commit, and triggers the proactive refine sweep on
//! affected sections.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{AceConfig, RefinePolicy};
use crate::embedding::EmbeddingService;
use crate::llm::{complete_with_retries, ChatClient, ChatRequest, ResponseFormat};
use crate::playbook::{AppliedDelta, BulletId, Delta, Operation, PlaybookStore, RefineOptions, RefineReport};

use super::prompts::PromptTemplates;
use super::reflector::InsightBundle;
use super::schema::ValidationPipeline;
use super::RoleError;

/// The curator's raw JSON contract.
#[derive(Debug, Deserialize)]
struct CuratorOutput {
    #[allow(dead_code)]
    reasoning: String,
    #[serde(default)]
    operations: Vec<Operation>,
}

fn curator_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "reasoning": {"type": "string"},
            "operations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {"enum": ["ADD", "UPDATE", "DELETE"]}
                    },
                    "required": ["type"]
                }
            }
        },
        "required": ["reasoning", "operations"]
    })
}

/// What one curation step did to the playbook.
#[derive(Debug)]
pub struct CurationOutcome {
    /// The sanitized delta that was committed
    pub delta: Delta,
    pub applied: AppliedDelta,
    /// Result of the proactive refine sweep, when the policy ran one
    pub refined: Option<RefineReport>,
}

pub struct Curator {
    client: Arc<dyn ChatClient>,
    templates: Arc<PromptTemplates>,
    embedder: Arc<dyn EmbeddingService>,
    config: AceConfig,
    validator: Option<jsonschema::Validator>,
}

impl Curator {
    pub fn new(
        client: Arc<dyn ChatClient>,
        templates: Arc<PromptTemplates>,
        embedder: Arc<dyn EmbeddingService>,
        config: &AceConfig,
    ) -> Self {
        Self {
            client,
            templates,
            embedder,
            config: config.clone(),
            validator: ValidationPipeline::compile_schema(&curator_schema()).ok(),
        }
    }

    /// Run one curation step: ask the model for operations, guard against
    /// collapse, commit, and refine if the policy is proactive.
    pub async fn run(
        &self,
        store: &PlaybookStore,
        insight: &InsightBundle,
    ) -> Result<CurationOutcome, RoleError> {
        let output = self.propose(store, insight).await?;
        let operations = self.sanitize(store, output.operations);

        self.check_collapse_guard(store, &operations)?;

        let delta = Delta::new(operations);
        let applied = store.apply(&delta, self.config.curator.max_bullet_bytes);
        tracing::info!(
            added = applied.added.len(),
            updated = applied.updated.len(),
            deleted = applied.deleted.len(),
            dropped = applied.dropped,
            "delta committed"
        );

        let refined = if self.config.refine.policy == RefinePolicy::Proactive
            && !applied.affected_sections.is_empty()
        {
            let options = RefineOptions {
                threshold: self.config.refine.dedup_threshold,
                budget_tokens: self.config.refine.token_budget,
                sections: Some(applied.affected_sections.clone()),
            };
            match store.grow_and_refine(self.embedder.as_ref(), &options).await {
                Ok(report) => Some(report),
                Err(err) => {
                    tracing::warn!(error = %err, "proactive refine sweep failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(CurationOutcome {
            delta,
            applied,
            refined,
        })
    }

    async fn propose(
        &self,
        store: &PlaybookStore,
        insight: &InsightBundle,
    ) -> Result<CuratorOutput, RoleError> {
        let section_names: Vec<String> =
            store.sections().into_iter().map(|s| s.name).collect();
        let (system, user) = self
            .templates
            .curator(&store.render(None), insight, &section_names);
        let timeout = std::time::Duration::from_secs(self.config.llm.timeout_seconds);

        let request = ChatRequest {
            system: system.clone(),
            user: user.clone(),
            response_format: ResponseFormat::JsonObject,
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens,
        };
        let response = complete_with_retries(
            self.client.as_ref(),
            &request,
            &self.config.llm.retry,
            timeout,
        )
        .await?;

        match ValidationPipeline::validate_and_parse::<CuratorOutput>(
            &response.content,
            self.validator.as_ref(),
        ) {
            Ok(output) => Ok(output),
            Err(err) => {
                tracing::warn!(error = %err, "malformed curator output, re-asking once");
                let re_ask = ChatRequest {
                    system,
                    user: PromptTemplates::re_ask(&user, &err.to_llm_feedback()),
                    response_format: ResponseFormat::JsonObject,
                    temperature: self.config.llm.temperature,
                    max_tokens: self.config.llm.max_tokens,
                };
                let retry_response = complete_with_retries(
                    self.client.as_ref(),
                    &re_ask,
                    &self.config.llm.retry,
                    timeout,
                )
                .await?;
                ValidationPipeline::validate_and_parse::<CuratorOutput>(
                    &retry_response.content,
                    self.validator.as_ref(),
                )
                .map_err(|err| RoleError::MalformedOutput {
                    role: "curator",
                    detail: err.to_string(),
                })
            }
        }
    }

    /// Drop operations naming unknown sections up front so they don't feed
    /// the collapse accounting. Unknown target IDs are left in: the store
    /// logs and drops them per-operation on commit.
    fn sanitize(&self, store: &PlaybookStore, operations: Vec<Operation>) -> Vec<Operation> {
        let known: HashSet<String> = store.sections().into_iter().map(|s| s.name).collect();
        operations
            .into_iter()
            .filter(|op| match op {
                Operation::Add { section, .. } if !known.contains(section) => {
                    tracing::warn!(section = %section, "skipping ADD for unknown section");
                    false
                }
                _ => true,
            })
            .collect()
    }

    /// The structural defense against context collapse: a single delta may
    /// not rewrite (UPDATE or DELETE) more than the configured share of any
    /// section's live bullets. Offenders invalidate the whole delta.
    fn check_collapse_guard(
        &self,
        store: &PlaybookStore,
        operations: &[Operation],
    ) -> Result<(), RoleError> {
        let mut touched: HashMap<String, HashSet<&BulletId>> = HashMap::new();
        for op in operations {
            if let Some(id) = op.target() {
                if let Some(bullet) = store.get(id) {
                    touched.entry(bullet.section).or_default().insert(id);
                }
            }
        }

        let pct = usize::from(self.config.curator.collapse_guard_pct);
        for (section, ids) in touched {
            let live = store.live_count(&section);
            if live < self.config.curator.collapse_guard_min_bullets {
                continue;
            }
            if ids.len() * 100 > live * pct {
                tracing::warn!(
                    section = %section,
                    touched = ids.len(),
                    live,
                    pct,
                    "collapse guard fired, rejecting delta"
                );
                return Err(RoleError::CollapseRejected {
                    section,
                    touched: ids.len(),
                    live,
                });
            }
        }
        Ok(())
    }
}
