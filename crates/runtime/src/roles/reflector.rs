//! Reflector: diagnoses a trajectory and emits an insight bundle
//!
//! The reflector may be invoked iteratively, each round receiving the
//! previous round's bundle to sharpen, and stops early when two consecutive
//! rounds agree. Malformed JSON gets exactly one stricter re-ask; a second
//! failure skips the sample without mutating the playbook.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::AceConfig;
use crate::llm::{complete_with_retries, ChatClient, ChatRequest, ResponseFormat};
use crate::playbook::{Bullet, BulletId, BulletTag};
use crate::trajectory::Trajectory;

use super::prompts::PromptTemplates;
use super::schema::ValidationPipeline;
use super::RoleError;

/// The reflector's structured diagnosis of one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightBundle {
    pub reasoning: String,
    pub error_identification: String,
    pub root_cause_analysis: String,
    pub correct_approach: String,
    pub key_insight: String,
    /// Verdicts on cited bullets only; empty when nothing was cited
    #[serde(default)]
    pub bullet_tags: Vec<BulletTag>,
}

fn insight_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "reasoning": {"type": "string"},
            "error_identification": {"type": "string"},
            "root_cause_analysis": {"type": "string"},
            "correct_approach": {"type": "string"},
            "key_insight": {"type": "string"},
            "bullet_tags": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "tag": {"enum": ["helpful", "harmful", "neutral"]}
                    },
                    "required": ["id", "tag"]
                }
            }
        },
        "required": [
            "reasoning",
            "error_identification",
            "root_cause_analysis",
            "correct_approach",
            "key_insight"
        ]
    })
}

pub struct Reflector {
    client: Arc<dyn ChatClient>,
    templates: Arc<PromptTemplates>,
    config: AceConfig,
    validator: Option<jsonschema::Validator>,
}

impl Reflector {
    pub fn new(
        client: Arc<dyn ChatClient>,
        templates: Arc<PromptTemplates>,
        config: &AceConfig,
    ) -> Self {
        Self {
            client,
            templates,
            config: config.clone(),
            validator: ValidationPipeline::compile_schema(&insight_schema()).ok(),
        }
    }

    /// Diagnose one trajectory. Returns the final bundle and the number of
    /// reflector invocations (the initial diagnosis plus refinement rounds).
    pub async fn run(
        &self,
        trajectory: &Trajectory,
        cited: &[Bullet],
    ) -> Result<(InsightBundle, u32), RoleError> {
        let mut bundle = self.diagnose(trajectory, cited, None).await?;
        let mut rounds = 1;

        for _ in 0..self.config.reflector.max_refinement_rounds {
            let next = self.diagnose(trajectory, cited, Some(&bundle)).await?;
            rounds += 1;
            let converged = canonical(&next) == canonical(&bundle);
            bundle = next;
            if converged {
                tracing::debug!(rounds, "reflection converged");
                break;
            }
        }

        // Tags are restricted to IDs the generator actually cited.
        let cited_ids: HashSet<&BulletId> = cited.iter().map(|b| &b.id).collect();
        let before = bundle.bullet_tags.len();
        bundle.bullet_tags.retain(|t| cited_ids.contains(&t.id));
        if bundle.bullet_tags.len() < before {
            tracing::warn!(
                dropped = before - bundle.bullet_tags.len(),
                "reflector tagged uncited bullets; tags dropped"
            );
        }

        Ok((bundle, rounds))
    }

    async fn diagnose(
        &self,
        trajectory: &Trajectory,
        cited: &[Bullet],
        previous: Option<&InsightBundle>,
    ) -> Result<InsightBundle, RoleError> {
        let (system, user) = self.templates.reflector(trajectory, cited, previous);
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

        match ValidationPipeline::validate_and_parse::<InsightBundle>(
            &response.content,
            self.validator.as_ref(),
        ) {
            Ok(bundle) => Ok(bundle),
            Err(err) => {
                tracing::warn!(error = %err, "malformed reflector output, re-asking once");
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
                ValidationPipeline::validate_and_parse::<InsightBundle>(
                    &retry_response.content,
                    self.validator.as_ref(),
                )
                .map_err(|err| RoleError::MalformedOutput {
                    role: "reflector",
                    detail: err.to_string(),
                })
            }
        }
    }
}

/// Canonical serialization for the byte-identical convergence check.
fn canonical(bundle: &InsightBundle) -> String {
    serde_json::to_string(bundle).unwrap_or_default()
}
