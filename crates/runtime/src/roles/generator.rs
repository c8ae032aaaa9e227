//! Generator: answers the query with the playbook as auxiliary context
//!
//! Output must declare which bullet IDs were used; unknown or tombstoned
//! IDs are silently dropped. In agentic mode the generator drives a
//! REPL-like loop against the environment, and the entire transcript
//! becomes the trajectory's generator output.

use serde::Deserialize;
use std::sync::Arc;

use crate::config::AceConfig;
use crate::llm::{complete_with_retries, ChatClient, ChatRequest, ResponseFormat, Usage};
use crate::playbook::{BulletId, PlaybookStore};
use crate::trajectory::Environment;

use super::prompts::PromptTemplates;
use super::schema::ValidationPipeline;
use super::RoleError;

/// One parsed generator turn.
#[derive(Debug, Deserialize)]
struct GeneratorTurn {
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    bullet_ids: Vec<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    final_answer: Option<String>,
}

/// The generator's result for one sample.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Full trace: reasoning, actions, observations
    pub generator_output: String,
    /// The emitted answer
    pub final_answer: String,
    /// Cited bullet IDs, filtered to live bullets
    pub cited_bullet_ids: Vec<BulletId>,
    /// Accumulated token usage across all turns
    pub usage: Usage,
}

pub struct Generator {
    client: Arc<dyn ChatClient>,
    templates: Arc<PromptTemplates>,
    config: AceConfig,
}

impl Generator {
    pub fn new(
        client: Arc<dyn ChatClient>,
        templates: Arc<PromptTemplates>,
        config: &AceConfig,
    ) -> Self {
        Self {
            client,
            templates,
            config: config.clone(),
        }
    }

    /// Answer one query using the current playbook.
    pub async fn run(
        &self,
        store: &PlaybookStore,
        query: &str,
        context: Option<&serde_json::Value>,
        environment: Option<&dyn Environment>,
    ) -> Result<Generation, RoleError> {
        let playbook_render = store.render(None);

        let mut generation = if self.config.generator.agentic {
            match environment {
                Some(env) => self.run_agentic(&playbook_render, query, context, env).await?,
                None => {
                    tracing::warn!("agentic mode configured but no environment; single-shot");
                    self.run_single_shot(&playbook_render, query, context).await?
                }
            }
        } else {
            self.run_single_shot(&playbook_render, query, context).await?
        };

        // Unknown or tombstoned cited IDs are silently dropped.
        let live = store.live_ids();
        generation.cited_bullet_ids.retain(|id| {
            let known = live.contains(id);
            if !known {
                tracing::debug!(id = %id, "dropping citation of unknown bullet");
            }
            known
        });

        Ok(generation)
    }

    async fn run_single_shot(
        &self,
        playbook_render: &str,
        query: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<Generation, RoleError> {
        let (system, user) = self.templates.generator(playbook_render, query, context);
        let response = self.call(system, user).await?;

        // The generator is parsed leniently: if the model ignored the JSON
        // contract, the raw text is still a usable answer with no citations.
        match ValidationPipeline::validate_and_parse::<GeneratorTurn>(&response.content, None) {
            Ok(turn) => {
                let final_answer = turn.final_answer.unwrap_or_default();
                let output = if turn.reasoning.is_empty() {
                    final_answer.clone()
                } else {
                    format!("{}\n{}", turn.reasoning, final_answer)
                };
                Ok(Generation {
                    generator_output: output,
                    final_answer,
                    cited_bullet_ids: turn.bullet_ids.into_iter().map(BulletId::from).collect(),
                    usage: response.usage,
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "generator output not structured, using raw text");
                Ok(Generation {
                    generator_output: response.content.clone(),
                    final_answer: response.content,
                    cited_bullet_ids: Vec::new(),
                    usage: response.usage,
                })
            }
        }
    }

    async fn run_agentic(
        &self,
        playbook_render: &str,
        query: &str,
        context: Option<&serde_json::Value>,
        environment: &dyn Environment,
    ) -> Result<Generation, RoleError> {
        let mut transcript = String::new();
        let mut cited: Vec<BulletId> = Vec::new();
        let mut usage = Usage::default();

        for step in 0..self.config.generator.max_steps {
            let (system, user) =
                self.templates
                    .generator_turn(playbook_render, query, context, &transcript);
            let response = self.call(system, user).await?;
            usage.input_tokens += response.usage.input_tokens;
            usage.output_tokens += response.usage.output_tokens;

            let turn = match ValidationPipeline::validate_and_parse::<GeneratorTurn>(
                &response.content,
                None,
            ) {
                Ok(turn) => turn,
                Err(err) => {
                    tracing::warn!(step, error = %err, "unstructured agentic turn, treating as final answer");
                    transcript.push_str(&response.content);
                    return Ok(Generation {
                        generator_output: transcript,
                        final_answer: response.content,
                        cited_bullet_ids: cited,
                        usage,
                    });
                }
            };

            for id in &turn.bullet_ids {
                let id = BulletId::from(id.as_str());
                if !cited.contains(&id) {
                    cited.push(id);
                }
            }
            if !turn.reasoning.is_empty() {
                transcript.push_str(&format!("THOUGHT: {}\n", turn.reasoning));
            }

            if let Some(answer) = turn.final_answer {
                transcript.push_str(&format!("FINAL ANSWER: {answer}\n"));
                return Ok(Generation {
                    generator_output: transcript,
                    final_answer: answer,
                    cited_bullet_ids: cited,
                    usage,
                });
            }

            let Some(action) = turn.action else {
                tracing::warn!(step, "agentic turn had neither action nor final answer");
                continue;
            };

            if action.trim() == "complete_task" {
                transcript.push_str("ACTION: complete_task\n");
                return Ok(Generation {
                    generator_output: transcript,
                    final_answer: String::new(),
                    cited_bullet_ids: cited,
                    usage,
                });
            }

            transcript.push_str(&format!("ACTION: {action}\n"));
            match environment.step(&action).await {
                Ok(step_result) => {
                    transcript.push_str(&format!("OBSERVATION: {}\n", step_result.observation));
                    if step_result.done {
                        return Ok(Generation {
                            generator_output: transcript,
                            final_answer: step_result.observation,
                            cited_bullet_ids: cited,
                            usage,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(step, error = %err, "environment step failed");
                    transcript.push_str(&format!("OBSERVATION (error): {err}\n"));
                }
            }
        }

        tracing::warn!(
            max_steps = self.config.generator.max_steps,
            "agentic generation exhausted its step budget"
        );
        Ok(Generation {
            generator_output: transcript,
            final_answer: String::new(),
            cited_bullet_ids: cited,
            usage,
        })
    }

    async fn call(&self, system: String, user: String) -> Result<crate::llm::ChatResponse, RoleError> {
        let request = ChatRequest {
            system,
            user,
            response_format: ResponseFormat::JsonObject,
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens,
        };
        let timeout = std::time::Duration::from_secs(self.config.llm.timeout_seconds);
        Ok(complete_with_retries(self.client.as_ref(), &request, &self.config.llm.retry, timeout)
            .await?)
    }
}
