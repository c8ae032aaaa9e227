//! Prompt contracts for the three roles
//!
//! Exact wording is configurable through [`PromptTemplates`], but every
//! template must preserve the contracts: the generator cites bullet IDs,
//! the reflector emits the full diagnosis schema, and the curator emits
//! only ADD/UPDATE/DELETE operations on named bullets. No template ever
//! asks the model to summarize or rewrite the playbook wholesale.

use crate::playbook::Bullet;
use crate::trajectory::Trajectory;

use super::reflector::InsightBundle;

/// Configurable preambles for the three role prompts.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub generator_preamble: String,
    pub reflector_preamble: String,
    pub curator_preamble: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            generator_preamble: "You are a capable problem-solving agent. A playbook of \
                strategies learned from earlier attempts is provided below. Treat it like a \
                toolbox: apply the bullets that are relevant to the task and ignore the rest."
                .into(),
            reflector_preamble: "You are a rigorous reviewer. Diagnose the attempt below: \
                identify what went wrong (or right), the root cause, and the correct approach. \
                Judge each cited playbook bullet by whether it helped or hurt this attempt."
                .into(),
            curator_preamble: "You maintain a playbook of reusable strategies. Based on the \
                diagnosis below, propose a small set of edits. You may ADD new bullets, and \
                UPDATE or DELETE bullets you name by ID. Never rewrite or remove bullets you \
                were not explicitly led to by the diagnosis, and never condense or summarize \
                existing bullets."
                .into(),
        }
    }
}

impl PromptTemplates {
    /// Build the generator prompt: full playbook render, task framing, and
    /// the output contract with bullet-ID citation.
    pub fn generator(
        &self,
        playbook_render: &str,
        query: &str,
        context: Option<&serde_json::Value>,
    ) -> (String, String) {
        let playbook_block = if playbook_render.is_empty() {
            "(the playbook is currently empty)".to_string()
        } else {
            playbook_render.to_string()
        };

        let system = format!(
            "{}\n\n# PLAYBOOK\n{}\n\nRespond with a single JSON object:\n\
             {{\"reasoning\": \"...\", \"bullet_ids\": [\"<ids of playbook bullets you used>\"], \
             \"final_answer\": \"...\"}}\n\
             List in bullet_ids every bullet that shaped your answer; use an empty list if none did.",
            self.generator_preamble, playbook_block
        );

        let user = match context {
            Some(ctx) => format!("# TASK\n{query}\n\n# CONTEXT\n{ctx}"),
            None => format!("# TASK\n{query}"),
        };

        (system, user)
    }

    /// Build one agentic generator turn: transcript so far plus the action
    /// contract.
    pub fn generator_turn(
        &self,
        playbook_render: &str,
        query: &str,
        context: Option<&serde_json::Value>,
        transcript: &str,
    ) -> (String, String) {
        let playbook_block = if playbook_render.is_empty() {
            "(the playbook is currently empty)".to_string()
        } else {
            playbook_render.to_string()
        };

        let system = format!(
            "{}\n\n# PLAYBOOK\n{}\n\nYou interact with an environment one action at a time. \
             Respond with a single JSON object:\n\
             {{\"reasoning\": \"...\", \"bullet_ids\": [...], \"action\": \"<code or command>\"}}\n\
             When the task is finished, respond instead with:\n\
             {{\"reasoning\": \"...\", \"bullet_ids\": [...], \"final_answer\": \"...\"}}",
            self.generator_preamble, playbook_block
        );

        let mut user = match context {
            Some(ctx) => format!("# TASK\n{query}\n\n# CONTEXT\n{ctx}"),
            None => format!("# TASK\n{query}"),
        };
        if !transcript.is_empty() {
            user.push_str("\n\n# TRANSCRIPT SO FAR\n");
            user.push_str(transcript);
        }

        (system, user)
    }

    /// Build the reflector prompt: trajectory, ground truth when known, and
    /// the cited bullets with their IDs.
    pub fn reflector(
        &self,
        trajectory: &Trajectory,
        cited: &[Bullet],
        previous: Option<&InsightBundle>,
    ) -> (String, String) {
        let system = format!(
            "{}\n\nRespond with a single JSON object:\n\
             {{\"reasoning\": \"...\", \"error_identification\": \"...\", \
             \"root_cause_analysis\": \"...\", \"correct_approach\": \"...\", \
             \"key_insight\": \"...\", \
             \"bullet_tags\": [{{\"id\": \"<cited bullet id>\", \"tag\": \"helpful|harmful|neutral\"}}]}}\n\
             Only tag bullets listed under CITED BULLETS; leave bullet_tags empty if none were cited.",
            self.reflector_preamble
        );

        let mut user = format!(
            "# TASK\n{}\n\n# GENERATOR TRACE\n{}\n\n# FINAL ANSWER\n{}",
            trajectory.query, trajectory.generator_output, trajectory.final_answer
        );

        if let Some(feedback) = &trajectory.environment_feedback {
            user.push_str(&format!(
                "\n\n# EXECUTION FEEDBACK\npassed: {}\n{}",
                feedback.passed, feedback.diagnostics
            ));
            if let Some(report) = &feedback.unit_test_report {
                user.push_str(&format!("\nunit tests:\n{report}"));
            }
        }

        if let Some(truth) = trajectory
            .ground_truth
            .as_ref()
            .or_else(|| {
                trajectory
                    .environment_feedback
                    .as_ref()
                    .and_then(|f| f.ground_truth.as_ref())
            })
        {
            user.push_str(&format!("\n\n# GROUND TRUTH\n{truth}"));
        }

        user.push_str("\n\n# CITED BULLETS\n");
        if cited.is_empty() {
            user.push_str("(none)\n");
        } else {
            for bullet in cited {
                user.push_str(&bullet.render_line());
                user.push('\n');
            }
        }

        if let Some(previous) = previous {
            user.push_str(&format!(
                "\n# PREVIOUS DIAGNOSIS\n{}\n\nSharpen this diagnosis. If nothing can be \
                 improved, return it unchanged.",
                serde_json::to_string(previous).unwrap_or_default()
            ));
        }

        (system, user)
    }

    /// Build the curator prompt: current playbook, diagnosis, and the
    /// operation contract.
    pub fn curator(
        &self,
        playbook_render: &str,
        insight: &InsightBundle,
        section_names: &[String],
    ) -> (String, String) {
        let playbook_block = if playbook_render.is_empty() {
            "(the playbook is currently empty)".to_string()
        } else {
            playbook_render.to_string()
        };

        let system = format!(
            "{}\n\nValid sections: {}.\n\nRespond with a single JSON object:\n\
             {{\"reasoning\": \"...\", \"operations\": [\n\
               {{\"type\": \"ADD\", \"section\": \"<section>\", \"content\": \"...\"}},\n\
               {{\"type\": \"UPDATE\", \"id\": \"<bullet id>\", \"content\": \"...\"}},\n\
               {{\"type\": \"DELETE\", \"id\": \"<bullet id>\"}}\n\
             ]}}\n\
             Use an empty operations list when the diagnosis adds nothing new. Keep each \
             bullet self-contained and under a few sentences.",
            self.curator_preamble,
            section_names.join(", ")
        );

        let user = format!(
            "# CURRENT PLAYBOOK\n{}\n\n# DIAGNOSIS\n{}",
            playbook_block,
            serde_json::to_string_pretty(insight).unwrap_or_default()
        );

        (system, user)
    }

    /// Append a validation correction to a user prompt for the one re-ask.
    pub fn re_ask(user: &str, feedback: &str) -> String {
        format!("{user}\n\n# CORRECTION\n{feedback}")
    }
}
