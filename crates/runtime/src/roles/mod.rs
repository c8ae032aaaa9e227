//! The three cooperating roles: generator, reflector, curator
//!
//! All three are prompt contracts against the same [`ChatClient`]; there is
//! no inheritance hierarchy. The generator answers queries with the playbook
//! as auxiliary context, the reflector diagnoses trajectories, and the
//! curator converts diagnoses into deltas and commits them.
//!
//! [`ChatClient`]: crate::llm::ChatClient

pub mod curator;
pub mod generator;
pub mod prompts;
pub mod reflector;
pub mod schema;

pub use curator::{CurationOutcome, Curator};
pub use generator::{Generation, Generator};
pub use prompts::PromptTemplates;
pub use reflector::{InsightBundle, Reflector};
pub use schema::{strip_markdown_fences, OutputValidationError, ValidationPipeline};

use crate::llm::LlmError;

/// Errors surfaced by the roles to the adaptation loop.
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// JSON output stayed malformed after the one stricter re-ask
    #[error("{role} output malformed after re-ask: {detail}")]
    MalformedOutput { role: &'static str, detail: String },

    /// The collapse guard fired: the delta would rewrite too much of a
    /// section and is discarded wholesale
    #[error(
        "delta rejected as suspected context collapse: touches {touched} of {live} live bullets in section '{section}'"
    )]
    CollapseRejected {
        section: String,
        touched: usize,
        live: usize,
    },
}
