//! ACE Runtime: agentic context engineering
//!
//! Incrementally evolves a structured playbook of reusable strategies used
//! as an LLM's auxiliary context, so an agent self-improves from execution
//! feedback without touching model weights. Three cooperating roles drive
//! the process: the generator answers with the playbook in context, the
//! reflector diagnoses the trajectory, and the curator folds the lessons
//! back in as small, localized deltas.

pub mod adaptation;
pub mod config;
pub mod embedding;
pub mod llm;
pub mod playbook;
pub mod prelude;
pub mod roles;
pub mod trajectory;

// Re-export commonly used types
pub use adaptation::{Adapter, AdaptError, CancellationHandle, RunSummary, SkipReason};
pub use config::{AceConfig, ConfigError, SectionConfig};
pub use embedding::{create_embedding_service_from_env, EmbeddingService};
pub use llm::{ChatClient, HttpChatClient};
pub use playbook::{Bullet, BulletId, Delta, Operation, PlaybookDocument, PlaybookStore};
pub use roles::{Curator, Generator, InsightBundle, Reflector};
pub use trajectory::{Environment, Feedback, Trajectory};
