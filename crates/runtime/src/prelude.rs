//! Prelude for embedding the runtime in a host application.
//!
//! Import everything an adaptation run needs with a single line:
//!
//! ```ignore
//! use ace_runtime::prelude::*;
//! ```

// Core data model
pub use crate::playbook::{
    AppliedDelta, Bullet, BulletId, BulletTag, Delta, Operation, PlaybookDocument, PlaybookStore,
    Tag,
};

// Roles and their outputs
pub use crate::roles::{CurationOutcome, Curator, Generation, Generator, InsightBundle, Reflector};

// Adaptation loops
pub use crate::adaptation::{
    load_samples, Adapter, AdaptJournal, CancellationHandle, OfflineOptions, Prediction,
    RunSummary, Sample, SkipReason, ValidationMetric,
};

// Collaborator contracts
pub use crate::embedding::{EmbeddingService, HashEmbeddingService};
pub use crate::llm::{ChatClient, ChatRequest, ChatResponse, HttpChatClient, ResponseFormat};
pub use crate::trajectory::{EnvStep, Environment, Feedback, Trajectory};

// Configuration
pub use crate::config::{AceConfig, RefinePolicy, SectionConfig};
