//! Configuration management for the ACE runtime
//!
//! Provides centralized configuration handling with validation, TOML file
//! loading, and environment variable overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;

use crate::llm::retry::RetryConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    Io { message: String },

    #[error("Configuration parsing error: {message}")]
    Parse { message: String },
}

/// One playbook section: a stable name plus the prefix its bullet IDs are
/// numbered under (e.g. `strategies_and_hard_rules` / `ctx` → `ctx-00042`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub name: String,
    pub prefix: String,
}

impl SectionConfig {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
        }
    }
}

/// Main runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AceConfig {
    /// Ordered list of playbook sections. Section order here is the
    /// rendering order.
    #[serde(default = "default_sections")]
    pub sections: Vec<SectionConfig>,
    /// LLM call configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Generator configuration
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Reflector configuration
    #[serde(default)]
    pub reflector: ReflectorConfig,
    /// Curator configuration
    #[serde(default)]
    pub curator: CuratorConfig,
    /// Grow-and-refine configuration
    #[serde(default)]
    pub refine: RefineConfig,
    /// Adaptation loop configuration
    #[serde(default)]
    pub adaptation: AdaptationConfig,
}

/// LLM call configuration, shared by all three roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate per call
    pub max_tokens: u32,
    /// Per-call timeout in seconds; a timed-out sample is skipped
    pub timeout_seconds: u64,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 4096,
            timeout_seconds: 60,
            retry: RetryConfig::default(),
        }
    }
}

/// Generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Drive a multi-step REPL against the environment instead of a
    /// single-shot answer. Requires an environment that supports stepping.
    pub agentic: bool,
    /// Maximum environment steps in agentic mode
    pub max_steps: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            agentic: false,
            max_steps: 8,
        }
    }
}

/// Reflector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectorConfig {
    /// Additional refinement passes after the initial diagnosis. Zero means
    /// the reflector runs exactly once.
    pub max_refinement_rounds: u32,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            max_refinement_rounds: 5,
        }
    }
}

/// Curator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorConfig {
    /// A single delta touching (UPDATE/DELETE) more than this percentage of
    /// a section's live bullets is rejected as a suspected context collapse.
    pub collapse_guard_pct: u8,
    /// Sections with fewer live bullets than this are exempt from the
    /// collapse guard, so small playbooks can still be corrected.
    pub collapse_guard_min_bullets: usize,
    /// Per-bullet content size cap in bytes
    pub max_bullet_bytes: usize,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            collapse_guard_pct: 30,
            collapse_guard_min_bullets: 4,
            max_bullet_bytes: 1024,
        }
    }
}

/// When the dedup sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinePolicy {
    /// Sweep affected sections after every curator commit
    Proactive,
    /// Defer the sweep until the rendered playbook exceeds `token_ceiling`
    Lazy,
}

/// Grow-and-refine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineConfig {
    pub policy: RefinePolicy,
    /// Cosine similarity at or above which two bullets in the same section
    /// are considered duplicates
    pub dedup_threshold: f32,
    /// Optional hard token budget for the rendered playbook; lowest-scoring
    /// bullets are pruned until the render fits
    pub token_budget: Option<usize>,
    /// Rendered-size ceiling that triggers a sweep under the lazy policy
    pub token_ceiling: usize,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            policy: RefinePolicy::Proactive,
            dedup_threshold: 0.92,
            token_budget: None,
            token_ceiling: 16_384,
        }
    }
}

/// Adaptation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationConfig {
    /// Maximum training epochs (offline mode)
    pub max_epochs: u32,
    /// Samples processed concurrently per batch (offline mode)
    pub batch_size: usize,
    /// Epochs without validation improvement before stopping early
    pub patience: u32,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1,
            batch_size: 1,
            patience: 2,
        }
    }
}

fn default_sections() -> Vec<SectionConfig> {
    vec![
        SectionConfig::new("strategies_and_hard_rules", "ctx"),
        SectionConfig::new("apis_to_use_for_specific_information", "api"),
        SectionConfig::new("verification_checklist", "chk"),
        SectionConfig::new("formulas_and_calculations", "calc"),
    ]
}

impl Default for AceConfig {
    fn default() -> Self {
        Self {
            sections: default_sections(),
            llm: LlmConfig::default(),
            generator: GeneratorConfig::default(),
            reflector: ReflectorConfig::default(),
            curator: CuratorConfig::default(),
            refine: RefineConfig::default(),
            adaptation: AdaptationConfig::default(),
        }
    }
}

impl AceConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            message: format!("{}: {}", path.as_ref().display(), e),
        })?;

        let mut config: AceConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Build the default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `ACE_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("ACE_DEDUP_THRESHOLD") {
            if let Ok(t) = v.parse::<f32>() {
                self.refine.dedup_threshold = t;
            }
        }
        if let Ok(v) = env::var("ACE_TOKEN_BUDGET") {
            if let Ok(b) = v.parse::<usize>() {
                self.refine.token_budget = Some(b);
            }
        }
        if let Ok(v) = env::var("ACE_MAX_REFINEMENT_ROUNDS") {
            if let Ok(r) = v.parse::<u32>() {
                self.reflector.max_refinement_rounds = r;
            }
        }
        if let Ok(v) = env::var("ACE_LLM_TIMEOUT_SECONDS") {
            if let Ok(t) = v.parse::<u64>() {
                self.llm.timeout_seconds = t;
            }
        }
    }

    /// Validate invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sections.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "sections".into(),
                reason: "at least one section is required".into(),
            });
        }

        let mut names: Vec<&str> = self.sections.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.sections.len() {
            return Err(ConfigError::InvalidValue {
                key: "sections".into(),
                reason: "section names must be unique".into(),
            });
        }

        let mut prefixes: Vec<&str> = self.sections.iter().map(|s| s.prefix.as_str()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        if prefixes.len() != self.sections.len() {
            return Err(ConfigError::InvalidValue {
                key: "sections".into(),
                reason: "section prefixes must be unique".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.refine.dedup_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "refine.dedup_threshold".into(),
                reason: "must be within [0.0, 1.0]".into(),
            });
        }

        if self.curator.collapse_guard_pct > 100 {
            return Err(ConfigError::InvalidValue {
                key: "curator.collapse_guard_pct".into(),
                reason: "must be within [0, 100]".into(),
            });
        }

        if self.curator.max_bullet_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "curator.max_bullet_bytes".into(),
                reason: "must be positive".into(),
            });
        }

        if self.adaptation.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "adaptation.batch_size".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(())
    }

    /// Look up a section by name.
    pub fn section(&self, name: &str) -> Option<&SectionConfig> {
        self.sections.iter().find(|s| s.name == name)
    }
}
