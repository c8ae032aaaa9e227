//! Trajectory records and the environment contract
//!
//! A trajectory captures one (query, generation, feedback) triple. The
//! environment itself is an external collaborator; only its contract is
//! defined here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::playbook::BulletId;

/// Structured feedback from the task environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub passed: bool,
    pub diagnostics: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_test_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
}

/// One step result in agentic (multi-step) generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvStep {
    /// Observation text fed back to the generator
    pub observation: String,
    /// The environment considers the task finished
    pub done: bool,
}

/// Errors from the environment collaborator.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("Environment failure: {0}")]
    Failure(String),

    #[error("Environment does not support stepping")]
    SteppingUnsupported,
}

/// Contract for the downstream task environment.
///
/// `evaluate` judges a final answer or action trace; `step` executes one
/// generator action in agentic mode. Environments that only evaluate can
/// leave `step` unimplemented.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Evaluate a final answer, returning pass/fail plus diagnostics.
    async fn evaluate(&self, query: &str, answer: &str) -> Result<Feedback, EnvError>;

    /// Execute one generator action and return the observation.
    async fn step(&self, action: &str) -> Result<EnvStep, EnvError> {
        let _ = action;
        Err(EnvError::SteppingUnsupported)
    }
}

/// One (query, generation, feedback) record, produced once per sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// The generator's full trace: reasoning, actions, observations
    pub generator_output: String,
    /// The answer that was emitted (also the prediction in online mode)
    pub final_answer: String,
    /// Bullet IDs the generator declared as used, unknown IDs dropped
    pub cited_bullet_ids: Vec<BulletId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_feedback: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
}

impl Trajectory {
    /// Whether any learning signal is available at all. Without ground truth
    /// or execution feedback the reflector's diagnosis quality degrades.
    pub fn has_signal(&self) -> bool {
        self.ground_truth.is_some() || self.environment_feedback.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EvalOnly;

    #[async_trait]
    impl Environment for EvalOnly {
        async fn evaluate(&self, _query: &str, answer: &str) -> Result<Feedback, EnvError> {
            Ok(Feedback {
                passed: answer == "42",
                diagnostics: "checked against fixture".into(),
                unit_test_report: None,
                ground_truth: Some("42".into()),
            })
        }
    }

    #[tokio::test]
    async fn test_default_step_is_unsupported() {
        let env = EvalOnly;
        assert!(matches!(
            env.step("list_contacts()").await,
            Err(EnvError::SteppingUnsupported)
        ));
        let feedback = env.evaluate("q", "42").await.unwrap();
        assert!(feedback.passed);
    }

    #[test]
    fn test_trajectory_signal_detection() {
        let mut trajectory = Trajectory {
            query: "q".into(),
            context: None,
            generator_output: "out".into(),
            final_answer: "a".into(),
            cited_bullet_ids: vec![],
            environment_feedback: None,
            ground_truth: None,
        };
        assert!(!trajectory.has_signal());

        trajectory.ground_truth = Some("1068.0".into());
        assert!(trajectory.has_signal());
    }

    #[test]
    fn test_feedback_serde_skips_absent_fields() {
        let feedback = Feedback {
            passed: false,
            diagnostics: "expected=1068.0, got=79.0".into(),
            unit_test_report: None,
            ground_truth: None,
        };
        let json = serde_json::to_string(&feedback).unwrap();
        assert!(!json.contains("unit_test_report"));
        assert!(json.contains("expected=1068.0"));
    }
}
