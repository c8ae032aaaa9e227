//! Typestate-enforced per-sample state machine
//!
//! One sample moves through Pending → Generated → Reflected → Curated, with
//! terminal skip on any role failure. Each phase type carries exactly the
//! data that phase guarantees, and every transition consumes `self`, so it
//! is structurally impossible to curate a sample that was never reflected,
//! or to reflect before generating.

use crate::llm::LlmError;
use crate::playbook::{AppliedDelta, Bullet, PlaybookStore};
use crate::roles::{Curator, Generator, InsightBundle, Reflector, RoleError};
use crate::trajectory::{Environment, Trajectory};

use super::{Sample, SkipReason};

// ── Phase payloads ──────────────────────────────────────────────────

/// Waiting to generate.
pub struct Pending;

/// Generation finished; the prediction exists.
pub struct Generated {
    pub trajectory: Trajectory,
    pub cited_bullets: Vec<Bullet>,
}

/// Diagnosis finished.
pub struct Reflected {
    pub trajectory: Trajectory,
    pub insight: InsightBundle,
    pub rounds: u32,
}

/// Delta committed.
pub struct Curated;

/// Marker trait for valid phases.
pub trait SamplePhase {}
impl SamplePhase for Pending {}
impl SamplePhase for Generated {}
impl SamplePhase for Reflected {}
impl SamplePhase for Curated {}

/// Terminal skip: the sample is abandoned, the loop continues.
#[derive(Debug)]
pub struct SampleSkip {
    pub index: usize,
    pub reason: SkipReason,
}

/// A sample run in a specific phase. Transitions consume `self` and return
/// the next phase, making invalid orderings a compile error.
pub struct SampleRun<P: SamplePhase> {
    pub index: usize,
    query: String,
    context: Option<serde_json::Value>,
    ground_truth: Option<String>,
    phase: P,
}

fn skip_reason(err: &RoleError, parse_reason: SkipReason) -> SkipReason {
    match err {
        RoleError::Llm(LlmError::Timeout(_)) => SkipReason::Timeout,
        RoleError::Llm(_) => SkipReason::LlmFatal,
        RoleError::MalformedOutput { .. } => parse_reason,
        RoleError::CollapseRejected { .. } => SkipReason::Collapse,
    }
}

impl SampleRun<Pending> {
    pub fn new(index: usize, sample: &Sample) -> Self {
        Self {
            index,
            query: sample.query.clone(),
            context: sample.context.clone(),
            ground_truth: sample.ground_truth.clone(),
            phase: Pending,
        }
    }

    /// Run the generator and, when an environment is present, collect its
    /// feedback on the answer.
    pub async fn generate(
        self,
        generator: &Generator,
        store: &PlaybookStore,
        environment: Option<&dyn Environment>,
    ) -> Result<SampleRun<Generated>, SampleSkip> {
        let index = self.index;
        let generation = generator
            .run(store, &self.query, self.context.as_ref(), environment)
            .await
            .map_err(|err| {
                tracing::warn!(sample = index, error = %err, "generation failed, skipping");
                SampleSkip {
                    index,
                    reason: skip_reason(&err, SkipReason::LlmFatal),
                }
            })?;

        let feedback = match environment {
            Some(env) => match env.evaluate(&self.query, &generation.final_answer).await {
                Ok(feedback) => Some(feedback),
                Err(err) => {
                    tracing::warn!(sample = index, error = %err, "environment evaluation failed");
                    None
                }
            },
            None => None,
        };

        let cited_bullets = store.snapshot_for_cited(&generation.cited_bullet_ids);
        let trajectory = Trajectory {
            query: self.query.clone(),
            context: self.context.clone(),
            generator_output: generation.generator_output,
            final_answer: generation.final_answer,
            cited_bullet_ids: generation.cited_bullet_ids,
            environment_feedback: feedback,
            ground_truth: self.ground_truth.clone(),
        };
        if !trajectory.has_signal() {
            tracing::warn!(
                sample = index,
                "no ground truth or execution feedback; reflection quality degrades"
            );
        }

        tracing::info!(
            sample = index,
            cited = trajectory.cited_bullet_ids.len(),
            "sample transition: pending -> generated"
        );
        Ok(SampleRun {
            index: self.index,
            query: self.query,
            context: self.context,
            ground_truth: self.ground_truth,
            phase: Generated {
                trajectory,
                cited_bullets,
            },
        })
    }
}

impl SampleRun<Generated> {
    /// The answer that was emitted for this sample.
    pub fn final_answer(&self) -> &str {
        &self.phase.trajectory.final_answer
    }

    pub fn cited_count(&self) -> usize {
        self.phase.cited_bullets.len()
    }

    /// Run the (possibly iterative) reflector over the trajectory.
    pub async fn reflect(
        self,
        reflector: &Reflector,
    ) -> Result<SampleRun<Reflected>, SampleSkip> {
        let index = self.index;
        let (insight, rounds) = reflector
            .run(&self.phase.trajectory, &self.phase.cited_bullets)
            .await
            .map_err(|err| {
                tracing::warn!(sample = index, error = %err, "reflection failed, skipping");
                SampleSkip {
                    index,
                    reason: skip_reason(&err, SkipReason::ReflectorParse),
                }
            })?;

        tracing::info!(
            sample = index,
            rounds,
            tags = insight.bullet_tags.len(),
            "sample transition: generated -> reflected"
        );
        Ok(SampleRun {
            index: self.index,
            query: self.query,
            context: self.context,
            ground_truth: self.ground_truth,
            phase: Reflected {
                trajectory: self.phase.trajectory,
                insight,
                rounds,
            },
        })
    }
}

impl SampleRun<Reflected> {
    pub fn reflection_rounds(&self) -> u32 {
        self.phase.rounds
    }

    pub fn tag_count(&self) -> usize {
        self.phase.insight.bullet_tags.len()
    }

    /// Update counters from the reflector's tags, then run the curator.
    ///
    /// Counter updates are driven by the reflector's verdicts and happen
    /// regardless of whether the curator's delta survives its guards.
    pub async fn curate(
        self,
        curator: &Curator,
        store: &PlaybookStore,
    ) -> Result<(SampleRun<Curated>, AppliedDelta), SampleSkip> {
        let index = self.index;

        let cited = self
            .phase
            .trajectory
            .cited_bullet_ids
            .iter()
            .cloned()
            .collect();
        store.tag_cited(&cited, &self.phase.insight.bullet_tags);

        let outcome = curator.run(store, &self.phase.insight).await.map_err(|err| {
            tracing::warn!(sample = index, error = %err, "curation failed, skipping");
            SampleSkip {
                index,
                reason: skip_reason(&err, SkipReason::CuratorParse),
            }
        })?;

        tracing::info!(
            sample = index,
            added = outcome.applied.added.len(),
            updated = outcome.applied.updated.len(),
            deleted = outcome.applied.deleted.len(),
            "sample transition: reflected -> curated"
        );
        Ok((
            SampleRun {
                index: self.index,
                query: self.query,
                context: self.context,
                ground_truth: self.ground_truth,
                phase: Curated,
            },
            outcome.applied,
        ))
    }
}
