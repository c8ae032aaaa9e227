//! Online adaptation: per-sample test-time refinement
//!
//! Samples are processed strictly in arrival order. Each prediction is
//! emitted before that sample's reflection and curation run, so the next
//! sample benefits from the lesson while no prediction is ever
//! retroactively changed.

use std::sync::Arc;

use crate::trajectory::Environment;

use super::journal::AdaptEvent;
use super::sample::SampleRun;
use super::{AdaptError, Adapter, RunSummary, Sample};

/// One emitted test-time prediction.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Prediction {
    pub index: usize,
    pub answer: String,
}

impl Adapter {
    /// Run online adaptation over samples in arrival order. Ground-truth
    /// labels are optional; execution feedback is used when the environment
    /// provides it.
    pub async fn run_online(
        &self,
        samples: &[Sample],
        environment: Option<Arc<dyn Environment>>,
    ) -> Result<(Vec<Prediction>, RunSummary), AdaptError> {
        let mut predictions = Vec::with_capacity(samples.len());
        let mut summary = RunSummary::default();

        for (index, sample) in samples.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(index, "adaptation cancelled at sample boundary");
                summary.cancelled = true;
                break;
            }

            self.maybe_lazy_refine().await;

            summary.total += 1;
            self.journal
                .append(AdaptEvent::SampleStarted { epoch: 0, index });

            let generated = match SampleRun::new(index, sample)
                .generate(&self.generator, &self.store, environment.as_deref())
                .await
            {
                Ok(generated) => generated,
                Err(skip) => {
                    summary.record_skip(skip.reason);
                    self.journal.append(AdaptEvent::SampleSkipped {
                        index,
                        reason: skip.reason,
                    });
                    continue;
                }
            };
            self.journal.append(AdaptEvent::SampleGenerated {
                index,
                cited: generated.cited_count(),
            });

            // The prediction is final from this point on; learning from the
            // sample happens strictly afterwards.
            predictions.push(Prediction {
                index,
                answer: generated.final_answer().to_string(),
            });
            self.journal.append(AdaptEvent::PredictionEmitted { index });
            tracing::info!(sample = index, "prediction emitted");

            let reflected = match generated.reflect(&self.reflector).await {
                Ok(reflected) => reflected,
                Err(skip) => {
                    summary.record_skip(skip.reason);
                    self.journal.append(AdaptEvent::SampleSkipped {
                        index,
                        reason: skip.reason,
                    });
                    continue;
                }
            };
            self.journal.append(AdaptEvent::SampleReflected {
                index,
                rounds: reflected.reflection_rounds(),
                tags: reflected.tag_count(),
            });

            match reflected.curate(&self.curator, &self.store).await {
                Ok((curated, applied)) => {
                    summary.record_applied(&applied);
                    summary.done += 1;
                    self.journal.append(AdaptEvent::SampleCurated {
                        index: curated.index,
                        added: applied.added.len(),
                        updated: applied.updated.len(),
                        deleted: applied.deleted.len(),
                    });
                    self.journal
                        .append(AdaptEvent::SampleDone { index: curated.index });
                }
                Err(skip) => {
                    summary.record_skip(skip.reason);
                    self.journal.append(AdaptEvent::SampleSkipped {
                        index,
                        reason: skip.reason,
                    });
                }
            }
        }

        tracing::info!(
            predictions = predictions.len(),
            done = summary.done,
            skipped = summary.skipped_total(),
            "online adaptation finished"
        );
        Ok((predictions, summary))
    }
}
