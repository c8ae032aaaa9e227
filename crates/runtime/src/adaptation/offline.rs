//! Offline adaptation: multi-epoch, in-place playbook training over a
//! labeled split
//!
//! Generation and reflection for a batch run concurrently; curation commits
//! happen on the driver task in completion-arrival order, so ID sequences
//! are reproducible given a fixed schedule. The playbook persists across
//! epochs and samples, so early epochs' contributions are refined by later
//! ones.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::playbook::PlaybookStore;
use crate::trajectory::Environment;

use super::journal::AdaptEvent;
use super::sample::SampleRun;
use super::{AdaptError, Adapter, RunSummary, Sample, SkipReason};

/// Optional validation hook for early stopping: higher scores are better.
#[async_trait]
pub trait ValidationMetric: Send + Sync {
    async fn evaluate(&self, store: &PlaybookStore) -> f64;
}

/// Per-run options for offline training.
#[derive(Default)]
pub struct OfflineOptions {
    /// Checkpoint written at every epoch boundary; the last one is
    /// authoritative after cancellation
    pub checkpoint_path: Option<PathBuf>,
    /// Validation metric for patience-based early stopping
    pub validation: Option<Arc<dyn ValidationMetric>>,
}

impl Adapter {
    /// Run offline training. Stops when max epochs are reached, an epoch
    /// yields zero ADDs and zero UPDATEs, or the validation metric fails to
    /// improve for `patience` epochs.
    pub async fn run_offline(
        &self,
        samples: &[Sample],
        environment: Option<Arc<dyn Environment>>,
        options: OfflineOptions,
    ) -> Result<RunSummary, AdaptError> {
        let mut summary = RunSummary::default();
        let mut best_score: Option<f64> = None;
        let mut stale_epochs = 0u32;
        let batch_size = self.config.adaptation.batch_size.max(1);

        let indexed: Vec<(usize, &Sample)> = samples.iter().enumerate().collect();

        'epochs: for epoch in 1..=self.config.adaptation.max_epochs {
            let mut epoch_added = 0usize;
            let mut epoch_updated = 0usize;

            for batch in indexed.chunks(batch_size) {
                if self.cancel.is_cancelled() {
                    tracing::info!(epoch, "adaptation cancelled at sample boundary");
                    summary.cancelled = true;
                    break 'epochs;
                }

                self.maybe_lazy_refine().await;

                let mut set = JoinSet::new();
                for (index, sample) in batch {
                    self.journal
                        .append(AdaptEvent::SampleStarted { epoch, index: *index });
                    let generator = self.generator.clone();
                    let reflector = self.reflector.clone();
                    let store = self.store.clone();
                    let environment = environment.clone();
                    let journal = self.journal.clone();
                    let sample = (*sample).clone();
                    let index = *index;
                    set.spawn(async move {
                        let generated = SampleRun::new(index, &sample)
                            .generate(&generator, &store, environment.as_deref())
                            .await?;
                        journal.append(AdaptEvent::SampleGenerated {
                            index,
                            cited: generated.cited_count(),
                        });
                        generated.reflect(&reflector).await
                    });
                }

                // First come, first committed: curation runs here, serially,
                // in the order generation+reflection finish.
                while let Some(joined) = set.join_next().await {
                    summary.total += 1;
                    let reflected = match joined {
                        Ok(Ok(reflected)) => reflected,
                        Ok(Err(skip)) => {
                            summary.record_skip(skip.reason);
                            self.journal.append(AdaptEvent::SampleSkipped {
                                index: skip.index,
                                reason: skip.reason,
                            });
                            continue;
                        }
                        Err(join_error) => {
                            tracing::error!(error = %join_error, "sample task failed");
                            summary.record_skip(SkipReason::LlmFatal);
                            continue;
                        }
                    };

                    let index = reflected.index;
                    self.journal.append(AdaptEvent::SampleReflected {
                        index,
                        rounds: reflected.reflection_rounds(),
                        tags: reflected.tag_count(),
                    });

                    match reflected.curate(&self.curator, &self.store).await {
                        Ok((curated, applied)) => {
                            epoch_added += applied.added.len();
                            epoch_updated += applied.updated.len();
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
                                index: skip.index,
                                reason: skip.reason,
                            });
                        }
                    }
                }
            }

            summary.epochs_run = epoch;
            self.journal.append(AdaptEvent::EpochCompleted {
                epoch,
                added: epoch_added,
                updated: epoch_updated,
            });
            tracing::info!(
                epoch,
                added = epoch_added,
                updated = epoch_updated,
                playbook_bullets = self.store.len(),
                "epoch completed"
            );

            if let Some(path) = &options.checkpoint_path {
                self.store.save(path)?;
                self.journal.append(AdaptEvent::CheckpointWritten {
                    path: path.display().to_string(),
                });
            }

            if epoch_added == 0 && epoch_updated == 0 {
                tracing::info!(epoch, "epoch yielded no ADDs or UPDATEs, stopping early");
                break;
            }

            if let Some(metric) = &options.validation {
                let score = metric.evaluate(&self.store).await;
                match best_score {
                    Some(best) if score <= best => {
                        stale_epochs += 1;
                        tracing::info!(epoch, score, best, stale_epochs, "validation did not improve");
                        if stale_epochs >= self.config.adaptation.patience {
                            tracing::info!("validation patience exhausted, stopping early");
                            break;
                        }
                    }
                    _ => {
                        best_score = Some(score);
                        stale_epochs = 0;
                    }
                }
            }
        }

        tracing::info!(
            total = summary.total,
            done = summary.done,
            skipped = summary.skipped_total(),
            "offline adaptation finished"
        );
        Ok(summary)
    }
}
