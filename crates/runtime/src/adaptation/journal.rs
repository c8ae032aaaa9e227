//! In-memory adaptation journal
//!
//! A bounded ring buffer of per-sample events for observability. When the
//! buffer reaches capacity the oldest entries are evicted; the run summary
//! is accounted separately and never loses counts.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use super::SkipReason;

/// Events emitted during an adaptation run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AdaptEvent {
    SampleStarted {
        epoch: u32,
        index: usize,
    },
    /// Generation finished; citations are resolved against the live playbook
    SampleGenerated {
        index: usize,
        cited: usize,
    },
    PredictionEmitted {
        index: usize,
    },
    SampleReflected {
        index: usize,
        rounds: u32,
        tags: usize,
    },
    SampleCurated {
        index: usize,
        added: usize,
        updated: usize,
        deleted: usize,
    },
    SampleDone {
        index: usize,
    },
    SampleSkipped {
        index: usize,
        reason: SkipReason,
    },
    EpochCompleted {
        epoch: u32,
        added: usize,
        updated: usize,
    },
    CheckpointWritten {
        path: String,
    },
}

/// One journal entry with its sequence number and wall-clock timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event: AdaptEvent,
}

/// Bounded in-memory journal. The lock is never held across an await.
pub struct AdaptJournal {
    sequence: AtomicU64,
    capacity: usize,
    buffer: parking_lot::Mutex<VecDeque<JournalEntry>>,
}

impl Default for AdaptJournal {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl AdaptJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            capacity,
            buffer: parking_lot::Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an event, evicting the oldest entry at capacity.
    pub fn append(&self, event: AdaptEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let entry = JournalEntry {
            sequence,
            timestamp: chrono::Utc::now(),
            event,
        };
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    /// All currently buffered entries, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Consume and return all buffered entries.
    pub fn drain(&self) -> Vec<JournalEntry> {
        self.buffer.lock().drain(..).collect()
    }

    /// Next sequence number to be assigned.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_retains_entries_in_order() {
        let journal = AdaptJournal::new(100);
        journal.append(AdaptEvent::SampleStarted { epoch: 1, index: 0 });
        journal.append(AdaptEvent::SampleDone { index: 0 });

        let entries = journal.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 0);
        assert_eq!(entries[1].sequence, 1);
        assert_eq!(journal.next_sequence(), 2);
    }

    #[test]
    fn test_journal_overflow_evicts_oldest() {
        let journal = AdaptJournal::new(3);
        for index in 0..5 {
            journal.append(AdaptEvent::SampleDone { index });
        }
        let entries = journal.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].sequence, 2);
        assert_eq!(entries[2].sequence, 4);
    }

    #[test]
    fn test_journal_drain_empties_but_keeps_sequence() {
        let journal = AdaptJournal::new(10);
        journal.append(AdaptEvent::SampleDone { index: 0 });
        let drained = journal.drain();
        assert_eq!(drained.len(), 1);
        assert!(journal.entries().is_empty());
        assert_eq!(journal.next_sequence(), 1);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = AdaptEvent::SampleSkipped {
            index: 3,
            reason: SkipReason::Collapse,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "sample_skipped");
        assert_eq!(json["reason"], "collapse");
    }
}
