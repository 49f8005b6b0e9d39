use std::sync::atomic::{AtomicUsize, Ordering};
use serde::Serialize;

use crate::operation::Origin;
use crate::storer::Mode;

/// Sequencer counters
#[derive(Default)]
pub struct SequencerMetrics {
    pub backfill_applied: AtomicUsize,
    pub realtime_applied: AtomicUsize,
    pub sessions_completed: AtomicUsize,
    /// Operations dropped unapplied by cancellation
    pub discarded: AtomicUsize,
}

impl SequencerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_applied(&self, origin: Origin) {
        match origin {
            Origin::Backfill => self.backfill_applied.fetch_add(1, Ordering::Relaxed),
            Origin::Realtime => self.realtime_applied.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Point-in-time view of a sequencer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub mode: Mode,
    pub backfill_queued: usize,
    pub realtime_queued: usize,
    pub backfill_applied: usize,
    pub realtime_applied: usize,
    pub sessions_completed: usize,
    pub discarded: usize,
}

impl MetricsSnapshot {
    pub(crate) fn capture(
        metrics: &SequencerMetrics,
        mode: Mode,
        backfill_queued: usize,
        realtime_queued: usize,
    ) -> Self {
        MetricsSnapshot {
            mode,
            backfill_queued,
            realtime_queued,
            backfill_applied: metrics.backfill_applied.load(Ordering::Relaxed),
            realtime_applied: metrics.realtime_applied.load(Ordering::Relaxed),
            sessions_completed: metrics.sessions_completed.load(Ordering::Relaxed),
            discarded: metrics.discarded.load(Ordering::Relaxed),
        }
    }
}
