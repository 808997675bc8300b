//! Dispatch counters

use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Running counters for one dispatcher
#[derive(Debug, Default)]
pub struct DispatchStats {
    sent: Cell<u64>,
    delivered: Cell<u64>,
    suppressed: Cell<u64>,
    posted: Cell<u64>,
    compressed: Cell<u64>,
    cycles: Cell<u64>,
    failures: Cell<u64>,
    swept: Cell<u64>,
}

fn bump(counter: &Cell<u64>, by: u64) {
    counter.set(counter.get().saturating_add(by));
}

impl DispatchStats {
    pub(crate) fn record_send(&self) {
        bump(&self.sent, 1);
    }

    pub(crate) fn record_delivered(&self) {
        bump(&self.delivered, 1);
    }

    pub(crate) fn record_suppressed(&self) {
        bump(&self.suppressed, 1);
    }

    pub(crate) fn record_posted(&self) {
        bump(&self.posted, 1);
    }

    pub(crate) fn record_compressed(&self) {
        bump(&self.compressed, 1);
    }

    pub(crate) fn record_cycle(&self) {
        bump(&self.cycles, 1);
    }

    pub(crate) fn record_failure(&self) {
        bump(&self.failures, 1);
    }

    pub(crate) fn record_swept(&self, count: usize) {
        bump(&self.swept, count as u64);
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            sent: self.sent.get(),
            delivered: self.delivered.get(),
            suppressed: self.suppressed.get(),
            posted: self.posted.get(),
            compressed: self.compressed.get(),
            cycles: self.cycles.get(),
            failures: self.failures.get(),
            swept: self.swept.get(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.sent,
            &self.delivered,
            &self.suppressed,
            &self.posted,
            &self.compressed,
            &self.cycles,
            &self.failures,
            &self.swept,
        ] {
            counter.set(0);
        }
    }
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatsSnapshot {
    /// Deliveries attempted through the send path (direct and drained)
    pub sent: u64,
    /// Messages that reached `process_message` without error
    pub delivered: u64,
    /// Messages vetoed by a filter
    pub suppressed: u64,
    /// Posts that were queued
    pub posted: u64,
    /// Posts discarded by compression
    pub compressed: u64,
    pub cycles: u64,
    /// Handler or filter failures
    pub failures: u64,
    /// Registry entries removed because their handler was dropped
    pub swept: u64,
}
