//! Counters accumulated across dispatch ticks.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatch::TickReport;
use crate::utils::{now_utc, Timestamp};

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Running totals for the dispatch loop.
#[derive(Debug, Default)]
pub struct TickMetrics {
    ticks: AtomicU64,
    assigned: AtomicU64,
    stale: AtomicU64,
    stale_resets: AtomicU64,
    reconciled: AtomicU64,
    pruned_workers: AtomicU64,
    errors: AtomicU64,
    last_tick: RwLock<Option<Timestamp>>,
    last_tick_ms: RwLock<Option<f64>>,
}

impl TickMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one tick's report.
    pub fn record_tick(&self, report: &TickReport, duration_ms: f64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.assigned.fetch_add(count(report.assigned.len()), Ordering::Relaxed);
        self.stale.fetch_add(count(report.stale.len()), Ordering::Relaxed);
        self.reconciled.fetch_add(count(report.reconciled.len()), Ordering::Relaxed);
        self.pruned_workers.fetch_add(count(report.pruned_workers.len()), Ordering::Relaxed);
        self.errors.fetch_add(count(report.errors), Ordering::Relaxed);
        *self.last_tick.write() = Some(now_utc());
        *self.last_tick_ms.write() = Some(duration_ms);
    }

    /// Counts stale actions the loop rewound.
    pub fn record_stale_resets(&self, resets: usize) {
        self.stale_resets.fetch_add(count(resets), Ordering::Relaxed);
    }

    /// Ticks completed.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Actions handed to workers.
    #[must_use]
    pub fn assigned(&self) -> u64 {
        self.assigned.load(Ordering::Relaxed)
    }

    /// Stale reports, counting an action once per tick it was flagged.
    #[must_use]
    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    /// Stale actions rewound.
    #[must_use]
    pub fn stale_resets(&self) -> u64 {
        self.stale_resets.load(Ordering::Relaxed)
    }

    /// Pipelines reconciled.
    #[must_use]
    pub fn reconciled(&self) -> u64 {
        self.reconciled.load(Ordering::Relaxed)
    }

    /// Workers pruned.
    #[must_use]
    pub fn pruned_workers(&self) -> u64 {
        self.pruned_workers.load(Ordering::Relaxed)
    }

    /// Isolated per-unit failures.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Snapshot as JSON.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "ticks": self.ticks(),
            "assigned": self.assigned(),
            "stale": self.stale(),
            "stale_resets": self.stale_resets(),
            "reconciled": self.reconciled(),
            "pruned_workers": self.pruned_workers(),
            "errors": self.errors(),
            "last_tick": *self.last_tick.read(),
            "last_tick_ms": *self.last_tick_ms.read(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineId;

    #[test]
    fn test_record_tick_accumulates() {
        let metrics = TickMetrics::new();
        let report = TickReport {
            reconciled: vec![PipelineId::new()],
            errors: 2,
            ..TickReport::default()
        };
        metrics.record_tick(&report, 1.5);
        metrics.record_tick(&TickReport::default(), 0.5);
        metrics.record_stale_resets(3);

        assert_eq!(metrics.ticks(), 2);
        assert_eq!(metrics.reconciled(), 1);
        assert_eq!(metrics.errors(), 2);
        assert_eq!(metrics.stale_resets(), 3);

        let dict = metrics.to_dict();
        assert_eq!(dict["last_tick_ms"], 0.5);
        assert!(dict["last_tick"].is_string());
    }
}
