//! Sync instrumentation.
//!
//! Sessions report through an injected [`SyncMetrics`] sink. The counting
//! implementation has one explicit process-wide instance for applications
//! that want a single set of counters across sessions.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Something worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    /// A pass started.
    PassStarted,
    /// A pass finished.
    PassCompleted {
        /// Wall-clock time of the pass.
        duration: Duration,
    },
    /// A pass stopped on an error.
    PassFailed,
    /// The server accepted a push.
    PushAccepted,
    /// A push failed and the record was reverted.
    PushFailed,
    /// A push or pull produced a conflict.
    ConflictDetected,
    /// A conflict was settled.
    ConflictResolved,
    /// A conflict was left for the application.
    ConflictDeferred,
    /// Server changes were applied locally.
    Pulled {
        /// Number of changes.
        count: u64,
    },
    /// In-flight records were demoted by recovery.
    Recovered {
        /// Number of records.
        count: u64,
    },
    /// A record was quarantined.
    Quarantined,
}

/// Sink for sync instrumentation.
pub trait SyncMetrics: Send + Sync {
    /// Records an event.
    fn record(&self, event: MetricEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl SyncMetrics for NoopMetrics {
    fn record(&self, _event: MetricEvent) {}
}

/// Point-in-time copy of [`CounterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Passes started.
    pub passes_started: u64,
    /// Passes completed.
    pub passes_completed: u64,
    /// Passes that stopped on an error.
    pub passes_failed: u64,
    /// Accepted pushes.
    pub pushes_accepted: u64,
    /// Failed pushes.
    pub pushes_failed: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Conflicts deferred.
    pub conflicts_deferred: u64,
    /// Server changes applied.
    pub changes_pulled: u64,
    /// Records demoted by recovery.
    pub records_recovered: u64,
    /// Records quarantined.
    pub records_quarantined: u64,
    /// Total pass time in milliseconds.
    pub pass_millis: u64,
}

/// Atomic counters for every [`MetricEvent`].
#[derive(Debug, Default)]
pub struct CounterMetrics {
    passes_started: AtomicU64,
    passes_completed: AtomicU64,
    passes_failed: AtomicU64,
    pushes_accepted: AtomicU64,
    pushes_failed: AtomicU64,
    conflicts_detected: AtomicU64,
    conflicts_resolved: AtomicU64,
    conflicts_deferred: AtomicU64,
    changes_pulled: AtomicU64,
    records_recovered: AtomicU64,
    records_quarantined: AtomicU64,
    pass_millis: AtomicU64,
}

static GLOBAL: Lazy<Arc<CounterMetrics>> = Lazy::new(|| Arc::new(CounterMetrics::new()));

impl CounterMetrics {
    /// Creates a zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide instance.
    pub fn global() -> Arc<CounterMetrics> {
        Arc::clone(&GLOBAL)
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            passes_started: get(&self.passes_started),
            passes_completed: get(&self.passes_completed),
            passes_failed: get(&self.passes_failed),
            pushes_accepted: get(&self.pushes_accepted),
            pushes_failed: get(&self.pushes_failed),
            conflicts_detected: get(&self.conflicts_detected),
            conflicts_resolved: get(&self.conflicts_resolved),
            conflicts_deferred: get(&self.conflicts_deferred),
            changes_pulled: get(&self.changes_pulled),
            records_recovered: get(&self.records_recovered),
            records_quarantined: get(&self.records_quarantined),
            pass_millis: get(&self.pass_millis),
        }
    }
}

impl SyncMetrics for CounterMetrics {
    fn record(&self, event: MetricEvent) {
        let (counter, amount) = match event {
            MetricEvent::PassStarted => (&self.passes_started, 1),
            MetricEvent::PassCompleted { duration } => {
                let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                self.pass_millis.fetch_add(millis, Ordering::Relaxed);
                (&self.passes_completed, 1)
            }
            MetricEvent::PassFailed => (&self.passes_failed, 1),
            MetricEvent::PushAccepted => (&self.pushes_accepted, 1),
            MetricEvent::PushFailed => (&self.pushes_failed, 1),
            MetricEvent::ConflictDetected => (&self.conflicts_detected, 1),
            MetricEvent::ConflictResolved => (&self.conflicts_resolved, 1),
            MetricEvent::ConflictDeferred => (&self.conflicts_deferred, 1),
            MetricEvent::Pulled { count } => (&self.changes_pulled, count),
            MetricEvent::Recovered { count } => (&self.records_recovered, count),
            MetricEvent::Quarantined => (&self.records_quarantined, 1),
        };
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = CounterMetrics::new();
        metrics.record(MetricEvent::PassStarted);
        metrics.record(MetricEvent::PushAccepted);
        metrics.record(MetricEvent::PushAccepted);
        metrics.record(MetricEvent::Pulled { count: 5 });
        metrics.record(MetricEvent::PassCompleted {
            duration: Duration::from_millis(12),
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.passes_started, 1);
        assert_eq!(snapshot.passes_completed, 1);
        assert_eq!(snapshot.pushes_accepted, 2);
        assert_eq!(snapshot.changes_pulled, 5);
        assert_eq!(snapshot.pass_millis, 12);
        assert_eq!(snapshot.conflicts_detected, 0);
    }

    #[test]
    fn global_instance_is_shared() {
        let a = CounterMetrics::global();
        let b = CounterMetrics::global();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn noop_ignores_everything() {
        NoopMetrics.record(MetricEvent::Quarantined);
    }
}
