// rules-engine-core/src/metrics.rs
// ============================================================================
// Module: Engine Metrics
// Description: Lock-free counters the engine core updates on every point.
// Purpose: Feed the aggregation manager's batch/direct threshold and give
//          operators a snapshot of throughput and outcome counts.
// Dependencies: std::sync::atomic
// ============================================================================

//! ## Overview
//! Every counter here is a plain `AtomicU64`, updated with `Relaxed`
//! ordering — these are statistics, not synchronization primitives, so the
//! same reasoning that justifies relaxed atomics in a metrics SDK's
//! instrument internals applies here. [`EngineMetrics::observed_tps`]
//! buckets points processed into one-second windows to approximate
//! instantaneous throughput for the aggregation manager's batch/direct
//! switch.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::clock::Clock;

/// A point-in-time read of [`EngineMetrics`]' counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total points submitted to [`crate::engine::RuleEngine::process`].
    pub points_processed: u64,
    /// Total (rule, point) pairs whose condition matched.
    pub rules_matched: u64,
    /// Total actions that completed successfully.
    pub actions_succeeded: u64,
    /// Total actions that failed (config error, coercion error, or a
    /// recovered panic).
    pub actions_failed: u64,
    /// Total points routed through the aggregation manager's batched path.
    pub aggregates_batched: u64,
    /// Total points routed through the aggregation manager's direct path.
    pub aggregates_direct: u64,
}

/// Lock-free counters updated from every worker calling
/// [`crate::engine::RuleEngine::process`] concurrently.
pub struct EngineMetrics {
    points_processed: AtomicU64,
    rules_matched: AtomicU64,
    actions_succeeded: AtomicU64,
    actions_failed: AtomicU64,
    aggregates_batched: AtomicU64,
    aggregates_direct: AtomicU64,
    window_start: AtomicU64,
    window_count: AtomicU64,
    last_tps: AtomicU64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Builds a zeroed metrics block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            points_processed: AtomicU64::new(0),
            rules_matched: AtomicU64::new(0),
            actions_succeeded: AtomicU64::new(0),
            actions_failed: AtomicU64::new(0),
            aggregates_batched: AtomicU64::new(0),
            aggregates_direct: AtomicU64::new(0),
            window_start: AtomicU64::new(0),
            window_count: AtomicU64::new(0),
            last_tps: AtomicU64::new(0),
        }
    }

    /// Records that one point entered the pipeline, and rolls the
    /// one-second throughput bucket forward when `now` has crossed into a
    /// new second.
    pub fn record_point(&self, clock: &dyn Clock) {
        self.points_processed.fetch_add(1, Ordering::Relaxed);
        let now_secs = clock.now_unix_secs().floor() as u64;
        let window_start = self.window_start.load(Ordering::Relaxed);
        if now_secs != window_start {
            let finished = self.window_count.swap(1, Ordering::Relaxed);
            self.window_start.store(now_secs, Ordering::Relaxed);
            self.last_tps.store(finished, Ordering::Relaxed);
        } else {
            self.window_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Approximate points-per-second over the most recently completed
    /// one-second bucket.
    #[must_use]
    pub fn observed_tps(&self) -> f64 {
        self.last_tps.load(Ordering::Relaxed) as f64
    }

    /// Records a rule whose condition matched the point under evaluation.
    pub fn record_match(&self) {
        self.rules_matched.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one action's outcome.
    pub fn record_action(&self, success: bool) {
        if success {
            self.actions_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.actions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records which path an aggregate action took.
    pub fn record_aggregate_path(&self, batched: bool) {
        if batched {
            self.aggregates_batched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.aggregates_direct.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Takes a consistent-enough snapshot of every counter. Individual
    /// loads are independent, so two counters incremented in the same
    /// `process` call may straddle the snapshot under concurrent load; no
    /// ordering is implied across points.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            points_processed: self.points_processed.load(Ordering::Relaxed),
            rules_matched: self.rules_matched.load(Ordering::Relaxed),
            actions_succeeded: self.actions_succeeded.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            aggregates_batched: self.aggregates_batched.load(Ordering::Relaxed),
            aggregates_direct: self.aggregates_direct.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SteppedClock(AtomicU64);

    impl Clock for SteppedClock {
        fn now_unix_secs(&self) -> f64 {
            f64::from_bits(self.0.load(Ordering::Relaxed))
        }
    }

    impl SteppedClock {
        fn new(now: f64) -> Self {
            Self(AtomicU64::new(now.to_bits()))
        }

        fn set(&self, now: f64) {
            self.0.store(now.to_bits(), Ordering::Relaxed);
        }
    }

    #[test]
    fn tps_rolls_over_when_the_second_boundary_is_crossed() {
        let clock = SteppedClock::new(10.0);
        let metrics = EngineMetrics::new();
        for _ in 0..5 {
            metrics.record_point(&clock);
        }
        clock.set(11.0);
        metrics.record_point(&clock);
        assert_eq!(metrics.observed_tps(), 5.0);
    }

    #[test]
    fn action_outcomes_tally_independently() {
        let metrics = EngineMetrics::new();
        metrics.record_action(true);
        metrics.record_action(true);
        metrics.record_action(false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.actions_succeeded, 2);
        assert_eq!(snapshot.actions_failed, 1);
    }
}
