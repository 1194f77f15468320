// rules-engine-core/src/stats.rs
// ============================================================================
// Module: Incremental Stats
// Description: Per-series lock-free statistics over a count or time window.
// Purpose: Atomic accumulation + ring buffer feeding the aggregation manager.
// Dependencies: std::sync::atomic, parking_lot::Mutex (time-window ring only)
// ============================================================================

//! ## Overview
//! Two variants share one accumulation policy (the atomic variant,
//! adopted as normative over a legacy mutex variant): `sum`, `sum_squares`,
//! `min`, `max`, `count`, and `first`/`last` are cumulative-since-creation
//! accumulators, updated with compare-and-swap loops on bit-packed `f64`
//! values so no mutex sits on the hot path. Percentiles, the IQR outlier
//! count, and threshold counts are computed over the window's ring buffer
//! snapshot, which *is* bounded — the cumulative accumulators and the
//! windowed ring serve different questions (lifetime shape vs. recent
//! values) and this module keeps them clearly apart rather than overloading
//! `count` to mean both at once. See `DESIGN.md` for the rationale.
//!
//! [`IncrementalStats`] is the count-window variant: a fixed-size ring
//! indexed by an atomic write counter, matching production code with no
//! mutex in `add_value`. [`TimeWindowStats`] is the time-window variant:
//! retiring expired (value, timestamp) pairs requires compaction, so its
//! ring is guarded by a `parking_lot::Mutex`; min/max for this variant are
//! recomputed over the surviving slots whenever a retirement occurs.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

// ============================================================================
// SECTION: Atomic f64
// ============================================================================

struct AtomicF64(AtomicU64);

impl AtomicF64 {
    const fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn fetch_add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let updated = (f64::from_bits(current) + delta).to_bits();
            match self.0.compare_exchange_weak(current, updated, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn fetch_min(&self, candidate: f64) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if candidate >= f64::from_bits(current) {
                return;
            }
            match self.0.compare_exchange_weak(current, candidate.to_bits(), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn fetch_max(&self, candidate: f64) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if candidate <= f64::from_bits(current) {
                return;
            }
            match self.0.compare_exchange_weak(current, candidate.to_bits(), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

// ============================================================================
// SECTION: Shared Accumulators
// ============================================================================

struct Accumulators {
    count: AtomicU64,
    null_count: AtomicU64,
    sum: AtomicF64,
    sum_squares: AtomicF64,
    min: AtomicF64,
    max: AtomicF64,
    has_first: AtomicBool,
    first_value: AtomicF64,
    first_timestamp: AtomicF64,
    last_value: AtomicF64,
    last_timestamp: AtomicF64,
}

impl Accumulators {
    const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            null_count: AtomicU64::new(0),
            sum: AtomicF64::new(0.0),
            sum_squares: AtomicF64::new(0.0),
            min: AtomicF64::new(f64::INFINITY),
            max: AtomicF64::new(f64::NEG_INFINITY),
            has_first: AtomicBool::new(false),
            first_value: AtomicF64::new(0.0),
            first_timestamp: AtomicF64::new(0.0),
            last_value: AtomicF64::new(0.0),
            last_timestamp: AtomicF64::new(0.0),
        }
    }

    fn record_invalid(&self) {
        self.null_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_valid(&self, value: f64, timestamp: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value);
        self.sum_squares.fetch_add(value * value);
        self.min.fetch_min(value);
        self.max.fetch_max(value);
        if !self.has_first.swap(true, Ordering::AcqRel) {
            self.first_value.store(value);
            self.first_timestamp.store(timestamp);
        }
        self.last_value.store(value);
        self.last_timestamp.store(timestamp);
    }
}

/// A snapshot of [`IncrementalStats`] or [`TimeWindowStats`] aggregate
/// functions, keyed by the names used in `AggregateConfig.functions`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Number of valid (finite) observations recorded.
    pub count: u64,
    /// Number of invalid (NaN/Inf) observations recorded.
    pub null_count: u64,
    /// Sum of valid observations.
    pub sum: f64,
    /// Arithmetic mean; `0.0` when `count == 0`.
    pub mean: f64,
    /// Minimum valid observation; `f64::INFINITY` when `count == 0`.
    pub min: f64,
    /// Maximum valid observation; `f64::NEG_INFINITY` when `count == 0`.
    pub max: f64,
    /// Sample variance, sanitized to `0.0` for NaN/Inf/negative roundoff.
    pub variance: f64,
    /// Standard deviation, `sqrt(variance)`.
    pub stddev: f64,
    /// First valid observation.
    pub first: f64,
    /// Last valid observation.
    pub last: f64,
    /// Timestamp of the first valid observation.
    pub first_timestamp: f64,
    /// Timestamp of the last valid observation.
    pub last_timestamp: f64,
}

fn sanitize(value: f64) -> f64 {
    if !value.is_finite() {
        0.0
    } else if value < 0.0 {
        0.0
    } else if value.abs() < 1e-15 {
        0.0
    } else {
        value
    }
}

fn snapshot_from(accumulators: &Accumulators) -> StatsSnapshot {
    let count = accumulators.count.load(Ordering::Relaxed);
    let sum = accumulators.sum.load();
    let sum_squares = accumulators.sum_squares.load();
    let mean = if count == 0 { 0.0 } else { sum / count as f64 };
    let variance = if count < 2 {
        0.0
    } else {
        let n = count as f64;
        sanitize((n.mul_add(-mean * mean, sum_squares)) / (n - 1.0))
    };
    StatsSnapshot {
        count,
        null_count: accumulators.null_count.load(Ordering::Relaxed),
        sum,
        mean,
        min: accumulators.min.load(),
        max: accumulators.max.load(),
        variance,
        stddev: variance.sqrt(),
        first: accumulators.first_value.load(),
        last: accumulators.last_value.load(),
        first_timestamp: accumulators.first_timestamp.load(),
        last_timestamp: accumulators.last_timestamp.load(),
    }
}

/// Exact percentile over a snapshot, using linear interpolation at
/// `p * (n - 1)`.
#[must_use]
pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }
    let rank = p * (sorted_values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted_values[lower];
    }
    let fraction = rank - lower as f64;
    sorted_values[lower].mul_add(1.0 - fraction, sorted_values[upper] * fraction)
}

/// Count of IQR outliers in `values` (unsorted). Returns `0` when fewer than
/// four samples are present.
#[must_use]
pub fn outlier_count(values: &[f64]) -> usize {
    if values.len() < 4 {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower_fence = 1.5f64.mul_add(-iqr, q1);
    let upper_fence = 1.5f64.mul_add(iqr, q3);
    sorted.iter().filter(|&&v| v < lower_fence || v > upper_fence).count()
}

/// Counts of values above/below/within an optional `[lower, upper]` range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdCounts {
    /// Number of values strictly above `upper` (when set).
    pub above: usize,
    /// Number of values strictly below `lower` (when set).
    pub below: usize,
    /// Number of values within `[lower, upper]` inclusive.
    pub in_range: usize,
}

/// Walks `values`, counting samples above/below/within the configured
/// bounds; either bound may be absent.
#[must_use]
pub fn threshold_counts(values: &[f64], lower: Option<f64>, upper: Option<f64>) -> ThresholdCounts {
    let mut counts = ThresholdCounts::default();
    for &value in values {
        let above = upper.is_some_and(|u| value > u);
        let below = lower.is_some_and(|l| value < l);
        if above {
            counts.above += 1;
        }
        if below {
            counts.below += 1;
        }
        if !above && !below {
            counts.in_range += 1;
        }
    }
    counts
}

// ============================================================================
// SECTION: Count-Window Variant
// ============================================================================

/// Lock-free incremental statistics over the most recent `window_size`
/// values.
///
/// `add_value` never blocks: the ring write is a single atomic
/// fetch-and-increment followed by an indexed store, and every accumulator
/// update is a CAS loop over a bit-packed `f64`.
pub struct IncrementalStats {
    window_size: usize,
    accumulators: Accumulators,
    ring: Vec<AtomicU64>,
    write_index: AtomicU64,
    window_full: AtomicBool,
}

impl IncrementalStats {
    /// Builds a new count-window stats object. `window_size` of `0` is
    /// coerced to `1` so the ring is never empty.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            accumulators: Accumulators::new(),
            ring: (0..window_size).map(|_| AtomicU64::new(0)).collect(),
            write_index: AtomicU64::new(0),
            window_full: AtomicBool::new(false),
        }
    }

    /// Records a single observation. NaN/Inf values bump `null_count` and
    /// leave every other accumulator untouched.
    pub fn add_value(&self, value: f64, timestamp: f64) {
        if !value.is_finite() {
            self.accumulators.record_invalid();
            return;
        }
        self.accumulators.record_valid(value, timestamp);
        self.write_ring(value);
    }

    fn write_ring(&self, value: f64) {
        let index = self.write_index.fetch_add(1, Ordering::AcqRel);
        let slot = (index % self.window_size as u64) as usize;
        self.ring[slot].store(value.to_bits(), Ordering::Release);
        if index + 1 >= self.window_size as u64 {
            self.window_full.store(true, Ordering::Release);
        }
    }

    /// Records a batch of observations, applying the fold once with a
    /// single write-index advance equal to the number of valid values.
    pub fn add_batch(&self, values: &[f64], timestamp: f64) {
        for &value in values {
            if value.is_finite() {
                self.accumulators.record_valid(value, timestamp);
                self.write_ring(value);
            } else {
                self.accumulators.record_invalid();
            }
        }
    }

    /// Returns the current number of slots in the ring that hold a real
    /// observation (as opposed to the unwritten `0.0` placeholder).
    #[must_use]
    pub fn window_len(&self) -> usize {
        if self.window_full.load(Ordering::Acquire) {
            self.window_size
        } else {
            (self.write_index.load(Ordering::Acquire) as usize).min(self.window_size)
        }
    }

    /// A coherent snapshot of the values currently in the ring.
    #[must_use]
    pub fn ring_snapshot(&self) -> Vec<f64> {
        let len = self.window_len();
        self.ring[..len].iter().map(|slot| f64::from_bits(slot.load(Ordering::Acquire))).collect()
    }

    /// The cumulative accumulator snapshot (sum, mean, min, max, stddev,
    /// first/last).
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        snapshot_from(&self.accumulators)
    }
}

// ============================================================================
// SECTION: Time-Window Variant
// ============================================================================

/// Incremental statistics over all samples within the last `window_duration`
/// seconds (optionally calendar-aligned).
pub struct TimeWindowStats {
    window_duration: f64,
    calendar_aligned: bool,
    accumulators: Accumulators,
    ring: Mutex<Vec<(f64, f64)>>,
}

/// Calendar alignment granularity for a time window, chosen from the
/// window's duration: a window of at least a day aligns to day start; at
/// least an hour to hour start; at least a minute to minute start;
/// otherwise to second start.
#[must_use]
pub fn calendar_cutoff(now: f64, window_duration: f64) -> f64 {
    let granularity = if window_duration >= 86_400.0 {
        86_400.0
    } else if window_duration >= 3_600.0 {
        3_600.0
    } else if window_duration >= 60.0 {
        60.0
    } else {
        1.0
    };
    (now / granularity).floor() * granularity
}

impl TimeWindowStats {
    /// Builds a time-window stats object.
    #[must_use]
    pub const fn new(window_duration: f64, calendar_aligned: bool) -> Self {
        Self {
            window_duration,
            calendar_aligned,
            accumulators: Accumulators::new(),
            ring: Mutex::new(Vec::new()),
        }
    }

    /// Records a single observation at `timestamp`, retiring any slots that
    /// have fallen outside the window before accepting the new value.
    ///
    /// NaN/Inf values bump `null_count` without touching the ring or
    /// accumulators.
    pub fn add_value(&self, value: f64, timestamp: f64) {
        if !value.is_finite() {
            self.accumulators.record_invalid();
            return;
        }
        self.accumulators.record_valid(value, timestamp);

        let cutoff = if self.calendar_aligned {
            calendar_cutoff(timestamp, self.window_duration)
        } else {
            timestamp - self.window_duration
        };

        let mut ring = self.ring.lock();
        let before = ring.len();
        ring.retain(|&(_, ts)| ts >= cutoff);
        ring.push((value, timestamp));
        if ring.len() != before + 1 {
            self.recompute_extremes(&ring);
        }
    }

    fn recompute_extremes(&self, ring: &[(f64, f64)]) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &(value, _) in ring {
            min = min.min(value);
            max = max.max(value);
        }
        self.accumulators.min.store(min);
        self.accumulators.max.store(max);
    }

    /// A coherent snapshot of the values currently within the window.
    #[must_use]
    pub fn ring_snapshot(&self) -> Vec<f64> {
        self.ring.lock().iter().map(|&(value, _)| value).collect()
    }

    /// The cumulative accumulator snapshot. `min`/`max` reflect only the
    /// samples currently inside the window (see [`Self::recompute_extremes`]);
    /// `sum`/`count`/`mean` remain cumulative-since-creation like the
    /// count-window variant.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        snapshot_from(&self.accumulators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_and_inf_increment_null_count_only() {
        let stats = IncrementalStats::new(4);
        stats.add_value(1.0, 0.0);
        stats.add_value(f64::NAN, 1.0);
        stats.add_value(f64::INFINITY, 2.0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.null_count, 2);
        assert_eq!(snapshot.sum, 1.0);
    }

    #[test]
    fn window_len_caps_at_window_size_after_wraparound() {
        let stats = IncrementalStats::new(3);
        for i in 0..10 {
            stats.add_value(f64::from(i), f64::from(i));
        }
        assert_eq!(stats.window_len(), 3);
        let ring = stats.ring_snapshot();
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn min_max_and_mean_stay_ordered() {
        let stats = IncrementalStats::new(100);
        for value in [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0] {
            stats.add_value(value, 0.0);
        }
        let snapshot = stats.snapshot();
        assert!(snapshot.min <= snapshot.mean);
        assert!(snapshot.mean <= snapshot.max);
        assert!(snapshot.stddev >= 0.0);
    }

    #[test]
    fn exact_percentile_matches_linear_interpolation() {
        let sorted = vec![10.0, 20.0, 30.0];
        assert_eq!(percentile(&sorted, 0.5), 20.0);
    }

    #[test]
    fn fewer_than_four_samples_never_report_outliers() {
        assert_eq!(outlier_count(&[1.0, 2.0, 3.0]), 0);
    }

    #[test]
    fn time_window_retires_expired_slots_and_recomputes_extremes() {
        let stats = TimeWindowStats::new(10.0, false);
        stats.add_value(100.0, 0.0);
        stats.add_value(1.0, 5.0);
        stats.add_value(2.0, 15.0);
        let ring = stats.ring_snapshot();
        assert_eq!(ring.len(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.min, 1.0);
        assert_eq!(snapshot.max, 2.0);
    }
}

#[cfg(test)]
mod numeric_safety_properties {
    use proptest::prelude::*;

    use super::IncrementalStats;

    proptest! {
        /// For any finite input sequence, reported stats contain no NaN or
        /// Inf, stddev is non-negative, and min <= mean <= max once count > 0.
        #[test]
        fn finite_sequences_never_report_nan_inf_or_inverted_bounds(
            values in proptest::collection::vec(-1.0e9_f64..1.0e9_f64, 0..200)
        ) {
            let stats = IncrementalStats::new(values.len().max(1));
            for (index, &value) in values.iter().enumerate() {
                stats.add_value(value, index as f64);
            }
            let snapshot = stats.snapshot();

            prop_assert!(snapshot.mean.is_finite());
            prop_assert!(snapshot.variance.is_finite());
            prop_assert!(snapshot.stddev.is_finite());
            prop_assert!(snapshot.stddev >= 0.0);

            if snapshot.count > 0 {
                prop_assert!(snapshot.min <= snapshot.mean + 1e-6);
                prop_assert!(snapshot.mean <= snapshot.max + 1e-6);
            }
        }

        /// NaN/Inf inputs are always diverted to `null_count` and never
        /// reach `min`/`max`/`mean`, regardless of how many finite values
        /// surround them.
        #[test]
        fn non_finite_inputs_are_always_excluded_from_finite_accumulators(
            values in proptest::collection::vec(-1.0e6_f64..1.0e6_f64, 1..50)
        ) {
            let stats = IncrementalStats::new(values.len());
            let mut expected_finite = 0u64;
            for (index, &value) in values.iter().enumerate() {
                stats.add_value(value, index as f64);
                expected_finite += 1;
                // Interleave a non-finite observation after every value.
                stats.add_value(f64::NAN, index as f64);
            }
            let snapshot = stats.snapshot();
            prop_assert_eq!(snapshot.count, expected_finite);
            prop_assert_eq!(snapshot.null_count, values.len() as u64);
            prop_assert!(snapshot.min.is_finite());
            prop_assert!(snapshot.max.is_finite());
        }
    }
}
