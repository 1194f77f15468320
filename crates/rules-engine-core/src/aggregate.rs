// rules-engine-core/src/aggregate.rs
// ============================================================================
// Module: Aggregation Manager
// Description: Shards per-series stats by state key, batches hot paths,
//              evicts stale state by TTL and memory/cardinality pressure.
// Purpose: Owns every IncrementalStats/TimeWindowStats instance the rules
//          engine creates.
// Dependencies: fnv::FnvHasher, parking_lot::Mutex, tokio::sync::mpsc, tracing
// ============================================================================

//! ## Overview
//! A sharded map of `state_key -> stats`, sharded by a 32-bit FNV hash of the
//! key so that state for the same key is always routed to the same shard
//! (the sharding-locality testable property). Each shard owns its state map
//! exclusively; cross-shard access never happens. Membership metadata (state
//! count, memory estimate) is guarded by a single writer at state-creation
//! time, matching the concurrency model's "single writer at state-creation"
//! rule.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use fnv::FnvHasher;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::clock::Clock;
use crate::stats::IncrementalStats;
use crate::stats::StatsSnapshot;
use crate::stats::TimeWindowStats;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum number of retained aggregate states.
pub const DEFAULT_MAX_STATES: usize = 10_000;

/// Default maximum estimated memory footprint, in bytes (~100 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 100 * 1024 * 1024;

/// Default TTL before a sweeper drops an idle state.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default sweeper tick interval.
pub const DEFAULT_CLEANUP_TICK: Duration = Duration::from_secs(60);

/// Batched mode engages once observed throughput exceeds this points/sec.
pub const BATCH_TPS_THRESHOLD: f64 = 10_000.0;

/// Batched mode also engages once `window_size` exceeds this.
pub const BATCH_WINDOW_SIZE_THRESHOLD: usize = 100;

/// Per-shard batch channel capacity.
pub const BATCH_CHANNEL_CAPACITY: usize = 1_000;

/// Batch flush threshold (points).
pub const BATCH_SIZE: usize = 500;

/// Batch flush interval when `BATCH_SIZE` isn't reached first.
pub const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Timeout before an enqueue falls back to direct processing.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Timeout waiting for a batched result reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(100);

const BASE_STATE_SIZE_BYTES: usize = 200;
const BYTES_PER_WINDOW_SLOT: usize = 8;

/// Shard count clamp: `clamp(num_cpus, 4, 64)`.
#[must_use]
pub fn shard_count(num_cpus: usize) -> usize {
    num_cpus.clamp(4, 64)
}

/// Routes a state key to its shard index via a 32-bit FNV hash.
#[must_use]
pub fn shard_for(state_key: &str, shards: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(state_key.as_bytes());
    (hasher.finish() as u32 as usize) % shards
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Window kind for an [`AggregateConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Fixed sample count.
    Count,
    /// Fixed wall-clock duration.
    Time,
}

/// Calendar alignment for a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// No alignment; the window slides continuously.
    #[default]
    None,
    /// Align window boundaries to calendar units (day/hour/minute/second).
    Calendar,
}

/// Configuration for one `aggregate` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Sample count for a count window; ignored for time windows.
    pub window_size: usize,
    /// Window kind.
    pub window_type: WindowType,
    /// Duration in seconds for a time window; ignored for count windows.
    #[serde(default)]
    pub window_duration: f64,
    /// Calendar alignment (time windows only).
    #[serde(default)]
    pub alignment: Alignment,
    /// Requested aggregate function names (`avg`, `p95`, `stddev`, ...).
    pub functions: Vec<String>,
    /// Point fields used to compute the group-by suffix of the state key.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Output field-name overrides, by function name.
    #[serde(default)]
    pub output: HashMap<String, String>,
    /// Per-state TTL in seconds; falls back to [`DEFAULT_TTL`] when `0`.
    #[serde(default)]
    pub ttl: f64,
    /// Upper bound for `above_count`/`in_range_count`.
    #[serde(default)]
    pub upper_limit: Option<f64>,
    /// Lower bound for `below_count`/`in_range_count`.
    #[serde(default)]
    pub lower_limit: Option<f64>,
    /// IQR multiplier override for `outlier_count` (currently informational;
    /// the multiplier itself is fixed at 1.5).
    #[serde(default)]
    pub outlier_threshold: Option<f64>,
}

// ============================================================================
// SECTION: Aggregate State
// ============================================================================

enum WindowedStats {
    Count(IncrementalStats),
    Time(TimeWindowStats),
}

impl WindowedStats {
    fn add_value(&self, value: f64, timestamp: f64) {
        match self {
            Self::Count(stats) => stats.add_value(value, timestamp),
            Self::Time(stats) => stats.add_value(value, timestamp),
        }
    }

    fn add_batch(&self, values: &[f64], timestamp: f64) {
        match self {
            Self::Count(stats) => stats.add_batch(values, timestamp),
            Self::Time(stats) => {
                for &value in values {
                    stats.add_value(value, timestamp);
                }
            }
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        match self {
            Self::Count(stats) => stats.snapshot(),
            Self::Time(stats) => stats.snapshot(),
        }
    }

    fn ring_snapshot(&self) -> Vec<f64> {
        match self {
            Self::Count(stats) => stats.ring_snapshot(),
            Self::Time(stats) => stats.ring_snapshot(),
        }
    }

    fn window_len(&self) -> usize {
        match self {
            Self::Count(stats) => stats.window_len(),
            Self::Time(stats) => stats.ring_snapshot().len(),
        }
    }
}

/// One per-key aggregate state: its stats object plus bookkeeping the
/// manager needs for TTL eviction.
pub struct AggregateState {
    /// The state key this instance was created for.
    pub group_key: String,
    window_size: usize,
    stats: WindowedStats,
    last_access: Mutex<f64>,
}

impl AggregateState {
    fn new(group_key: String, config: &AggregateConfig, now: f64) -> Self {
        let stats = match config.window_type {
            WindowType::Count => WindowedStats::Count(IncrementalStats::new(config.window_size)),
            WindowType::Time => WindowedStats::Time(TimeWindowStats::new(config.window_duration, config.alignment == Alignment::Calendar)),
        };
        Self {
            group_key,
            window_size: config.window_size,
            stats,
            last_access: Mutex::new(now),
        }
    }

    fn touch(&self, now: f64) {
        *self.last_access.lock() = now;
    }

    fn idle_for(&self, now: f64) -> f64 {
        now - *self.last_access.lock()
    }

    /// Computes the requested named functions over this state's stats.
    #[must_use]
    pub fn compute_functions(&self, config: &AggregateConfig) -> HashMap<String, f64> {
        compute_named_functions(&self.stats, config)
    }

    /// Whether this state's window is ready to emit, per the window's
    /// emission policy (time windows emit whenever non-empty; count windows
    /// emit once full; see [`emission_ready`]).
    #[must_use]
    pub fn emission_ready(&self, window_type: WindowType) -> bool {
        emission_ready(&self.stats, window_type, self.window_size)
    }

    /// Number of valid samples currently inside the window.
    #[must_use]
    pub fn count(&self) -> usize {
        self.stats.window_len()
    }

    /// The raw stats snapshot, exposing `first_timestamp`/`last_timestamp`
    /// for building an [`crate::forward::AggregateResult`]'s window bounds.
    #[must_use]
    pub fn raw_snapshot(&self) -> crate::stats::StatsSnapshot {
        self.stats.snapshot()
    }
}

fn emission_ready(stats: &WindowedStats, window_type: WindowType, window_size: usize) -> bool {
    match window_type {
        WindowType::Time => stats.snapshot().count > 0,
        WindowType::Count => stats.window_len() >= window_size,
    }
}

#[allow(clippy::too_many_lines, reason = "one branch per supported aggregate function name, a lookup table would obscure the per-function math")]
fn compute_named_functions(stats: &WindowedStats, config: &AggregateConfig) -> HashMap<String, f64> {
    let snapshot = stats.snapshot();
    let ring = stats.ring_snapshot();
    let mut sorted_ring = ring.clone();
    sorted_ring.sort_by(f64::total_cmp);
    let thresholds = crate::stats::threshold_counts(&ring, config.lower_limit, config.upper_limit);

    let mut results = HashMap::new();
    for function in &config.functions {
        let value = match function.as_str() {
            "count" => snapshot.count as f64,
            "sum" => snapshot.sum,
            "mean" | "avg" | "average" => snapshot.mean,
            "min" => snapshot.min,
            "max" => snapshot.max,
            "first" => snapshot.first,
            "last" => snapshot.last,
            "median" | "p50" => crate::stats::percentile(&sorted_ring, 0.50),
            "p25" => crate::stats::percentile(&sorted_ring, 0.25),
            "p75" => crate::stats::percentile(&sorted_ring, 0.75),
            "p90" => crate::stats::percentile(&sorted_ring, 0.90),
            "p95" => crate::stats::percentile(&sorted_ring, 0.95),
            "p99" => crate::stats::percentile(&sorted_ring, 0.99),
            "variance" => snapshot.variance,
            "stddev" | "std" => snapshot.stddev,
            "change" => ring.last().copied().unwrap_or(0.0) - ring.first().copied().unwrap_or(0.0),
            "change_rate" => {
                let span = snapshot.last_timestamp - snapshot.first_timestamp;
                if span.abs() < f64::EPSILON {
                    0.0
                } else {
                    (ring.last().copied().unwrap_or(0.0) - ring.first().copied().unwrap_or(0.0)) / span
                }
            }
            "volatility" => snapshot.stddev,
            "cv" => {
                if snapshot.mean.abs() < f64::EPSILON {
                    0.0
                } else {
                    snapshot.stddev / snapshot.mean.abs()
                }
            }
            "null_rate" => {
                let total = snapshot.count + snapshot.null_count;
                if total == 0 {
                    0.0
                } else {
                    snapshot.null_count as f64 / total as f64
                }
            }
            "completeness" => {
                let total = snapshot.count + snapshot.null_count;
                if total == 0 {
                    0.0
                } else {
                    snapshot.count as f64 / total as f64
                }
            }
            "outlier_count" => crate::stats::outlier_count(&ring) as f64,
            "above_count" => thresholds.above as f64,
            "below_count" => thresholds.below as f64,
            "in_range_count" => thresholds.in_range as f64,
            _ => continue,
        };
        let output_name = config.output.get(function).cloned().unwrap_or_else(|| function.clone());
        results.insert(output_name, value);
    }
    results
}

// ============================================================================
// SECTION: Numeric Extraction
// ============================================================================

/// Extracts a numeric observation from a point's value, per the priority
/// list: scalar value, then `elements[0]`, `magnitude`, `speed`,
/// `brightness`, mean of `values[]`, or a recognized scalar composite field.
#[must_use]
pub fn extract_numeric(value: Option<&crate::point::ScalarValue>, composite: Option<&crate::point::CompositeData>) -> Option<f64> {
    if let Some(scalar) = value {
        if let Some(numeric) = crate::value::as_numeric(scalar) {
            return Some(numeric);
        }
    }
    let composite = composite?;
    use crate::point::CompositeData;
    match composite {
        CompositeData::Array(values) => values.first().copied(),
        CompositeData::Vector3D(_) => composite.derived_value("magnitude"),
        CompositeData::Location(_) => composite.derived_value("speed"),
        CompositeData::Color(_) => composite.derived_value("lightness"),
        CompositeData::Vector(vector) => {
            if vector.values.is_empty() {
                None
            } else {
                Some(vector.values.iter().sum::<f64>() / vector.values.len() as f64)
            }
        }
        CompositeData::Matrix(_) | CompositeData::TimeSeries(_) => composite
            .derived_value("last_value")
            .or_else(|| composite.derived_value("0_0")),
    }
}

// ============================================================================
// SECTION: Shard
// ============================================================================

struct Shard {
    states: Mutex<HashMap<String, Arc<AggregateState>>>,
}

impl Shard {
    fn new() -> Self {
        Self { states: Mutex::new(HashMap::new()) }
    }
}

/// A batched point submission for a shard's channel.
struct BatchJob {
    state_key: String,
    value: f64,
    config: AggregateConfig,
    reply: oneshot::Sender<HashMap<String, f64>>,
}

// ============================================================================
// SECTION: Aggregation Manager
// ============================================================================

/// Sharded manager owning every aggregate state in the engine.
pub struct AggregationManager {
    shards: Vec<Shard>,
    clock: Arc<dyn Clock>,
    max_states: usize,
    max_memory_bytes: usize,
    ttl: Duration,
    state_count: AtomicUsize,
    memory_estimate: AtomicUsize,
    batch_senders: Vec<mpsc::Sender<BatchJob>>,
    batch_receivers: Mutex<Vec<Option<mpsc::Receiver<BatchJob>>>>,
}

impl AggregationManager {
    /// Builds a manager with `num_cpus` shards (clamped to `[4, 64]`).
    #[must_use]
    pub fn new(num_cpus: usize, clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(num_cpus, clock, DEFAULT_MAX_STATES, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_TTL)
    }

    /// Builds a manager with explicit pressure limits, for tests.
    #[must_use]
    pub fn with_limits(num_cpus: usize, clock: Arc<dyn Clock>, max_states: usize, max_memory_bytes: usize, ttl: Duration) -> Self {
        let count = shard_count(num_cpus);
        let mut batch_senders = Vec::with_capacity(count);
        let mut batch_receivers = Vec::with_capacity(count);
        for _ in 0..count {
            let (sender, receiver) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
            batch_senders.push(sender);
            batch_receivers.push(Some(receiver));
        }
        Self {
            shards: (0..count).map(|_| Shard::new()).collect(),
            clock,
            max_states,
            max_memory_bytes,
            ttl,
            state_count: AtomicUsize::new(0),
            memory_estimate: AtomicUsize::new(0),
            batch_senders,
            batch_receivers: Mutex::new(batch_receivers),
        }
    }

    /// Spawns one long-running batch-flush task per shard. Must be called
    /// from within a Tokio runtime (typically during engine startup); the
    /// tasks run until their shard's sender side is dropped.
    pub fn spawn_batch_workers(self: &Arc<Self>) {
        let mut receivers = self.batch_receivers.lock();
        for (shard_index, slot) in receivers.iter_mut().enumerate() {
            if let Some(receiver) = slot.take() {
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    manager.run_batch_worker(shard_index, receiver).await;
                });
            }
        }
    }

    async fn run_batch_worker(&self, shard_index: usize, mut receiver: mpsc::Receiver<BatchJob>) {
        let mut pending: HashMap<String, (Vec<BatchJob>, AggregateConfig)> = HashMap::new();
        let mut pending_count = 0usize;
        let mut ticker = tokio::time::interval(BATCH_FLUSH_INTERVAL);
        loop {
            tokio::select! {
                job = receiver.recv() => {
                    match job {
                        Some(job) => {
                            pending_count += 1;
                            pending.entry(job.state_key.clone()).or_insert_with(|| (Vec::new(), job.config.clone())).0.push(job);
                            if pending_count >= BATCH_SIZE {
                                self.flush_shard(shard_index, &mut pending);
                                pending_count = 0;
                            }
                        }
                        None => {
                            self.flush_shard(shard_index, &mut pending);
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if pending_count > 0 {
                        self.flush_shard(shard_index, &mut pending);
                        pending_count = 0;
                    }
                }
            }
        }
    }

    fn flush_shard(&self, shard_index: usize, pending: &mut HashMap<String, (Vec<BatchJob>, AggregateConfig)>) {
        let shard = &self.shards[shard_index];
        let now = self.clock.now_unix_secs();
        for (state_key, (jobs, config)) in pending.drain() {
            let values: Vec<f64> = jobs.iter().map(|job| job.value).collect();
            let state = self
                .try_create_state(shard, &state_key, &config, now)
                .unwrap_or_else(|| Arc::new(AggregateState::new(state_key.clone(), &config, now)));
            state.touch(now);
            state.stats.add_batch(&values, now);
            let results = state.compute_functions(&config);
            for job in jobs {
                let _ = job.reply.send(results.clone());
            }
        }
    }

    /// Batched-mode processing: enqueues `value` onto the owning shard's
    /// channel and awaits the flushed result. Falls back to
    /// [`Self::process_direct`] when the enqueue would block past
    /// [`ENQUEUE_TIMEOUT`] or the reply doesn't arrive within
    /// [`REPLY_TIMEOUT`].
    pub async fn process_batched(&self, state_key: &str, value: f64, config: &AggregateConfig) -> HashMap<String, f64> {
        let shard_index = self.shard_index(state_key);
        let sender = &self.batch_senders[shard_index];
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = BatchJob {
            state_key: state_key.to_string(),
            value,
            config: config.clone(),
            reply: reply_tx,
        };

        if tokio::time::timeout(ENQUEUE_TIMEOUT, sender.send(job)).await.is_err() {
            return self.process_direct(state_key, value, config);
        }

        match tokio::time::timeout(REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(results)) => results,
            _ => self.process_direct(state_key, value, config),
        }
    }

    /// Whether batched processing should be used for this config, per the
    /// throughput/window-size thresholds.
    #[must_use]
    pub fn should_batch(observed_tps: f64, config: &AggregateConfig) -> bool {
        observed_tps > BATCH_TPS_THRESHOLD || config.window_size > BATCH_WINDOW_SIZE_THRESHOLD
    }

    /// Builds the state key: `rule_id` followed by `:` and each group-by
    /// field's value, with `"unknown"` substituted for a missing tag.
    #[must_use]
    pub fn state_key(rule_id: &str, point: &crate::point::Point, group_by: &[String]) -> String {
        let mut key = rule_id.to_string();
        for field in group_by {
            key.push(':');
            let value = match field.as_str() {
                "device_id" => Some(point.device_id.clone()),
                "key" => Some(point.key.clone()),
                "type" => Some(format!("{:?}", point.data_type).to_lowercase()),
                other => point.get_tag(other).map(str::to_string),
            };
            key.push_str(value.as_deref().unwrap_or("unknown"));
        }
        key
    }

    fn estimate_state_size(window_size: usize) -> usize {
        BASE_STATE_SIZE_BYTES + BYTES_PER_WINDOW_SLOT * window_size
    }

    fn shard_index(&self, state_key: &str) -> usize {
        shard_for(state_key, self.shards.len())
    }

    /// Direct-mode processing: looks up or creates the state for `state_key`,
    /// records `value`, and returns the requested function values.
    ///
    /// If the manager is at its state or memory budget and a forced cleanup
    /// still leaves it over budget, this returns an ephemeral (non-retained)
    /// result computed from a throwaway stats instance, matching the
    /// pressure-handling contract described above.
    pub fn process_direct(&self, state_key: &str, value: f64, config: &AggregateConfig) -> HashMap<String, f64> {
        let now = self.clock.now_unix_secs();
        let shard = &self.shards[self.shard_index(state_key)];

        let existing = {
            let states = shard.states.lock();
            states.get(state_key).cloned()
        };

        let state = if let Some(state) = existing {
            state
        } else {
            match self.try_create_state(shard, state_key, config, now) {
                Some(state) => state,
                None => {
                    let ephemeral = AggregateState::new(state_key.to_string(), config, now);
                    ephemeral.stats.add_value(value, now);
                    return ephemeral.compute_functions(config);
                }
            }
        };

        state.touch(now);
        state.stats.add_value(value, now);
        state.compute_functions(config)
    }

    fn try_create_state(&self, shard: &Shard, state_key: &str, config: &AggregateConfig, now: f64) -> Option<Arc<AggregateState>> {
        let mut states = shard.states.lock();
        if let Some(state) = states.get(state_key) {
            return Some(state.clone());
        }

        if self.over_budget(config.window_size) {
            self.force_cleanup(&mut states, now);
            if self.over_budget(config.window_size) {
                return None;
            }
        }

        let state = Arc::new(AggregateState::new(state_key.to_string(), config, now));
        states.insert(state_key.to_string(), state.clone());
        self.state_count.fetch_add(1, Ordering::Relaxed);
        self.memory_estimate.fetch_add(Self::estimate_state_size(config.window_size), Ordering::Relaxed);
        Some(state)
    }

    fn over_budget(&self, window_size: usize) -> bool {
        self.state_count.load(Ordering::Relaxed) >= self.max_states
            || self.memory_estimate.load(Ordering::Relaxed) + Self::estimate_state_size(window_size) >= self.max_memory_bytes
    }

    fn force_cleanup(&self, states: &mut HashMap<String, Arc<AggregateState>>, now: f64) {
        let half_ttl = self.ttl.as_secs_f64() / 2.0;
        let stale: Vec<String> = states
            .iter()
            .filter(|(_, state)| state.idle_for(now) > half_ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if states.remove(&key).is_some() {
                self.state_count.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Runs one TTL sweep across every shard, dropping entries idle longer
    /// than the configured TTL. Intended to be called from a long-running
    /// sweeper task bound to the engine's cancellation signal.
    pub fn sweep_expired(&self) {
        let now = self.clock.now_unix_secs();
        for shard in &self.shards {
            let mut states = shard.states.lock();
            let expired: Vec<String> = states
                .iter()
                .filter(|(_, state)| state.idle_for(now) > self.ttl.as_secs_f64())
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                if states.remove(&key).is_some() {
                    self.state_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Total number of retained states, for diagnostics.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.state_count.load(Ordering::Relaxed)
    }

    /// Looks up a retained state by key, for callers that need emission
    /// metadata (count, window bounds) beyond the plain function map
    /// [`Self::process_direct`]/[`Self::process_batched`] return. Returns
    /// `None` for ephemeral (pressure-shed) states, since those are never
    /// inserted into a shard.
    #[must_use]
    pub fn lookup(&self, state_key: &str) -> Option<Arc<AggregateState>> {
        let shard = &self.shards[self.shard_index(state_key)];
        shard.states.lock().get(state_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock;

    impl Clock for FixedClock {
        fn now_unix_secs(&self) -> f64 {
            1_000.0
        }
    }

    fn count_window_config(window_size: usize, functions: &[&str]) -> AggregateConfig {
        AggregateConfig {
            window_size,
            window_type: WindowType::Count,
            window_duration: 0.0,
            alignment: Alignment::None,
            functions: functions.iter().map(|name| (*name).to_string()).collect(),
            group_by: Vec::new(),
            output: HashMap::new(),
            ttl: 0.0,
            upper_limit: None,
            lower_limit: None,
            outlier_threshold: None,
        }
    }

    /// End-to-end scenario: window_size=3, functions=[avg]; after the third
    /// point of [10, 20, 30], `avg` must read 20.
    #[test]
    fn count_window_average_matches_after_window_fills() {
        let manager = AggregationManager::new(4, Arc::new(FixedClock));
        let config = count_window_config(3, &["avg"]);

        manager.process_direct("rule-1", 10.0, &config);
        manager.process_direct("rule-1", 20.0, &config);
        let results = manager.process_direct("rule-1", 30.0, &config);

        assert!((results["avg"] - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn shard_for_is_stable_across_repeated_lookups() {
        let shards = 16;
        let first = shard_for("device-42:temperature", shards);
        for _ in 0..50 {
            assert_eq!(shard_for("device-42:temperature", shards), first);
        }
    }

    #[test]
    fn shard_for_always_returns_an_in_range_index() {
        let shards = shard_count(2);
        for key in ["a", "b", "device-1", "a-much-longer-state-key:with:group:by:suffixes"] {
            assert!(shard_for(key, shards) < shards);
        }
    }

    #[test]
    fn state_for_the_same_key_always_lands_in_the_same_shard() {
        let manager = AggregationManager::new(4, Arc::new(FixedClock));
        let config = count_window_config(2, &["count"]);

        manager.process_direct("shared-key", 1.0, &config);
        let shard_index_before = manager.shard_index("shared-key");
        manager.process_direct("shared-key", 2.0, &config);
        let shard_index_after = manager.shard_index("shared-key");

        assert_eq!(shard_index_before, shard_index_after);
        assert!(manager.lookup("shared-key").is_some());
    }
}
