// rules-engine-core/src/filter.rs
// ============================================================================
// Module: Filter Handler
// Description: Stateful duplicate/rate/threshold/statistical/consecutive
//              filters, each with a bounded per-key state map and TTL sweep.
// Purpose: `(dropped, reason)` decision per point per filter kind.
// Dependencies: parking_lot::Mutex, crate::value, crate::point
// ============================================================================

//! ## Overview
//! Each filter kind owns a bounded `key -> state` map guarded by a single
//! mutex (filter state churns far less than aggregate state, so a shard
//! scheme isn't warranted here); a TTL sweeper (default 1 hour) drops idle
//! entries. All eleven kinds return `(dropped, reason)`; misconfiguration is
//! a typed [`ConfigError`].

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::ConfigError;
use crate::point::Point;
use crate::point::ScalarValue;
use crate::value;

/// Default TTL before an idle per-key filter state is swept.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3_600);

/// Default cadence at which [`FilterEngine::sweep_expired`] is invoked by a
/// background task, distinct from the TTL itself.
pub const DEFAULT_SWEEP_TICK: Duration = Duration::from_secs(300);

/// Outcome of running a filter against a point.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Whether the point should be dropped.
    pub dropped: bool,
    /// Human-readable reason, set only when `dropped` is `true`.
    pub reason: Option<String>,
}

impl FilterOutcome {
    const fn pass() -> Self {
        Self { dropped: false, reason: None }
    }

    fn drop_with(reason: impl Into<String>) -> Self {
        Self { dropped: true, reason: Some(reason.into()) }
    }
}

/// The wire-visible `filter` action parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    /// Drop repeats of the same value seen within `window` seconds.
    Duplicate {
        /// Window in seconds; falls back to the sweeper TTL when absent.
        #[serde(default)]
        window: Option<f64>,
        /// Field the duplicate key is derived from; defaults to `value`.
        #[serde(default)]
        field: Option<String>,
    },
    /// Drop when the instantaneous per-minute rate exceeds `max_rate`.
    RateLimit {
        /// Maximum allowed points per minute.
        max_rate: f64,
    },
    /// Drop values outside `[min, max]`.
    Range {
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// Drop values that satisfy `op threshold`.
    Threshold {
        /// Comparison operator (`gt`, `lt`, `eq`, `ne`, `gte`, `lte`).
        op: String,
        /// Threshold value.
        threshold: f64,
    },
    /// Drop nil values and empty strings.
    Null,
    /// Drop on a simple glob match (`*` prefix/suffix/any) against a field.
    Pattern {
        /// Glob pattern.
        pattern: String,
        /// Field the pattern is matched against; defaults to `value`.
        #[serde(default)]
        field: Option<String>,
    },
    /// Drop when `now - timestamp > window`.
    TimeWindow {
        /// Window in seconds.
        window: f64,
    },
    /// Allow-list of quality codes; drop anything outside the list.
    Quality {
        /// Accepted quality codes.
        allowed: Vec<i32>,
    },
    /// Drop if the rate of change exceeds `max_change_rate` within
    /// `time_window` seconds. A dropped sample never updates the baseline.
    ChangeRate {
        /// Maximum allowed `|Δv| / Δt`.
        max_change_rate: f64,
        /// Time window in seconds used to judge staleness of the baseline.
        time_window: f64,
    },
    /// Drop statistically anomalous values against a rolling window.
    StatisticalAnomaly {
        /// Rolling window size; defaults to `20`.
        #[serde(default = "StatisticalAnomaly::default_window_size")]
        window_size: usize,
        /// Minimum samples before anomaly detection activates; defaults to `5`.
        #[serde(default = "StatisticalAnomaly::default_min_samples")]
        min_samples: usize,
        /// Standard-deviation threshold; defaults to `2.0`.
        #[serde(default = "StatisticalAnomaly::default_std_threshold")]
        std_threshold: f64,
    },
    /// Drop after `consecutive_count` consecutive matches of an inner filter.
    Consecutive {
        /// Matches required before dropping begins.
        consecutive_count: u32,
        /// The wrapped filter whose matches are counted.
        inner: Box<FilterConfig>,
    },
}

/// Helper default constants for the statistical-anomaly filter, named so
/// `#[serde(default = "...")]` can reference them.
struct StatisticalAnomaly;
impl StatisticalAnomaly {
    const fn default_window_size() -> usize {
        20
    }
    const fn default_min_samples() -> usize {
        5
    }
    const fn default_std_threshold() -> f64 {
        2.0
    }
}

// ============================================================================
// SECTION: Per-Kind State
// ============================================================================

struct DuplicateEntry {
    value: String,
    timestamp: f64,
}

struct RateLimitEntry {
    last_timestamp: f64,
}

struct ChangeRateEntry {
    last_value: f64,
    last_timestamp: f64,
}

struct StatisticsWindow {
    values: VecDeque<f64>,
    window_size: usize,
}

impl StatisticsWindow {
    fn new(window_size: usize) -> Self {
        Self { values: VecDeque::with_capacity(window_size), window_size }
    }

    fn mean_stddev(&self) -> Option<(f64, f64)> {
        let n = self.values.len();
        if n < 2 {
            return None;
        }
        let mean = self.values.iter().sum::<f64>() / n as f64;
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        Some((mean, variance.sqrt()))
    }

    fn push(&mut self, value: f64) {
        if self.values.len() >= self.window_size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }
}

struct ConsecutiveEntry {
    consecutive_count: u32,
}

// ============================================================================
// SECTION: Filter Engine
// ============================================================================

/// Owns all stateful filter maps for one engine instance.
pub struct FilterEngine {
    clock: Arc<dyn Clock>,
    duplicate: Mutex<HashMap<String, DuplicateEntry>>,
    rate_limit: Mutex<HashMap<String, RateLimitEntry>>,
    time_window: Mutex<HashMap<String, f64>>,
    change_rate: Mutex<HashMap<String, ChangeRateEntry>>,
    statistical: Mutex<HashMap<String, StatisticsWindow>>,
    consecutive: Mutex<HashMap<String, ConsecutiveEntry>>,
    /// Last-touched timestamp per `state_key`, independent of which filter
    /// kinds have been evaluated against it; backs [`Self::sweep_expired`]
    /// since not every per-kind entry carries its own timestamp.
    last_touched: Mutex<HashMap<String, f64>>,
}

impl FilterEngine {
    /// Builds an empty filter engine.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            duplicate: Mutex::new(HashMap::new()),
            rate_limit: Mutex::new(HashMap::new()),
            time_window: Mutex::new(HashMap::new()),
            change_rate: Mutex::new(HashMap::new()),
            statistical: Mutex::new(HashMap::new()),
            consecutive: Mutex::new(HashMap::new()),
            last_touched: Mutex::new(HashMap::new()),
        }
    }

    /// Drops every per-kind entry (across all filter maps) whose `state_key`
    /// has not been touched within `ttl`. Keys are evaluated against the
    /// shared `last_touched`
    /// bookkeeping rather than each map's own value shape, since several
    /// kinds (statistical, consecutive) do not carry a timestamp field.
    pub fn sweep_expired(&self, ttl: Duration) {
        let now = self.clock.now_unix_secs();
        let cutoff = now - ttl.as_secs_f64();
        let expired: Vec<String> = {
            let touched = self.last_touched.lock();
            touched.iter().filter(|(_, &last)| last < cutoff).map(|(key, _)| key.clone()).collect()
        };
        if expired.is_empty() {
            return;
        }
        self.last_touched.lock().retain(|key, _| !expired.contains(key));
        self.duplicate.lock().retain(|key, _| !expired.contains(key));
        self.rate_limit.lock().retain(|key, _| !expired.contains(key));
        self.time_window.lock().retain(|key, _| !expired.contains(key));
        self.change_rate.lock().retain(|key, _| !expired.contains(key));
        self.statistical.lock().retain(|key, _| !expired.contains(key));
        self.consecutive.lock().retain(|key, _| !expired.contains(key));
    }

    /// Evaluates `config` for `point`, keyed by `state_key` (typically
    /// `device_id:key`, the caller's choice).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a malformed `threshold` op
    /// or an unresolvable field reference.
    pub fn evaluate(&self, state_key: &str, point: &Point, config: &FilterConfig) -> Result<FilterOutcome, ConfigError> {
        self.last_touched.lock().insert(state_key.to_string(), self.clock.now_unix_secs());
        match config {
            FilterConfig::Duplicate { window, field } => Ok(self.duplicate(state_key, point, *window, field.as_deref())),
            FilterConfig::RateLimit { max_rate } => Ok(self.rate_limit(state_key, *max_rate)),
            FilterConfig::Range { min, max } => Ok(Self::range(point, *min, *max)),
            FilterConfig::Threshold { op, threshold } => Self::threshold(point, op, *threshold),
            FilterConfig::Null => Ok(Self::null(point)),
            FilterConfig::Pattern { pattern, field } => Ok(Self::pattern(point, pattern, field.as_deref())),
            FilterConfig::TimeWindow { window } => Ok(self.time_window(state_key, point, *window)),
            FilterConfig::Quality { allowed } => Ok(Self::quality(point, allowed)),
            FilterConfig::ChangeRate { max_change_rate, time_window } => {
                Ok(self.change_rate(state_key, point, *max_change_rate, *time_window))
            }
            FilterConfig::StatisticalAnomaly { window_size, min_samples, std_threshold } => {
                Ok(self.statistical_anomaly(state_key, point, *window_size, *min_samples, *std_threshold))
            }
            FilterConfig::Consecutive { consecutive_count, inner } => self.consecutive(state_key, point, *consecutive_count, inner),
        }
    }

    fn numeric_value(point: &Point) -> Option<f64> {
        point.value.as_ref().and_then(value::as_numeric)
    }

    fn duplicate(&self, state_key: &str, point: &Point, window: Option<f64>, field: Option<&str>) -> FilterOutcome {
        let now = self.clock.now_unix_secs();
        let window = window.unwrap_or(DEFAULT_SWEEP_INTERVAL.as_secs_f64());
        let value_str = field
            .and_then(|f| crate::condition::resolve_field(point, f))
            .or_else(|| point.value.clone())
            .map_or_else(String::new, |v| value::as_string(&v));

        let mut entries = self.duplicate.lock();
        let outcome = if let Some(entry) = entries.get(state_key) {
            if entry.value == value_str && now - entry.timestamp <= window {
                FilterOutcome::drop_with("duplicate")
            } else {
                FilterOutcome::pass()
            }
        } else {
            FilterOutcome::pass()
        };
        entries.insert(state_key.to_string(), DuplicateEntry { value: value_str, timestamp: now });
        outcome
    }

    fn rate_limit(&self, state_key: &str, max_rate: f64) -> FilterOutcome {
        let now = self.clock.now_unix_secs();
        let mut entries = self.rate_limit.lock();
        let outcome = entries.get(state_key).map_or_else(FilterOutcome::pass, |entry| {
            let delta = (now - entry.last_timestamp).max(f64::EPSILON);
            let instantaneous_rate = 60.0 / delta;
            if instantaneous_rate > max_rate {
                FilterOutcome::drop_with(format!("rate limit exceeded: {instantaneous_rate:.2}/min > {max_rate:.2}/min"))
            } else {
                FilterOutcome::pass()
            }
        });
        entries.insert(state_key.to_string(), RateLimitEntry { last_timestamp: now });
        outcome
    }

    fn range(point: &Point, min: f64, max: f64) -> FilterOutcome {
        let Some(numeric) = Self::numeric_value(point) else {
            return FilterOutcome::pass();
        };
        if numeric > max {
            FilterOutcome::drop_with(format!("value {numeric:.2} greater than max {max:.2}"))
        } else if numeric < min {
            FilterOutcome::drop_with(format!("value {numeric:.2} less than min {min:.2}"))
        } else {
            FilterOutcome::pass()
        }
    }

    fn threshold(point: &Point, op: &str, threshold: f64) -> Result<FilterOutcome, ConfigError> {
        let Some(numeric) = Self::numeric_value(point) else {
            return Ok(FilterOutcome::pass());
        };
        let matches = match op {
            "gt" => numeric > threshold,
            "lt" => numeric < threshold,
            "eq" => (numeric - threshold).abs() < f64::EPSILON,
            "ne" => (numeric - threshold).abs() >= f64::EPSILON,
            "gte" => numeric >= threshold,
            "lte" => numeric <= threshold,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "op".to_string(),
                    message: format!("unsupported threshold operator '{other}'"),
                })
            }
        };
        Ok(if matches {
            FilterOutcome::drop_with(format!("value {numeric:.2} {op} threshold {threshold:.2}"))
        } else {
            FilterOutcome::pass()
        })
    }

    fn null(point: &Point) -> FilterOutcome {
        match &point.value {
            None => FilterOutcome::drop_with("null value"),
            Some(ScalarValue::String(s)) if s.is_empty() => FilterOutcome::drop_with("empty string"),
            Some(_) => FilterOutcome::pass(),
        }
    }

    fn pattern(point: &Point, pattern: &str, field: Option<&str>) -> FilterOutcome {
        let text = field
            .and_then(|f| crate::condition::resolve_field(point, f))
            .or_else(|| point.value.clone())
            .map(|v| value::as_string(&v))
            .unwrap_or_default();
        if glob_match(pattern, &text) {
            FilterOutcome::drop_with(format!("pattern '{pattern}' matched"))
        } else {
            FilterOutcome::pass()
        }
    }

    fn time_window(&self, state_key: &str, point: &Point, window: f64) -> FilterOutcome {
        let now = self.clock.now_unix_secs();
        let mut entries = self.time_window.lock();
        entries.insert(state_key.to_string(), now);
        if now - point.timestamp > window {
            FilterOutcome::drop_with(format!("point age {:.2}s exceeds window {window:.2}s", now - point.timestamp))
        } else {
            FilterOutcome::pass()
        }
    }

    fn quality(point: &Point, allowed: &[i32]) -> FilterOutcome {
        if allowed.contains(&point.quality) {
            FilterOutcome::pass()
        } else {
            FilterOutcome::drop_with(format!("quality {} not in allow-list", point.quality))
        }
    }

    fn change_rate(&self, state_key: &str, point: &Point, max_change_rate: f64, time_window: f64) -> FilterOutcome {
        let Some(numeric) = Self::numeric_value(point) else {
            return FilterOutcome::pass();
        };
        let mut entries = self.change_rate.lock();
        let Some(baseline) = entries.get(state_key) else {
            entries.insert(state_key.to_string(), ChangeRateEntry { last_value: numeric, last_timestamp: point.timestamp });
            return FilterOutcome::pass();
        };

        if point.timestamp - baseline.last_timestamp > time_window {
            entries.insert(state_key.to_string(), ChangeRateEntry { last_value: numeric, last_timestamp: point.timestamp });
            return FilterOutcome::pass();
        }

        let delta_t = (point.timestamp - baseline.last_timestamp).max(f64::EPSILON);
        let rate = (numeric - baseline.last_value).abs() / delta_t;
        if rate > max_change_rate {
            FilterOutcome::drop_with(format!("change rate {rate:.4}/s exceeds {max_change_rate:.4}/s"))
        } else {
            entries.insert(state_key.to_string(), ChangeRateEntry { last_value: numeric, last_timestamp: point.timestamp });
            FilterOutcome::pass()
        }
    }

    fn statistical_anomaly(&self, state_key: &str, point: &Point, window_size: usize, min_samples: usize, std_threshold: f64) -> FilterOutcome {
        let Some(numeric) = Self::numeric_value(point) else {
            return FilterOutcome::pass();
        };
        let mut entries = self.statistical.lock();
        let window = entries.entry(state_key.to_string()).or_insert_with(|| StatisticsWindow::new(window_size));

        if window.values.len() >= min_samples {
            if let Some((mean, stddev)) = window.mean_stddev() {
                if stddev > 0.0 && (numeric - mean).abs() > std_threshold * stddev {
                    return FilterOutcome::drop_with(format!(
                        "value {numeric:.4} deviates {:.2} stddev from mean {mean:.4}",
                        (numeric - mean).abs() / stddev
                    ));
                }
            }
        }
        window.push(numeric);
        FilterOutcome::pass()
    }

    fn consecutive(&self, state_key: &str, point: &Point, consecutive_count: u32, inner: &FilterConfig) -> Result<FilterOutcome, ConfigError> {
        let inner_outcome = self.evaluate(state_key, point, inner)?;
        let mut entries = self.consecutive.lock();
        let entry = entries.entry(state_key.to_string()).or_insert(ConsecutiveEntry { consecutive_count: 0 });

        if inner_outcome.dropped {
            entry.consecutive_count += 1;
            if entry.consecutive_count >= consecutive_count {
                return Ok(FilterOutcome::drop_with(format!(
                    "{} consecutive matches of inner filter",
                    entry.consecutive_count
                )));
            }
        } else {
            entry.consecutive_count = 0;
        }
        Ok(FilterOutcome::pass())
    }
}

/// A minimal glob matcher supporting `*prefix`, `suffix*`, `*contains*`, and
/// exact (no-wildcard) matches.
fn glob_match(pattern: &str, text: &str) -> bool {
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(rest), _) if pattern.ends_with('*') && pattern.len() > 1 => {
            let inner = &rest[..rest.len().saturating_sub(1)];
            text.contains(inner)
        }
        (Some(suffix), _) => text.ends_with(suffix),
        (None, Some(prefix)) => text.starts_with(prefix),
        (None, None) => text == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::DataType;

    fn point(value: f64, timestamp: f64) -> Point {
        Point {
            device_id: "d1".to_string(),
            key: "t".to_string(),
            value: Some(ScalarValue::Float(value)),
            data_type: DataType::Float,
            timestamp,
            quality: 0,
            tags: HashMap::new(),
            composite: None,
        }
    }

    struct FixedClock(std::sync::atomic::AtomicU64);
    impl Clock for FixedClock {
        fn now_unix_secs(&self) -> f64 {
            f64::from_bits(self.0.load(std::sync::atomic::Ordering::Relaxed))
        }
    }
    impl FixedClock {
        fn new(now: f64) -> Arc<Self> {
            Arc::new(Self(std::sync::atomic::AtomicU64::new(now.to_bits())))
        }
        fn set(&self, now: f64) {
            self.0.store(now.to_bits(), std::sync::atomic::Ordering::Relaxed);
        }
    }

    #[test]
    fn range_filter_drops_outside_bounds() {
        let engine = FilterEngine::new(FixedClock::new(0.0));
        let config = FilterConfig::Range { min: 0.0, max: 20.0 };
        let outcome = engine.evaluate("d1:t", &point(25.0, 0.0), &config).expect("valid config");
        assert!(outcome.dropped);
        assert!(outcome.reason.as_deref().unwrap().contains("greater"));
    }

    #[test]
    fn duplicate_filter_matches_end_to_end_scenario() {
        let clock = FixedClock::new(0.0);
        let engine = FilterEngine::new(clock.clone());
        let config = FilterConfig::Duplicate { window: Some(10.0), field: None };

        let first = engine.evaluate("d1:t", &point(42.0, 0.0), &config).expect("valid config");
        assert!(!first.dropped);

        clock.set(5.0);
        let second = engine.evaluate("d1:t", &point(42.0, 5.0), &config).expect("valid config");
        assert!(second.dropped);
        assert_eq!(second.reason.as_deref(), Some("duplicate"));
    }

    #[test]
    fn statistical_anomaly_does_not_add_anomalies_to_window() {
        let engine = FilterEngine::new(FixedClock::new(0.0));
        let config = FilterConfig::StatisticalAnomaly { window_size: 20, min_samples: 5, std_threshold: 2.0 };
        for value in [0.0, 0.1, -0.1, 0.2, -0.2, 0.0, 0.1] {
            engine.evaluate("d1:t", &point(value, 0.0), &config).expect("valid config");
        }
        let outcome = engine.evaluate("d1:t", &point(10.0, 0.0), &config).expect("valid config");
        assert!(outcome.dropped);
    }

    #[test]
    fn consecutive_filter_resets_on_non_match() {
        let engine = FilterEngine::new(FixedClock::new(0.0));
        let config = FilterConfig::Consecutive {
            consecutive_count: 2,
            inner: Box::new(FilterConfig::Threshold { op: "gt".to_string(), threshold: 10.0 }),
        };
        assert!(!engine.evaluate("d1:t", &point(20.0, 0.0), &config).expect("valid").dropped);
        assert!(engine.evaluate("d1:t", &point(20.0, 0.0), &config).expect("valid").dropped);
        assert!(!engine.evaluate("d1:t", &point(5.0, 0.0), &config).expect("valid").dropped);
    }
}
