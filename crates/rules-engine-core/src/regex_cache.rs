// rules-engine-core/src/regex_cache.rs
// ============================================================================
// Module: Regex Cache
// Description: Process-wide LRU of compiled patterns, bounded and scored.
// Purpose: Avoid recompiling the same regex on every `regex` condition check.
// Dependencies: regex::Regex, parking_lot::RwLock, std::sync::Arc
// ============================================================================

//! ## Overview
//! A bounded, score-evicted cache of compiled [`Regex`] instances, wrapped
//! behind an explicit handle rather than a global `static` so tests can
//! construct their own instance instead of sharing process-wide state.
//!
//! Eviction does not use plain recency: the score
//! `seconds_since_last_use + 1000 / max(1, access_count)` is recomputed on
//! every insert-at-capacity, and the highest-scoring (least valuable) entry
//! is dropped. This rewards patterns that are both recently used and
//! frequently used over patterns that are merely recent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::error::ValueCoercionError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of compiled patterns retained.
pub const CAPACITY: usize = 1_000;

/// Above this fraction of capacity, a secondary sweep also removes
/// long-idle, rarely used entries.
const SWEEP_LOAD_FACTOR: f64 = 0.75;

/// Secondary sweep idle threshold, in seconds.
const SWEEP_IDLE_SECS: f64 = 3_600.0;

/// Secondary sweep access-count threshold.
const SWEEP_MIN_ACCESS_COUNT: u64 = 5;

// ============================================================================
// SECTION: Cache Entry
// ============================================================================

struct Entry {
    compiled: Arc<Regex>,
    last_used: f64,
    access_count: u64,
}

impl Entry {
    fn score(&self, now: f64) -> f64 {
        let seconds_since_last_use = (now - self.last_used).max(0.0);
        let access_count = self.access_count.max(1) as f64;
        seconds_since_last_use + 1000.0 / access_count
    }
}

// ============================================================================
// SECTION: Regex Cache
// ============================================================================

/// A bounded, score-evicted cache of compiled regular expressions.
///
/// `Get` (via [`RegexCache::get_or_compile`]) is read-mostly and safe for
/// concurrent callers; a compile-on-miss race between two callers is
/// tolerated by last-writer-wins semantics on the map entry.
pub struct RegexCache {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl RegexCache {
    /// Builds an empty cache backed by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Builds an empty cache backed by a caller-supplied clock, for
    /// deterministic eviction-scoring tests.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Returns the compiled pattern, compiling and inserting it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`ValueCoercionError::InvalidPattern`] when `pattern` is
    /// empty or fails to compile.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, ValueCoercionError> {
        if pattern.is_empty() {
            return Err(ValueCoercionError::InvalidPattern {
                message: "empty pattern".to_string(),
            });
        }

        let now = self.clock.now_unix_secs();

        if let Some(hit) = self.record_hit(pattern, now) {
            return Ok(hit);
        }

        let compiled = Arc::new(Regex::new(pattern).map_err(|err| ValueCoercionError::InvalidPattern {
            message: err.to_string(),
        })?);

        self.insert(pattern.to_string(), compiled.clone(), now);
        Ok(compiled)
    }

    fn record_hit(&self, pattern: &str, now: f64) -> Option<Arc<Regex>> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(pattern)?;
        entry.last_used = now;
        entry.access_count += 1;
        Some(entry.compiled.clone())
    }

    fn insert(&self, pattern: String, compiled: Arc<Regex>, now: f64) {
        let mut entries = self.entries.write();
        // Another thread may have won a compile race; last writer wins.
        entries.insert(
            pattern,
            Entry {
                compiled,
                last_used: now,
                access_count: 1,
            },
        );

        if entries.len() as f64 > CAPACITY as f64 * SWEEP_LOAD_FACTOR {
            Self::sweep_stale(&mut entries, now);
        }
        if entries.len() > CAPACITY {
            Self::evict_highest_score(&mut entries, now);
        }
    }

    fn sweep_stale(entries: &mut HashMap<String, Entry>, now: f64) {
        entries.retain(|_, entry| {
            let idle = now - entry.last_used;
            !(idle > SWEEP_IDLE_SECS && entry.access_count < SWEEP_MIN_ACCESS_COUNT)
        });
    }

    fn evict_highest_score(entries: &mut HashMap<String, Entry>, now: f64) {
        while entries.len() > CAPACITY {
            let Some(worst_key) = entries
                .iter()
                .max_by(|(_, a), (_, b)| a.score(now).total_cmp(&b.score(now)))
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&worst_key);
        }
    }

    /// Current number of cached patterns, for diagnostics and tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` when the cache holds no compiled patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pattern_is_rejected() {
        let cache = RegexCache::new();
        let err = cache.get_or_compile("").unwrap_err();
        assert_eq!(
            err,
            ValueCoercionError::InvalidPattern {
                message: "empty pattern".to_string()
            }
        );
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let cache = RegexCache::new();
        assert!(cache.get_or_compile("[unterminated").is_err());
    }

    #[test]
    fn repeat_gets_return_the_same_compiled_instance() {
        let cache = RegexCache::new();
        let first = cache.get_or_compile("^abc$").expect("valid pattern");
        let second = cache.get_or_compile("^abc$").expect("valid pattern");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_patterns_each_get_their_own_entry() {
        let cache = RegexCache::new();
        cache.get_or_compile("a+").expect("valid");
        cache.get_or_compile("b+").expect("valid");
        assert_eq!(cache.len(), 2);
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now_unix_secs(&self) -> f64 {
            0.0
        }
    }

    /// Inserting well past `CAPACITY` must never leave the cache holding
    /// more than `CAPACITY` compiled patterns.
    #[test]
    fn cache_never_grows_past_capacity_under_insert_pressure() {
        let cache = RegexCache::with_clock(Arc::new(FixedClock));
        for index in 0..CAPACITY + 200 {
            cache.get_or_compile(&format!("^pattern-{index}$")).expect("valid pattern");
        }
        assert!(cache.len() <= CAPACITY);
    }
}
