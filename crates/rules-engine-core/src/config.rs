// rules-engine-core/src/config.rs
// ============================================================================
// Module: Engine Configuration
// Description: Typed tuning knobs for the engine's own operating parameters.
// Purpose: One validated struct covering shard bounds, regex cache capacity,
//          aggregate pressure limits, TTL defaults, and batching thresholds.
// Dependencies: serde, toml, thiserror
// ============================================================================

//! ## Overview
//! [`EngineConfig`] is the engine's *own* tuning surface — not rule
//! definitions, which are owned by the out-of-scope rule-management
//! collaborator. It loads from TOML (`toml::from_str`), carries a
//! [`Default`] impl matching every bounded-resource default used elsewhere
//! in this crate, and exposes [`EngineConfig::validate`] so a malformed file
//! is rejected before the engine starts rather than failing confusingly on
//! the first point.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::aggregate;
use crate::filter;
use crate::regex_cache;

/// Errors raised while loading or validating [`EngineConfig`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A field held a value outside its documented valid range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Shard count bounds; shard count is `clamp(num_cpus, min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBounds {
    /// Minimum shard count, regardless of detected CPU count.
    #[serde(default = "ShardBounds::default_min")]
    pub min: usize,
    /// Maximum shard count, regardless of detected CPU count.
    #[serde(default = "ShardBounds::default_max")]
    pub max: usize,
}

impl ShardBounds {
    const fn default_min() -> usize {
        4
    }
    const fn default_max() -> usize {
        64
    }

    fn validate(self) -> Result<(), ConfigError> {
        if self.min == 0 || self.max < self.min {
            return Err(ConfigError::Invalid(format!(
                "shard_bounds must satisfy 0 < min <= max, got min={}, max={}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Clamps `num_cpus` into `[min, max]`, the engine's shard-count rule.
    #[must_use]
    pub const fn clamp(self, num_cpus: usize) -> usize {
        if num_cpus < self.min {
            self.min
        } else if num_cpus > self.max {
            self.max
        } else {
            num_cpus
        }
    }
}

impl Default for ShardBounds {
    fn default() -> Self {
        Self { min: Self::default_min(), max: Self::default_max() }
    }
}

/// Aggregation-manager pressure and eviction knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateLimits {
    /// Maximum retained aggregate states across all shards.
    #[serde(default = "AggregateLimits::default_max_states")]
    pub max_states: usize,
    /// Maximum estimated memory footprint, in bytes.
    #[serde(default = "AggregateLimits::default_max_memory_bytes")]
    pub max_memory_bytes: usize,
    /// TTL before the sweeper drops an idle state.
    #[serde(default = "AggregateLimits::default_ttl_secs", rename = "ttl_secs")]
    ttl_secs: u64,
    /// Sweeper tick interval.
    #[serde(default = "AggregateLimits::default_cleanup_tick_secs", rename = "cleanup_tick_secs")]
    cleanup_tick_secs: u64,
}

impl AggregateLimits {
    const fn default_max_states() -> usize {
        aggregate::DEFAULT_MAX_STATES
    }
    const fn default_max_memory_bytes() -> usize {
        aggregate::DEFAULT_MAX_MEMORY_BYTES
    }
    const fn default_ttl_secs() -> u64 {
        aggregate::DEFAULT_TTL.as_secs()
    }
    const fn default_cleanup_tick_secs() -> u64 {
        aggregate::DEFAULT_CLEANUP_TICK.as_secs()
    }

    /// TTL as a [`Duration`].
    #[must_use]
    pub const fn ttl(self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweeper tick interval as a [`Duration`].
    #[must_use]
    pub const fn cleanup_tick(self) -> Duration {
        Duration::from_secs(self.cleanup_tick_secs)
    }

    fn validate(self) -> Result<(), ConfigError> {
        if self.max_states == 0 {
            return Err(ConfigError::Invalid("aggregate.max_states must be greater than zero".to_string()));
        }
        if self.max_memory_bytes == 0 {
            return Err(ConfigError::Invalid("aggregate.max_memory_bytes must be greater than zero".to_string()));
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::Invalid("aggregate.ttl_secs must be greater than zero".to_string()));
        }
        Ok(())
    }
}

impl Default for AggregateLimits {
    fn default() -> Self {
        Self {
            max_states: Self::default_max_states(),
            max_memory_bytes: Self::default_max_memory_bytes(),
            ttl_secs: Self::default_ttl_secs(),
            cleanup_tick_secs: Self::default_cleanup_tick_secs(),
        }
    }
}

/// Filter-engine TTL sweep knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterLimits {
    /// TTL before the sweeper drops an idle per-key filter state.
    #[serde(default = "FilterLimits::default_ttl_secs", rename = "ttl_secs")]
    ttl_secs: u64,
    /// Cadence at which the sweeper task runs.
    #[serde(default = "FilterLimits::default_tick_secs", rename = "tick_secs")]
    tick_secs: u64,
}

impl FilterLimits {
    const fn default_ttl_secs() -> u64 {
        filter::DEFAULT_SWEEP_INTERVAL.as_secs()
    }
    const fn default_tick_secs() -> u64 {
        filter::DEFAULT_SWEEP_TICK.as_secs()
    }

    /// TTL as a [`Duration`].
    #[must_use]
    pub const fn ttl(self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweeper tick cadence as a [`Duration`].
    #[must_use]
    pub const fn tick(self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    fn validate(self) -> Result<(), ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::Invalid("filter.ttl_secs must be greater than zero".to_string()));
        }
        if self.tick_secs == 0 {
            return Err(ConfigError::Invalid("filter.tick_secs must be greater than zero".to_string()));
        }
        Ok(())
    }
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self { ttl_secs: Self::default_ttl_secs(), tick_secs: Self::default_tick_secs() }
    }
}

/// Regex-cache capacity knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexCacheLimits {
    /// Maximum number of compiled patterns retained.
    #[serde(default = "RegexCacheLimits::default_capacity")]
    pub capacity: usize,
}

impl RegexCacheLimits {
    const fn default_capacity() -> usize {
        regex_cache::CAPACITY
    }

    fn validate(self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("regex_cache.capacity must be greater than zero".to_string()));
        }
        Ok(())
    }
}

impl Default for RegexCacheLimits {
    fn default() -> Self {
        Self { capacity: Self::default_capacity() }
    }
}

/// The engine's complete set of tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Shard count bounds for the aggregation manager.
    #[serde(default)]
    pub shard_bounds: ShardBounds,
    /// Aggregation-manager pressure and eviction limits.
    #[serde(default)]
    pub aggregate: AggregateLimits,
    /// Filter-engine TTL sweep limits.
    #[serde(default)]
    pub filter: FilterLimits,
    /// Regex-cache capacity.
    #[serde(default)]
    pub regex_cache: RegexCacheLimits,
}

impl EngineConfig {
    /// Parses an [`EngineConfig`] from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML, or
    /// [`ConfigError::Invalid`] when [`Self::validate`] rejects the result.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every field against its documented bounded-resource range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first out-of-range
    /// field encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shard_bounds.validate()?;
        self.aggregate.validate()?;
        self.filter.validate()?;
        self.regex_cache.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_bounded_resources() {
        let config = EngineConfig::default();
        assert_eq!(config.aggregate.max_states, 10_000);
        assert_eq!(config.aggregate.max_memory_bytes, 100 * 1024 * 1024);
        assert_eq!(config.regex_cache.capacity, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_parses_to_defaults() {
        let config = EngineConfig::from_toml("").expect("empty document uses defaults");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn zero_max_states_is_rejected() {
        let source = "[aggregate]\nmax_states = 0\n";
        let err = EngineConfig::from_toml(source).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn inverted_shard_bounds_are_rejected() {
        let source = "[shard_bounds]\nmin = 10\nmax = 2\n";
        let err = EngineConfig::from_toml(source).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
