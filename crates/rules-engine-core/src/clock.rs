// rules-engine-core/src/clock.rs
// ============================================================================
// Module: Clock
// Description: Injectable time source for windowed stats and TTL sweepers.
// Purpose: Let tests advance time deterministically without a wall-clock sleep.
// Dependencies: std::time
// ============================================================================

//! Traits in this crate stay free of any dependency on
//! `rules-engine-providers`; concrete non-system clocks (e.g. a fixed-time
//! test double) live there instead, mirroring the split between interface
//! and provider crates elsewhere in this workspace.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// A source of the current time, injectable so tests can control it.
pub trait Clock: Send + Sync {
    /// Returns the current time as seconds since the Unix epoch.
    fn now_unix_secs(&self) -> f64;
}

/// The default [`Clock`] backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(
        clippy::cast_precision_loss,
        reason = "sub-second epoch precision is not required by any window calculation"
    )]
    fn now_unix_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |duration| duration.as_secs_f64())
    }
}
