// rules-engine-providers/src/clock.rs
// ============================================================================
// Module: Simulated Clock
// Description: A deterministic, manually-advanced implementation of
//              rules_engine_core::Clock for tests and replay.
// Purpose: Exercise TTL sweepers, rate limiters, and windowed stats without
//          real wall-clock delays.
// Dependencies: rules-engine-core
// ============================================================================

//! ## Overview
//! [`SimulatedClock`] never reads wall-clock time; it starts at a caller-given
//! instant and only moves forward when [`SimulatedClock::advance`] or
//! [`SimulatedClock::set`] is called, keeping TTL- and rate-sensitive tests
//! fully reproducible.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use rules_engine_core::Clock;

/// A manually-advanced clock, seconds since an arbitrary epoch.
///
/// Stores the current time as the bit pattern of an `f64` inside an
/// `AtomicU64` so reads never block a concurrently-advancing writer.
pub struct SimulatedClock {
    now_bits: AtomicU64,
}

impl SimulatedClock {
    /// Starts the clock at `now_unix_secs`.
    #[must_use]
    pub fn new(now_unix_secs: f64) -> Self {
        Self { now_bits: AtomicU64::new(now_unix_secs.to_bits()) }
    }

    /// Moves the clock forward by `delta_secs`. A negative delta is
    /// rejected silently (the clock never runs backward); use [`Self::set`]
    /// if rewinding is genuinely intended.
    pub fn advance(&self, delta_secs: f64) {
        if delta_secs < 0.0 {
            return;
        }
        let current = f64::from_bits(self.now_bits.load(Ordering::SeqCst));
        self.now_bits.store((current + delta_secs).to_bits(), Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time, forward or backward.
    pub fn set(&self, now_unix_secs: f64) {
        self.now_bits.store(now_unix_secs.to_bits(), Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now_unix_secs(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_time_forward_monotonically() {
        let clock = SimulatedClock::new(100.0);
        clock.advance(5.0);
        assert!((clock.now_unix_secs() - 105.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_advance_is_a_no_op() {
        let clock = SimulatedClock::new(100.0);
        clock.advance(-5.0);
        assert!((clock.now_unix_secs() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn set_can_rewind() {
        let clock = SimulatedClock::new(100.0);
        clock.set(10.0);
        assert!((clock.now_unix_secs() - 10.0).abs() < f64::EPSILON);
    }
}
