// rules-engine-providers/src/lib.rs
// ============================================================================
// Module: Rules Engine Providers
// Description: Pluggable clock and numeric-extraction strategies.
// Purpose: Let a deployment swap time and composite-extraction behavior
//          without touching the engine core.
// Dependencies: rules-engine-core
// ============================================================================

//! ## Overview
//! This crate ships two families of injectable collaborators for
//! `rules-engine-core`: deterministic clocks for tests and replay
//! ([`clock::SimulatedClock`]), and numeric-extraction strategies
//! ([`extraction::NumericExtractor`]) for deployments whose composite
//! payloads don't follow the default priority list
//! ([`rules_engine_core::aggregate::extract_numeric`]). Neither is required
//! by the engine core; both are opt-in collaborators resolved through
//! [`registry::ExtractorRegistry`] the way a southbound adapter would pick a
//! provider by name from configuration.

pub mod clock;
pub mod extraction;
pub mod registry;

pub use clock::SimulatedClock;
pub use extraction::DefaultExtractor;
pub use extraction::NumericExtractor;
pub use extraction::ScalarFieldExtractor;
pub use registry::ExtractorRegistry;
pub use registry::UnknownExtractorError;
