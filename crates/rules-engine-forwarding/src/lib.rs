// rules-engine-forwarding/src/lib.rs
// ============================================================================
// Module: Rules Engine Forwarding
// Description: Concrete Publisher implementations for the engine's egress.
// Purpose: Give the action dispatcher somewhere real to send forwarded
//          points and aggregate emissions.
// Dependencies: rules-engine-core
// ============================================================================

//! ## Overview
//! `rules-engine-core` defines [`rules_engine_core::forward::Publisher`] but
//! deliberately ships no implementation of it, to avoid a dependency cycle
//! (this crate depends on core for [`rules_engine_core::Point`] and
//! [`rules_engine_core::ActionResult`] in its envelope types). This crate
//! supplies three sinks: [`sink::FileSink`]
//! (append-only NDJSON, for local debugging and audit trails),
//! [`sink::ChannelSink`] (in-process delivery over a `tokio::sync::mpsc`
//! channel, for wiring the engine into another async component), and
//! [`sink::CallbackSink`] (a boxed closure, for tests and ad hoc wiring).

pub mod sink;

pub use sink::CallbackSink;
pub use sink::ChannelSink;
pub use sink::DispatchMessage;
pub use sink::FileSink;
