// rules-engine-forwarding/src/sink/mod.rs
// ============================================================================
// Module: Sinks
// Description: Concrete Publisher implementations.
// Purpose: House one file per sink kind.
// Dependencies: rules-engine-core
// ============================================================================

//! ## Overview
//! Every sink here implements [`rules_engine_core::forward::Publisher`].
//! None block indefinitely, per that trait's contract: [`file::FileSink`]
//! holds its file handle behind a [`parking_lot::Mutex`] (fast, uncontended
//! in practice since publishes are already serialized per dispatch),
//! [`channel::ChannelSink`] uses `try_send` rather than `send`, and
//! [`callback::CallbackSink`] simply runs whatever the caller gave it.

mod callback;
mod channel;
mod file;

pub use callback::CallbackSink;
pub use channel::ChannelSink;
pub use channel::DispatchMessage;
pub use file::FileSink;
