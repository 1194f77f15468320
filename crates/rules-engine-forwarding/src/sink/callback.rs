// rules-engine-forwarding/src/sink/callback.rs
// ============================================================================
// Module: Callback Sink
// Description: Publisher backed by a caller-supplied closure.
// Purpose: Ad hoc wiring for tests and small embeddings that don't warrant
//          a dedicated sink type.
// Dependencies: rules-engine-core
// ============================================================================

//! ## Overview
//! [`CallbackSink`] exists alongside the network-facing sinks so tests that
//! only need to assert "was this subject published with this payload"
//! don't have to stand up a file or a channel.

use rules_engine_core::forward::PublishError;
use rules_engine_core::forward::Publisher;

/// Delivers every publish to a boxed closure.
pub struct CallbackSink {
    callback: Box<dyn Fn(&str, &[u8]) -> Result<(), PublishError> + Send + Sync>,
}

impl CallbackSink {
    /// Wraps `callback` as a [`Publisher`].
    pub fn new(callback: impl Fn(&str, &[u8]) -> Result<(), PublishError> + Send + Sync + 'static) -> Self {
        Self { callback: Box::new(callback) }
    }
}

impl Publisher for CallbackSink {
    fn publish(&self, subject: &str, bytes: &[u8]) -> Result<(), PublishError> {
        (self.callback)(subject, bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn callback_receives_subject_and_payload() {
        let captured: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&captured);
        let sink = CallbackSink::new(move |subject, bytes| {
            recorder.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push((subject.to_string(), bytes.to_vec()));
            Ok(())
        });

        sink.publish("transformed.d1.temperature", b"{}").expect("callback reports success");

        let recorded = captured.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "transformed.d1.temperature");
    }
}
