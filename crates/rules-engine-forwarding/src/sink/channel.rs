// rules-engine-forwarding/src/sink/channel.rs
// ============================================================================
// Module: Channel Sink
// Description: In-process delivery over a tokio::sync::mpsc channel.
// Purpose: Wire the engine's egress into another async component without a
//          network hop.
// Dependencies: rules-engine-core, tokio
// ============================================================================

//! ## Overview
//! [`ChannelSink`] never blocks the action dispatcher: it uses
//! [`tokio::sync::mpsc::Sender::try_send`], so a full channel or a dropped
//! receiver surfaces immediately as [`PublishError::Unavailable`] instead of
//! stalling point processing.

use rules_engine_core::forward::PublishError;
use rules_engine_core::forward::Publisher;
use tokio::sync::mpsc::Sender;

/// One delivered message: the subject it was published under and the raw
/// payload bytes.
#[derive(Debug, Clone)]
pub struct DispatchMessage {
    /// The subject [`Publisher::publish`] was called with.
    pub subject: String,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

/// Delivers published payloads into a bounded `tokio::sync::mpsc` channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<DispatchMessage>,
}

impl ChannelSink {
    /// Wraps `sender` as a [`Publisher`].
    #[must_use]
    pub const fn new(sender: Sender<DispatchMessage>) -> Self {
        Self { sender }
    }
}

impl Publisher for ChannelSink {
    fn publish(&self, subject: &str, bytes: &[u8]) -> Result<(), PublishError> {
        let message = DispatchMessage { subject: subject.to_string(), payload: bytes.to_vec() };
        self.sender
            .try_send(message)
            .map_err(|err| PublishError::Unavailable { subject: subject.to_string(), message: err.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_enqueues_exactly_one_message() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let sink = ChannelSink::new(tx);

        sink.publish("aggregate.d1.temperature", b"{}").expect("channel has capacity");

        let received = rx.recv().await.expect("message was enqueued");
        assert_eq!(received.subject, "aggregate.d1.temperature");
    }

    #[tokio::test]
    async fn publish_to_a_full_channel_is_a_publish_error() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.publish("s", b"1").expect("first publish fits");
        assert!(sink.publish("s", b"2").is_err());
    }
}
