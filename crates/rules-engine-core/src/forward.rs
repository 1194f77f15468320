// rules-engine-core/src/forward.rs
// ============================================================================
// Module: Forwarding Interface
// Description: The egress contract the engine calls to publish results.
// Purpose: Decouple the engine from any concrete message bus.
// Dependencies: crate::point, crate::rule
// ============================================================================

//! ## Overview
//! [`Publisher`] is defined here, not in `rules-engine-forwarding`, for the
//! same reason [`crate::clock::Clock`] lives in this crate: `core` must not
//! depend on the crate that supplies concrete sinks, since that crate in
//! turn depends on `core`'s [`Point`] and [`crate::rule::ActionResult`]
//! types to build its envelopes. `rules-engine-forwarding` implements
//! [`Publisher`] (file, callback, in-memory sinks) against this trait; core
//! only ever calls through it.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::point::Point;

/// Errors a [`Publisher`] can report back to the action dispatcher.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublishError {
    /// The sink is unreachable or refused the payload.
    #[error("publish to '{subject}' failed: {message}")]
    Unavailable {
        /// The subject the publish was attempted on.
        subject: String,
        /// Sink-reported diagnostic.
        message: String,
    },
}

/// The egress contract: publish a byte payload to a named subject with
/// at-most-once semantics. Implementations must not block indefinitely;
/// a slow sink should fail fast rather than stall the action dispatcher.
pub trait Publisher: Send + Sync {
    /// Publishes `bytes` under `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the sink is unavailable or rejects the
    /// payload. Errors here become a recorded `publish_error` on the
    /// [`crate::rule::ActionResult`]; they never fail the action outright.
    fn publish(&self, subject: &str, bytes: &[u8]) -> Result<(), PublishError>;
}

/// Metadata describing the transform that produced a forwarded point, part
/// of the outgoing JSON envelope alongside the point's own fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformInfo {
    /// The transform kind applied (`"scale"`, `"clamp"`, …).
    pub transform_type: String,
    /// The field holding the value before the transform ran.
    pub original_key: String,
}

/// Outgoing envelope for a transformed point: the point's fields plus
/// `transform_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedEnvelope {
    /// The transformed point.
    #[serde(flatten)]
    pub point: Point,
    /// Describes the transform that produced this point.
    pub transform_info: TransformInfo,
}

/// The structure carried by an aggregate emission's `aggregate_result`
/// output field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    /// The device the aggregated series belongs to.
    pub device_id: String,
    /// The telemetry key aggregated.
    pub key: String,
    /// Human-readable window description (e.g. `"count:10"`, `"time:60s"`).
    pub window: String,
    /// The group-by fields used to compute the state key.
    pub group_by: Vec<String>,
    /// Computed function values, keyed by function name (or its `output`
    /// override).
    pub functions: std::collections::HashMap<String, f64>,
    /// Start of the window covered by this emission (Unix seconds).
    pub start_time: f64,
    /// End of the window covered by this emission (Unix seconds).
    pub end_time: f64,
    /// Number of samples the window currently holds.
    pub count: usize,
    /// When this emission was computed (Unix seconds).
    pub timestamp: f64,
}

/// The default subject for a transformed point: `transformed.<device_id>.<key>`.
#[must_use]
pub fn default_transform_subject(point: &Point) -> String {
    format!("transformed.{}.{}", point.device_id, point.key)
}

/// The default subject for an aggregate emission: `aggregate.<device_id>.<key>`.
#[must_use]
pub fn default_aggregate_subject(device_id: &str, key: &str) -> String {
    format!("aggregate.{device_id}.{key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::DataType;
    use crate::point::ScalarValue;
    use std::collections::HashMap;

    #[test]
    fn default_subject_matches_device_and_key() {
        let point = Point {
            device_id: "d1".to_string(),
            key: "temperature".to_string(),
            value: Some(ScalarValue::Float(1.0)),
            data_type: DataType::Float,
            timestamp: 0.0,
            quality: 0,
            tags: HashMap::new(),
            composite: None,
        };
        assert_eq!(default_transform_subject(&point), "transformed.d1.temperature");
    }
}
