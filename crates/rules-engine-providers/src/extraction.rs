// rules-engine-providers/src/extraction.rs
// ============================================================================
// Module: Numeric Extraction Strategies
// Description: Pluggable alternatives to the engine's default composite
//              numeric-extraction priority list.
// Purpose: Let a deployment whose composite payloads don't follow the
//          default priority list supply its own extraction order.
// Dependencies: rules-engine-core
// ============================================================================

//! ## Overview
//! [`rules_engine_core::aggregate::extract_numeric`] hard-codes the priority
//! list `scalar -> elements[0] -> magnitude -> speed -> brightness -> mean of
//! values[] -> recognized scalar field`. That list is right for the engine's
//! own statistical/aggregate path, but a southbound adapter surfacing a
//! numeric reading to an operator dashboard may want a different order (for
//! example, always preferring a single named derived field). The
//! [`NumericExtractor`] trait lets such a caller swap in its own strategy
//! without touching the engine core.

use rules_engine_core::CompositeData;
use rules_engine_core::ScalarValue;
use rules_engine_core::aggregate;

/// Extracts a single numeric observation from a point's payload.
pub trait NumericExtractor: Send + Sync {
    /// Returns the extracted numeric value, or `None` when nothing in
    /// `value`/`composite` is numerically interpretable under this
    /// strategy.
    fn extract(&self, value: Option<&ScalarValue>, composite: Option<&CompositeData>) -> Option<f64>;
}

/// Delegates to the engine's own priority list, for callers that want the
/// exact behavior the aggregation manager uses internally.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor;

impl NumericExtractor for DefaultExtractor {
    fn extract(&self, value: Option<&ScalarValue>, composite: Option<&CompositeData>) -> Option<f64> {
        aggregate::extract_numeric(value, composite)
    }
}

/// Always reads one named derived field from the composite payload,
/// ignoring the scalar value and the default priority order entirely.
///
/// Falls back to [`DefaultExtractor`] when the named field is absent, so a
/// point that never populates the preferred field still yields a reading
/// rather than silently dropping out of an aggregate window.
#[derive(Debug, Clone)]
pub struct ScalarFieldExtractor {
    field: String,
}

impl ScalarFieldExtractor {
    /// Builds an extractor that prefers composite field `field`.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

impl NumericExtractor for ScalarFieldExtractor {
    fn extract(&self, value: Option<&ScalarValue>, composite: Option<&CompositeData>) -> Option<f64> {
        if let Some(found) = composite.and_then(|data| data.derived_value(&self.field)) {
            return Some(found);
        }
        DefaultExtractor.extract(value, composite)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rules_engine_core::DataType;
    use rules_engine_core::Point;

    use super::*;

    fn point_with(value: Option<ScalarValue>, composite: Option<CompositeData>) -> Point {
        Point {
            device_id: "d1".to_string(),
            key: "k".to_string(),
            value,
            data_type: DataType::Float,
            timestamp: 0.0,
            quality: 0,
            tags: HashMap::new(),
            composite,
        }
    }

    #[test]
    fn default_extractor_prefers_scalar_value() {
        let point = point_with(Some(ScalarValue::Float(2.5)), None);
        assert_eq!(DefaultExtractor.extract(point.value.as_ref(), point.composite.as_ref()), Some(2.5));
    }

    #[test]
    fn scalar_field_extractor_falls_back_when_field_absent() {
        let point = point_with(Some(ScalarValue::Float(3.0)), None);
        let extractor = ScalarFieldExtractor::new("brightness");
        assert_eq!(extractor.extract(point.value.as_ref(), point.composite.as_ref()), Some(3.0));
    }
}
