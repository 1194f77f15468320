// rules-engine-core/src/action.rs
// ============================================================================
// Module: Action Resolution
// Description: Deserializes an Action's open config map and invokes the
//              matching handler (filter, transform, aggregate, forward,
//              alert), producing a typed ActionResult.
// Purpose: The single seam between the wire-visible Action/Rule shapes and
//          each handler's strongly-typed configuration.
// Dependencies: crate::{aggregate, filter, transform, forward, rule}
// ============================================================================

//! ## Overview
//! Each `apply_*` function here owns exactly one [`ActionKind`]: it
//! deserializes `action.config` into the handler's typed config, calls the
//! handler, and folds the result into an [`ActionResult`]. None of these
//! functions can panic outward — deserialization failures become a
//! `ConfigError` surfaced as `success: false`; [`crate::dispatch`] layers
//! panic recovery on top of these for handler bugs.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;

use crate::aggregate::AggregateConfig;
use crate::aggregate::AggregationManager;
use crate::clock::Clock;
use crate::condition::EvalContext;
use crate::error::ConfigError;
use crate::filter::FilterConfig;
use crate::filter::FilterEngine;
use crate::forward::AggregateResult;
use crate::forward::PublishError;
use crate::forward::Publisher;
use crate::forward::TransformInfo;
use crate::forward::TransformedEnvelope;
use crate::forward::default_aggregate_subject;
use crate::forward::default_transform_subject;
use crate::point::Point;
use crate::regex_cache::RegexCache;
use crate::rule::Action;
use crate::rule::ActionKind;
use crate::rule::ActionResult;
use crate::transform::TransformConfig;
use crate::transform::apply as apply_transform_config;

fn decode_config<T: serde::de::DeserializeOwned>(action: &Action, what: &str) -> Result<T, ConfigError> {
    let value = JsonValue::Object(action.config.clone().into_iter().collect());
    serde_json::from_value(value).map_err(|err| ConfigError::InvalidValue {
        key: what.to_string(),
        message: err.to_string(),
    })
}

/// Shared collaborators an action invocation needs, bundled so
/// [`crate::dispatch`] doesn't have to thread five parameters through every
/// call.
pub struct ActionContext<'a> {
    /// Injectable time source.
    pub clock: &'a dyn Clock,
    /// Process-wide compiled-regex cache, for `regex`-operator conditions
    /// embedded inside filter `pattern` kinds.
    pub regex_cache: &'a Arc<RegexCache>,
    /// The shared aggregation manager.
    pub aggregates: &'a AggregationManager,
    /// Per-key stateful filter engine.
    pub filters: &'a FilterEngine,
    /// Egress publisher; `None` disables forwarding (actions still report
    /// `published: false`).
    pub publisher: Option<&'a dyn Publisher>,
    /// Recent observed throughput, used to decide direct vs batched
    /// aggregation.
    pub observed_tps: f64,
}

/// Applies a `filter` action, returning an [`ActionResult`] whose output
/// carries `filtered` and, when dropped, `reason`.
pub fn apply_filter(action: &Action, state_key: &str, point: &Point, ctx: &ActionContext<'_>) -> ActionResult {
    let started = Instant::now();
    let config: FilterConfig = match decode_config(action, "filter") {
        Ok(config) => config,
        Err(err) => return ActionResult::failure(ActionKind::Filter, started.elapsed(), err.to_string()),
    };

    match ctx.filters.evaluate(state_key, point, &config) {
        Ok(outcome) => {
            let mut result = ActionResult::success(ActionKind::Filter, started.elapsed()).with_output("filtered", outcome.dropped);
            if let Some(reason) = outcome.reason {
                result = result.with_output("reason", reason);
            }
            result
        }
        Err(err) => ActionResult::failure(ActionKind::Filter, started.elapsed(), err.to_string()),
    }
}

/// Applies a `transform` action, publishing the transformed point when a
/// publisher is configured.
pub fn apply_transform(action: &Action, point: &Point, ctx: &ActionContext<'_>) -> ActionResult {
    let started = Instant::now();
    let config: TransformConfig = match decode_config(action, "transform") {
        Ok(config) => config,
        Err(err) => return ActionResult::failure(ActionKind::Transform, started.elapsed(), err.to_string()),
    };

    let transformed = match apply_transform_config(&config, point, ctx.clock) {
        Ok(point) => point,
        Err(err) => return ActionResult::failure(ActionKind::Transform, started.elapsed(), err.to_string()),
    };

    let mut result = ActionResult::success(ActionKind::Transform, started.elapsed());
    if let Some(publisher) = ctx.publisher {
        let subject = default_transform_subject(&transformed);
        let envelope = TransformedEnvelope {
            point: transformed,
            transform_info: TransformInfo { transform_type: transform_kind_name(&config), original_key: point.key.clone() },
        };
        result = publish_envelope(result, publisher, &subject, &envelope);
    }
    result
}

fn transform_kind_name(config: &TransformConfig) -> String {
    serde_json::to_value(&config.kind)
        .ok()
        .and_then(|value| value.get("type").and_then(JsonValue::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Applies an `aggregate` action, returning `aggregated`/`aggregate_result`
/// output fields once the window is ready to emit.
pub async fn apply_aggregate(action: &Action, rule_id: &str, point: &Point, ctx: &ActionContext<'_>) -> ActionResult {
    let started = Instant::now();
    let config: AggregateConfig = match decode_config(action, "aggregate") {
        Ok(config) => config,
        Err(err) => return ActionResult::failure(ActionKind::Aggregate, started.elapsed(), err.to_string()),
    };

    let Some(numeric) = crate::aggregate::extract_numeric(point.value.as_ref(), point.composite.as_ref()) else {
        return ActionResult::failure(ActionKind::Aggregate, started.elapsed(), "point carries no numeric observation to aggregate".to_string());
    };

    let state_key = AggregationManager::state_key(rule_id, point, &config.group_by);
    let functions = if AggregationManager::should_batch(ctx.observed_tps, &config) {
        ctx.aggregates.process_batched(&state_key, numeric, &config).await
    } else {
        ctx.aggregates.process_direct(&state_key, numeric, &config)
    };

    let mut result = ActionResult::success(ActionKind::Aggregate, started.elapsed());
    let Some(state) = ctx.aggregates.lookup(&state_key) else {
        return result.with_output("aggregated", false);
    };
    if !state.emission_ready(config.window_type) {
        return result.with_output("aggregated", false);
    }

    let snapshot = state.raw_snapshot();
    let aggregate_result = AggregateResult {
        device_id: point.device_id.clone(),
        key: point.key.clone(),
        window: describe_window(&config),
        group_by: config.group_by.clone(),
        functions,
        start_time: snapshot.first_timestamp,
        end_time: snapshot.last_timestamp,
        count: state.count(),
        timestamp: ctx.clock.now_unix_secs(),
    };

    result = result.with_output("aggregated", true);
    if let Ok(value) = serde_json::to_value(&aggregate_result) {
        result = result.with_output("aggregate_result", value);
    }
    if let Some(publisher) = ctx.publisher {
        let subject = default_aggregate_subject(&point.device_id, &point.key);
        result = publish_envelope(result, publisher, &subject, &aggregate_result);
    }
    result
}

fn describe_window(config: &AggregateConfig) -> String {
    match config.window_type {
        crate::aggregate::WindowType::Count => format!("count:{}", config.window_size),
        crate::aggregate::WindowType::Time => format!("time:{}s", config.window_duration),
    }
}

/// Applies an `alert` action. Alert delivery is opaque to the data plane:
/// this records that the alert fired and echoes its config, leaving actual
/// notification to whatever collaborator watches `ActionResult.output`.
pub fn apply_alert(action: &Action, point: &Point, _ctx: &ActionContext<'_>) -> ActionResult {
    let started = Instant::now();
    let mut result = ActionResult::success(ActionKind::Alert, started.elapsed())
        .with_output("device_id", point.device_id.clone())
        .with_output("key", point.key.clone());
    for (config_key, config_value) in &action.config {
        result = result.with_output(format!("config.{config_key}"), config_value.clone());
    }
    result
}

/// Applies a `forward` action directly (bypassing filter/transform),
/// publishing the point verbatim to its default subject.
pub fn apply_forward(point: &Point, ctx: &ActionContext<'_>) -> ActionResult {
    let started = Instant::now();
    let mut result = ActionResult::success(ActionKind::Forward, started.elapsed());
    let Some(publisher) = ctx.publisher else {
        return result.with_output("published", false);
    };
    let subject = default_transform_subject(point);
    result = publish_envelope(result, publisher, &subject, point);
    result
}

fn publish_envelope<T: serde::Serialize>(result: ActionResult, publisher: &dyn Publisher, subject: &str, payload: &T) -> ActionResult {
    let bytes = match serde_json::to_vec(payload) {
        Ok(bytes) => bytes,
        Err(err) => return result.with_output("published", false).with_output("publish_error", err.to_string()),
    };
    match publisher.publish(subject, &bytes) {
        Ok(()) => result.with_output("published", true).with_output("publish_subject", subject.to_string()),
        Err(PublishError::Unavailable { message, .. }) => result.with_output("published", false).with_output("publish_error", message),
    }
}

/// Builds an [`EvalContext`] for condition evaluation ahead of dispatch,
/// given the collaborators every action invocation already carries.
#[must_use]
pub fn eval_context<'a>(point: &'a Point, regex_cache: &'a Arc<RegexCache>) -> EvalContext<'a> {
    EvalContext { point, regex_cache: regex_cache.as_ref() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::point::DataType;
    use crate::point::ScalarValue;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct RecordingPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, subject: &str, bytes: &[u8]) -> Result<(), PublishError> {
            self.published.lock().push((subject.to_string(), bytes.to_vec()));
            Ok(())
        }
    }

    fn point() -> Point {
        Point {
            device_id: "d1".to_string(),
            key: "t".to_string(),
            value: Some(ScalarValue::Float(3.14159)),
            data_type: DataType::Float,
            timestamp: 0.0,
            quality: 0,
            tags: HashMap::new(),
            composite: None,
        }
    }

    fn action(kind: ActionKind, config: serde_json::Value) -> Action {
        let serde_json::Value::Object(map) = config else {
            unreachable!("test fixtures always pass an object");
        };
        Action { kind, config: map.into_iter().collect() }
    }

    #[test]
    fn transform_clamp_then_round_matches_end_to_end_scenario() {
        let publisher = RecordingPublisher { published: Mutex::new(Vec::new()) };
        let regex_cache = Arc::new(RegexCache::new());
        let aggregates = AggregationManager::new(4, Arc::new(SystemClock));
        let filters = FilterEngine::new(Arc::new(SystemClock));
        let ctx = ActionContext {
            clock: &SystemClock,
            regex_cache: &regex_cache,
            aggregates: &aggregates,
            filters: &filters,
            publisher: Some(&publisher),
            observed_tps: 0.0,
        };
        let action = action(
            ActionKind::Transform,
            serde_json::json!({"type": "clamp", "min": 0.0, "max": 3.0, "precision": 2, "output_key": "t_clamped"}),
        );
        let result = apply_transform(&action, &point(), &ctx);
        assert!(result.success);
        assert_eq!(publisher.published.lock().len(), 1);
    }
}
