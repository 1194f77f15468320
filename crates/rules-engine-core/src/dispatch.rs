// rules-engine-core/src/dispatch.rs
// ============================================================================
// Module: Action Dispatcher
// Description: Resolves each matched rule to one or more action invocations.
// Purpose: Per-action panic isolation; one action's failure never aborts
//          the rest of the rule's actions, nor the rest of the rule set.
// Dependencies: crate::{action, rule}, tokio
// ============================================================================

//! ## Overview
//! [`dispatch_rule`] walks [`Rule::actions`] in order and invokes each
//! through [`action`]. Filter and transform and alert handlers run
//! synchronously; aggregate may await the batched path. Panics inside a
//! synchronous handler are isolated by [`run_sync_isolated`], which wraps
//! the call in `std::panic::catch_unwind` and converts a caught panic into
//! an [`ActionError::Runtime`] on that action's own [`ActionResult`],
//! without unwinding past the dispatch boundary or aborting the rest of the
//! rule's actions.

use std::time::Duration;
use std::time::Instant;

use crate::action::ActionContext;
use crate::action::apply_aggregate;
use crate::action::apply_alert;
use crate::action::apply_filter;
use crate::action::apply_forward;
use crate::action::apply_transform;
use crate::error::ActionError;
use crate::point::Point;
use crate::rule::Action;
use crate::rule::ActionKind;
use crate::rule::ActionResult;
use crate::rule::Rule;

/// Invokes every action attached to `rule` against `point`, in declared
/// order. An action that fails (including one that panics) is recorded as
/// `success: false` on its own [`ActionResult`] and does not prevent the
/// remaining actions from running.
pub async fn dispatch_rule(rule: &Rule, point: &Point, ctx: &ActionContext<'_>) -> Vec<ActionResult> {
    let mut results = Vec::with_capacity(rule.actions.len());
    for action in &rule.actions {
        results.push(dispatch_one(&rule.id, action, point, ctx).await);
    }
    results
}

async fn dispatch_one(rule_id: &str, action: &Action, point: &Point, ctx: &ActionContext<'_>) -> ActionResult {
    match action.kind {
        ActionKind::Aggregate => apply_aggregate(action, rule_id, point, ctx).await,
        ActionKind::Filter => {
            let state_key = format!("{rule_id}:{}:{}", point.device_id, point.key);
            run_sync_isolated(action.kind, || apply_filter(action, &state_key, point, ctx))
        }
        ActionKind::Transform => run_sync_isolated(action.kind, || apply_transform(action, point, ctx)),
        ActionKind::Alert => run_sync_isolated(action.kind, || apply_alert(action, point, ctx)),
        ActionKind::Forward => run_sync_isolated(action.kind, || apply_forward(point, ctx)),
    }
}

/// Runs `handler` and converts a panic into a [`ActionError::Runtime`]
/// result, without unwinding past this call. Handlers here are pure
/// functions over borrowed state (no async), so `catch_unwind` suffices
/// without `AssertUnwindSafe` gymnastics beyond wrapping the closure.
fn run_sync_isolated(kind: ActionKind, handler: impl FnOnce() -> ActionResult) -> ActionResult {
    let started = Instant::now();
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(handler)) {
        Ok(result) => result,
        Err(payload) => {
            let error = ActionError::from_panic(payload.as_ref());
            ActionResult::failure(kind, started.elapsed(), error.to_string())
        }
    }
}

/// Records a per-rule evaluation failure (condition error, not an action
/// failure) in the same shape the engine logs for action failures, so
/// callers can treat both uniformly.
#[derive(Debug, Clone)]
pub struct RuleFailure {
    /// The rule that failed to evaluate.
    pub rule_id: String,
    /// What went wrong.
    pub error: String,
    /// How long evaluation ran before failing.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationManager;
    use crate::clock::SystemClock;
    use crate::filter::FilterEngine;
    use crate::point::DataType;
    use crate::point::ScalarValue;
    use crate::regex_cache::RegexCache;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn point() -> Point {
        Point {
            device_id: "d1".to_string(),
            key: "t".to_string(),
            value: Some(ScalarValue::Float(42.0)),
            data_type: DataType::Float,
            timestamp: 0.0,
            quality: 0,
            tags: HashMap::new(),
            composite: None,
        }
    }

    fn rule_with_actions(actions: Vec<Action>) -> Rule {
        let conditions: crate::condition::RawCondition = serde_json::from_value(serde_json::json!({
            "type": "simple",
            "field": "value",
            "operator": "gt",
            "value": 0,
        }))
        .expect("well-formed raw condition");
        Rule {
            id: "r1".to_string(),
            name: "r1".to_string(),
            priority: 0,
            enabled: true,
            version: 1,
            conditions,
            actions,
            tags: HashMap::new(),
            data_type: None,
        }
    }

    #[tokio::test]
    async fn one_misconfigured_action_does_not_abort_the_rest_of_the_rule() {
        let regex_cache = Arc::new(RegexCache::new());
        let aggregates = AggregationManager::new(4, Arc::new(SystemClock));
        let filters = FilterEngine::new(Arc::new(SystemClock));
        let ctx = ActionContext { clock: &SystemClock, regex_cache: &regex_cache, aggregates: &aggregates, filters: &filters, publisher: None, observed_tps: 0.0 };

        let broken_filter = Action { kind: ActionKind::Filter, config: HashMap::new() };
        let alert = Action { kind: ActionKind::Alert, config: HashMap::new() };
        let rule = rule_with_actions(vec![broken_filter, alert]);

        let results = dispatch_rule(&rule, &point(), &ctx).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
    }
}
