// rules-engine-core/src/rule.rs
// ============================================================================
// Module: Rule Definition
// Description: Wire-visible rule, action, and action-result shapes.
// Purpose: The unit the engine materialises, orders, and evaluates per point.
// Dependencies: crate::condition
// ============================================================================

//! ## Overview
//! A [`Rule`] bundles a [`crate::condition::Condition`] with an ordered list
//! of [`Action`]s. The engine core ([`crate::engine`]) observes a read-only
//! snapshot of the active rule set; mutation (create/update/delete) is a
//! collaborator's responsibility, out of scope here — only the `version`
//! field hints that a snapshot has gone stale.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use rules_engine_logic::ConditionTree;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::condition::Condition;
use crate::condition::Leaf;
use crate::condition::RawCondition;
use crate::error::ConditionError;

/// The four action kinds an action dispatcher can invoke, plus `alert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Publishes a human/ops-facing notification; config is opaque to core.
    Alert,
    /// Applies [`crate::transform::TransformConfig`].
    Transform,
    /// Applies one [`crate::filter::FilterConfig`].
    Filter,
    /// Feeds [`crate::aggregate::AggregateConfig`].
    Aggregate,
    /// Publishes through the forwarding interface.
    Forward,
}

/// One action attached to a rule: a kind plus an open configuration map.
///
/// `config` is deliberately untyped JSON at this layer — each handler
/// (`filter`, `transform`, `aggregate`) deserializes its own typed config
/// from this map when the action dispatcher resolves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Which handler this action invokes.
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Handler-specific configuration, deserialized on dispatch.
    #[serde(default)]
    pub config: HashMap<String, JsonValue>,
}

/// The outcome of invoking a single [`Action`] against a single point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// Echoes [`Action::kind`].
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// `false` indicates the action failed; `error` is then populated.
    pub success: bool,
    /// Human-readable failure description, present only when `!success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent executing this action.
    #[serde(with = "duration_as_secs_f64")]
    pub duration: Duration,
    /// Handler-specific output fields (`filtered`, `reason`, `aggregated`,
    /// `aggregate_result`, `publish_subject`, `published`, …).
    #[serde(default)]
    pub output: HashMap<String, JsonValue>,
}

impl ActionResult {
    /// Builds a successful result with no output fields set yet; callers
    /// populate `output` afterward via [`Self::with_output`].
    #[must_use]
    pub fn success(kind: ActionKind, duration: Duration) -> Self {
        Self { kind, success: true, error: None, duration, output: HashMap::new() }
    }

    /// Builds a failed result carrying `message`.
    #[must_use]
    pub fn failure(kind: ActionKind, duration: Duration, message: impl Into<String>) -> Self {
        Self { kind, success: false, error: Some(message.into()), duration, output: HashMap::new() }
    }

    /// Inserts one output field, returning `self` for chaining.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.output.insert(key.into(), value.into());
        self
    }
}

mod duration_as_secs_f64 {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// A named condition/action bundle with a priority, the unit the engine
/// orders and evaluates per point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier, used as the `state_key` prefix for aggregation.
    pub id: String,
    /// Display name; the tiebreaker in priority ordering.
    pub name: String,
    /// Higher fires first.
    pub priority: i32,
    /// Disabled rules are skipped entirely.
    pub enabled: bool,
    /// Bumped by the rule-management collaborator on every update.
    pub version: u64,
    /// The root of the condition tree this rule evaluates.
    pub conditions: RawCondition,
    /// Actions invoked, in order, when `conditions` matches.
    pub actions: Vec<Action>,
    /// Free-form metadata tags (not the same as a point's tags).
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Optional data-type filter; when set, only points of this declared
    /// type are considered before conditions are even evaluated.
    #[serde(default)]
    pub data_type: Option<String>,
}

impl Rule {
    /// The engine's total evaluation order: `(priority desc, name asc)`.
    #[must_use]
    pub fn ordering_key(&self) -> (i32, &str) {
        (self.priority, self.name.as_str())
    }
}

/// Orders rules by `(priority desc, name asc)`, the engine's only ordering
/// contract.
#[must_use]
pub fn compare_priority(a: &Rule, b: &Rule) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name))
}

/// A [`Rule`] paired with its condition tree, parsed and compiled once at
/// snapshot-build time so per-point evaluation never re-parses the DSL.
pub struct CompiledRule {
    /// The source rule, verbatim.
    pub rule: Rule,
    /// The compiled condition tree [`crate::condition::evaluate`] walks.
    pub tree: ConditionTree<Leaf>,
}

/// An immutable, priority-ordered snapshot of the active rule set.
///
/// The engine core ([`crate::engine::RuleEngine`]) holds one `Arc<RuleSet>`
/// behind a lock and swaps it wholesale on update, per this crate's
/// "engine observes a snapshot; version bumps on update" contract — mutating
/// individual rules in place is the rule-management collaborator's job, out
/// of scope here.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Parses, compiles, and priority-sorts every rule in `rules`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConditionError`] encountered while parsing or
    /// compiling a rule's condition tree; the whole snapshot is rejected
    /// rather than admitting a partially-compiled rule set.
    pub fn compile(rules: Vec<Rule>) -> Result<Self, ConditionError> {
        let mut compiled = rules
            .into_iter()
            .map(|rule| {
                let condition = Condition::parse(&rule.conditions)?;
                let tree = condition.compile()?;
                Ok(CompiledRule { rule, tree })
            })
            .collect::<Result<Vec<_>, ConditionError>>()?;
        compiled.sort_by(|a, b| compare_priority(&a.rule, &b.rule));
        Ok(Self { rules: compiled })
    }

    /// An empty snapshot, the engine's starting state before any rules load.
    #[must_use]
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Iterates enabled rules in `(priority desc, name asc)` order — the
    /// engine's total evaluation order for a given point.
    pub fn enabled_in_order(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().filter(|compiled| compiled.rule.enabled)
    }

    /// Total rule count in this snapshot, enabled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` when this snapshot holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, name: &str, priority: i32) -> Rule {
        let conditions: RawCondition = serde_json::from_value(serde_json::json!({
            "type": "simple",
            "field": "value",
            "operator": "gt",
            "value": 0,
        }))
        .expect("well-formed raw condition");
        Rule {
            id: id.to_string(),
            name: name.to_string(),
            priority,
            enabled: true,
            version: 1,
            conditions,
            actions: Vec::new(),
            tags: HashMap::new(),
            data_type: None,
        }
    }

    #[test]
    fn rule_set_compiles_and_orders_by_priority() {
        let mut disabled = rule("4", "disabled", 100);
        disabled.enabled = false;
        let rules = vec![rule("1", "zeta", 5), rule("2", "alpha", 5), rule("3", "beta", 10), disabled];
        let set = RuleSet::compile(rules).expect("valid conditions compile");
        let order: Vec<&str> = set.enabled_in_order().map(|compiled| compiled.rule.name.as_str()).collect();
        assert_eq!(order, vec!["beta", "alpha", "zeta"]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn rule_set_rejects_mixed_shape_conditions() {
        let mut broken = rule("1", "broken", 0);
        broken.conditions = serde_json::from_value(serde_json::json!({
            "type": "and",
            "field": "value",
        }))
        .expect("deserializes even though it is semantically invalid");
        assert!(RuleSet::compile(vec![broken]).is_err());
    }

    #[test]
    fn priority_desc_then_name_asc_matches_specified_ordering() {
        let mut rules = vec![rule("1", "zeta", 5), rule("2", "alpha", 5), rule("3", "beta", 10)];
        rules.sort_by(compare_priority);
        let order: Vec<&str> = rules.iter().map(|rule| rule.name.as_str()).collect();
        assert_eq!(order, vec!["beta", "alpha", "zeta"]);
    }
}
