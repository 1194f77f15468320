// rules-engine-core/src/condition/mod.rs
// ============================================================================
// Module: Condition Evaluator
// Description: Recursive evaluator over a condition tree; field accessor;
//              bridges to the expression sub-evaluator.
// Purpose: `evaluate(Condition, Point) -> (bool, Error?)` contract.
// Dependencies: rules_engine_logic::{ConditionTree, PredicateEval}, serde_json
// ============================================================================

//! ## Overview
//! [`Condition`] is the wire-visible recursive tagged variant from the rule
//! definition DSL. It is validated into a [`rules_engine_logic::ConditionTree`]
//! of [`Leaf`] predicates once at rule-load time (via [`Condition::compile`]),
//! so per-point evaluation never re-parses the DSL. Composite node kinds
//! (`and`/`or`/`not`) always take priority over `type`, matching the
//! specification's "composite priority" rule: a condition can't accidentally
//! behave like a leaf just because a stray `field` key survived
//! deserialization of a composite node — the wire parser rejects that shape
//! up front.

pub mod expression;

use std::collections::HashMap;
use std::sync::Arc;

use rules_engine_logic::ConditionTree;
use rules_engine_logic::PredicateEval;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConditionError;
use crate::point::Point;
use crate::point::ScalarValue;
use crate::regex_cache::RegexCache;
use crate::value;

// ============================================================================
// SECTION: Operators
// ============================================================================

/// A `simple` condition's comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// String contains (string fields only).
    Contains,
    /// String starts with (string fields only).
    StartsWith,
    /// String ends with (string fields only).
    EndsWith,
    /// Regex match (string fields only).
    Regex,
}

impl Operator {
    /// `true` when this operator is restricted to string-typed fields.
    #[must_use]
    pub const fn is_string_only(self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith | Self::EndsWith | Self::Regex)
    }

    const fn wire_name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Regex => "regex",
        }
    }
}

// ============================================================================
// SECTION: Wire DSL
// ============================================================================

/// The raw, wire-visible shape of a condition node.
///
/// Deserialization alone does not validate shape exclusivity; callers must
/// go through [`Condition::try_from`] (or [`Condition::parse`]) to reject
/// cross-contaminated nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCondition {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    operator: Option<Operator>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    and: Option<Vec<RawCondition>>,
    #[serde(default)]
    or: Option<Vec<RawCondition>>,
    #[serde(default)]
    not: Option<Box<RawCondition>>,
    #[serde(default)]
    expression: Option<String>,
}

/// A validated condition tree node. Exactly one shape is active per node;
/// [`RawCondition`] forms that mix shapes are rejected by [`Condition::parse`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A single field comparison.
    Simple {
        /// Dotted field path (see [`resolve_field`]).
        field: String,
        /// Comparison operator; defaults to `eq` when absent on the wire.
        operator: Operator,
        /// The comparison value.
        value: ScalarValue,
    },
    /// Logical AND of child conditions.
    And(Vec<Condition>),
    /// Logical OR of child conditions.
    Or(Vec<Condition>),
    /// Logical NOT of a single child.
    Not(Box<Condition>),
    /// An arithmetic/boolean expression in the shared DSL.
    Expression(String),
}

impl Condition {
    /// Parses and shape-validates a [`RawCondition`] tree.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError::Type`] when a node mixes shapes (e.g. an
    /// `and` node that also carries `field`), or when `and`/`or` carry an
    /// empty child list; returns [`ConditionError::Parse`] for an
    /// unrecognized `type` tag.
    pub fn parse(raw: &RawCondition) -> Result<Self, ConditionError> {
        let shape_count = [
            raw.field.is_some() || raw.operator.is_some() || raw.value.is_some(),
            raw.and.is_some(),
            raw.or.is_some(),
            raw.not.is_some(),
            raw.expression.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count();

        match raw.kind.as_str() {
            "simple" => {
                if shape_count != 1 {
                    return Err(mixed_shape_error(raw));
                }
                let field = raw.field.clone().ok_or_else(|| ConditionError::Type {
                    message: "simple condition missing 'field'".to_string(),
                })?;
                let operator = raw.operator.unwrap_or(Operator::Eq);
                let value = raw
                    .value
                    .clone()
                    .ok_or_else(|| ConditionError::Type {
                        message: "simple condition missing 'value'".to_string(),
                    })
                    .and_then(|json| scalar_from_json(&json))?;
                Ok(Self::Simple { field, operator, value })
            }
            "and" => {
                if shape_count != 1 {
                    return Err(mixed_shape_error(raw));
                }
                let children = raw.and.as_ref().ok_or_else(|| ConditionError::Type {
                    message: "and condition missing 'and'".to_string(),
                })?;
                if children.is_empty() {
                    return Err(ConditionError::Type {
                        message: "and condition has empty child list".to_string(),
                    });
                }
                Ok(Self::And(children.iter().map(Self::parse).collect::<Result<_, _>>()?))
            }
            "or" => {
                if shape_count != 1 {
                    return Err(mixed_shape_error(raw));
                }
                let children = raw.or.as_ref().ok_or_else(|| ConditionError::Type {
                    message: "or condition missing 'or'".to_string(),
                })?;
                if children.is_empty() {
                    return Err(ConditionError::Type {
                        message: "or condition has empty child list".to_string(),
                    });
                }
                Ok(Self::Or(children.iter().map(Self::parse).collect::<Result<_, _>>()?))
            }
            "not" => {
                if shape_count != 1 {
                    return Err(mixed_shape_error(raw));
                }
                let child = raw.not.as_ref().ok_or_else(|| ConditionError::Type {
                    message: "not condition missing 'not'".to_string(),
                })?;
                Ok(Self::Not(Box::new(Self::parse(child)?)))
            }
            "expression" => {
                if shape_count != 1 {
                    return Err(mixed_shape_error(raw));
                }
                let expression = raw.expression.clone().ok_or_else(|| ConditionError::Type {
                    message: "expression condition missing 'expression'".to_string(),
                })?;
                Ok(Self::Expression(expression))
            }
            other => Err(ConditionError::Parse {
                message: format!("unrecognized condition type '{other}'"),
            }),
        }
    }

    /// Compiles this condition into an evaluable [`ConditionTree`] of
    /// [`Leaf`] predicates.
    ///
    /// # Errors
    ///
    /// Propagates structural errors from empty composite lists (already
    /// rejected by [`Condition::parse`], but re-checked here since a
    /// [`Condition`] can also be built programmatically).
    pub fn compile(&self) -> Result<ConditionTree<Leaf>, ConditionError> {
        match self {
            Self::Simple { field, operator, value } => Ok(ConditionTree::predicate(Leaf::Simple {
                field: field.clone(),
                operator: *operator,
                value: value.clone(),
            })),
            Self::Expression(expr) => Ok(ConditionTree::predicate(Leaf::Expression(expr.clone()))),
            Self::Not(inner) => Ok(ConditionTree::not(inner.compile()?)),
            Self::And(children) => {
                let compiled = children.iter().map(Self::compile).collect::<Result<Vec<_>, _>>()?;
                ConditionTree::and(compiled).map_err(|err| ConditionError::Type { message: err.to_string() })
            }
            Self::Or(children) => {
                let compiled = children.iter().map(Self::compile).collect::<Result<Vec<_>, _>>()?;
                ConditionTree::or(compiled).map_err(|err| ConditionError::Type { message: err.to_string() })
            }
        }
    }
}

fn mixed_shape_error(raw: &RawCondition) -> ConditionError {
    ConditionError::Type {
        message: format!("condition of type '{}' carries more than one shape's fields", raw.kind),
    }
}

fn scalar_from_json(value: &serde_json::Value) -> Result<ScalarValue, ConditionError> {
    match value {
        serde_json::Value::Bool(b) => Ok(ScalarValue::Bool(*b)),
        serde_json::Value::String(s) => Ok(ScalarValue::String(s.clone())),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(ScalarValue::Int)
            .or_else(|| n.as_f64().map(ScalarValue::Float))
            .ok_or_else(|| ConditionError::Type {
                message: format!("unrepresentable number literal '{n}'"),
            }),
        other => Err(ConditionError::Type {
            message: format!("unsupported condition value literal: {other}"),
        }),
    }
}

// ============================================================================
// SECTION: Leaf Predicate
// ============================================================================

/// A leaf predicate: either a field comparison or an expression string.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    /// A single field comparison.
    Simple {
        /// Dotted field path.
        field: String,
        /// Comparison operator.
        operator: Operator,
        /// The comparison value.
        value: ScalarValue,
    },
    /// An arithmetic/boolean expression.
    Expression(String),
}

/// Evaluation context threaded through [`Leaf`] predicate evaluation: the
/// point under test plus the shared regex cache the `regex` operator and
/// fallback expression evaluator may need.
pub struct EvalContext<'a> {
    /// The point the condition is evaluated against.
    pub point: &'a Point,
    /// Shared compiled-pattern cache.
    pub regex_cache: &'a RegexCache,
}

impl PredicateEval<EvalContext<'_>> for Leaf {
    type Error = ConditionError;

    fn eval(&self, context: &EvalContext<'_>) -> Result<bool, Self::Error> {
        match self {
            Self::Simple { field, operator, value } => eval_simple(context, field, *operator, value),
            Self::Expression(expr) => eval_expression(context, expr),
        }
    }
}

fn eval_simple(context: &EvalContext<'_>, field: &str, operator: Operator, expected: &ScalarValue) -> Result<bool, ConditionError> {
    let actual = resolve_field(context.point, field).ok_or_else(|| ConditionError::Field {
        field: field.to_string(),
        available_fields: available_fields(context.point),
    })?;

    if operator.is_string_only() {
        let ScalarValue::String(actual_str) = &actual else {
            return Err(ConditionError::Operator {
                field: field.to_string(),
                operator: operator.wire_name().to_string(),
                actual_type: type_name(&actual).to_string(),
            });
        };
        let expected_str = value::as_string(expected);
        return Ok(match operator {
            Operator::Contains => actual_str.contains(&expected_str),
            Operator::StartsWith => actual_str.starts_with(&expected_str),
            Operator::EndsWith => actual_str.ends_with(&expected_str),
            Operator::Regex => {
                let compiled = context
                    .regex_cache
                    .get_or_compile(&expected_str)
                    .map_err(|err| ConditionError::Eval { message: err.to_string() })?;
                compiled.is_match(actual_str)
            }
            _ => unreachable!("string-only operator set is exhaustively matched above"),
        });
    }

    let ordering = value::compare(&actual, expected).map_err(|err| ConditionError::Eval { message: err.to_string() })?;
    Ok(match operator {
        Operator::Eq => ordering == value::Ordering3::Equal,
        Operator::Ne => ordering != value::Ordering3::Equal,
        Operator::Gt => ordering == value::Ordering3::Greater,
        Operator::Gte => ordering != value::Ordering3::Less,
        Operator::Lt => ordering == value::Ordering3::Less,
        Operator::Lte => ordering != value::Ordering3::Greater,
        Operator::Contains | Operator::StartsWith | Operator::EndsWith | Operator::Regex => {
            unreachable!("string-only operators handled above")
        }
    })
}

fn eval_expression(context: &EvalContext<'_>, expr: &str) -> Result<bool, ConditionError> {
    let mut variables = HashMap::new();
    if let Some(numeric) = context.point.value.as_ref().and_then(value::as_numeric) {
        variables.insert("value".to_string(), numeric);
    }
    expression::evaluate_boolean(expr, &variables).map_err(|err| ConditionError::Eval { message: err.to_string() })
}

const fn type_name(value: &ScalarValue) -> &'static str {
    match value {
        ScalarValue::Int(_) => "int",
        ScalarValue::Float(_) => "float",
        ScalarValue::Bool(_) => "bool",
        ScalarValue::String(_) => "string",
    }
}

fn available_fields(point: &Point) -> Vec<String> {
    let mut fields = vec![
        "device_id".to_string(),
        "key".to_string(),
        "value".to_string(),
        "type".to_string(),
        "timestamp".to_string(),
        "quality".to_string(),
    ];
    fields.extend(point.tags.keys().cloned());
    if let Some(composite) = &point.composite {
        fields.extend(composite.derived_values().into_keys());
    }
    fields
}

// ============================================================================
// SECTION: Field Accessor
// ============================================================================

/// Resolves `device_id|key|value|type|timestamp|quality|tags|<tag>|<composite-subfield>`
/// with dotted paths (e.g. `location.latitude`).
#[must_use]
pub fn resolve_field(point: &Point, field: &str) -> Option<ScalarValue> {
    if let Some((head, rest)) = field.split_once('.') {
        if head == "composite" || head == "tags" {
            return resolve_field(point, rest).or_else(|| resolve_dotted_rest(point, head, rest));
        }
        return resolve_dotted_rest(point, head, rest);
    }

    match field {
        "device_id" => Some(ScalarValue::String(point.device_id.clone())),
        "key" => Some(ScalarValue::String(point.key.clone())),
        "value" => point.value.clone(),
        "type" => Some(ScalarValue::String(format!("{:?}", point.data_type).to_lowercase())),
        "timestamp" => Some(ScalarValue::Float(point.timestamp)),
        "quality" => Some(ScalarValue::Int(i64::from(point.quality))),
        other => point
            .get_tag(other)
            .map(|tag| ScalarValue::String(tag.to_string()))
            .or_else(|| point.composite.as_ref().and_then(|composite| composite.derived_value(other)).map(ScalarValue::Float)),
    }
}

fn resolve_dotted_rest(point: &Point, head: &str, rest: &str) -> Option<ScalarValue> {
    match head {
        "tags" => point.get_tag(rest).map(|tag| ScalarValue::String(tag.to_string())),
        _ => point.composite.as_ref().and_then(|composite| composite.derived_value(rest)).map(ScalarValue::Float),
    }
}

// ============================================================================
// SECTION: Top-Level Evaluation
// ============================================================================

/// Evaluates a pre-compiled condition tree against a point.
///
/// This is the `evaluate(Condition, Point) -> (bool, Error?)` contract:
/// composite nodes (`and`/`or`/`not`) always run first via
/// [`rules_engine_logic::ConditionTree::eval`]'s short-circuit walk,
/// regardless of how the original DSL node was tagged.
///
/// # Errors
///
/// Propagates the first leaf [`ConditionError`] encountered.
pub fn evaluate(tree: &ConditionTree<Leaf>, point: &Point, regex_cache: &Arc<RegexCache>) -> Result<bool, ConditionError> {
    let context = EvalContext { point, regex_cache: regex_cache.as_ref() };
    tree.eval(&context).map_err(|err| match err {
        rules_engine_logic::LogicError::PredicateFailed(message) => ConditionError::Eval { message },
        rules_engine_logic::LogicError::EmptyComposite { kind } => ConditionError::Type {
            message: format!("empty '{kind}' composite reached evaluation"),
        },
    })
}
