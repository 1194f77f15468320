// rules-engine-core/src/value.rs
// ============================================================================
// Module: Value Coercion & Comparison
// Description: Polymorphic numeric/string/bool ordering used by operators.
// Purpose: One canonical numeric type (f64) with explicit coercion rules.
// Dependencies: crate::error::ValueCoercionError, crate::point::ScalarValue
// ============================================================================

//! ## Overview
//! Models the polymorphic value as a typed union with one canonical numeric
//! representation (`f64`) and explicit, total coercion rules rather than
//! reflection. This is the comparator every condition operator and filter
//! kind builds on.

use crate::error::ValueCoercionError;
use crate::point::ScalarValue;

/// The result of comparing two coerced values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering3 {
    /// Left operand is less than right.
    Less,
    /// Operands are equal.
    Equal,
    /// Left operand is greater than right.
    Greater,
}

/// Attempts to interpret a [`ScalarValue`] as a finite `f64`.
///
/// Booleans coerce to `1.0`/`0.0`; strings coerce only when they parse as a
/// finite float. `Int` always succeeds (subject to the usual `i64`→`f64`
/// precision loss for very large magnitudes).
#[must_use]
pub fn as_numeric(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Int(n) => Some(*n as f64),
        ScalarValue::Float(n) => n.is_finite().then_some(*n),
        ScalarValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        ScalarValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
    }
}

/// Renders any [`ScalarValue`] as its canonical string form.
///
/// Used for the `contains`/`startswith`/`endswith`/`regex` operators (which
/// are string-only, see [`crate::error::ConditionError::Operator`]) and for
/// duplicate-filter keying.
#[must_use]
pub fn as_string(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Int(n) => n.to_string(),
        ScalarValue::Float(n) => format_float(*n),
        ScalarValue::Bool(b) => b.to_string(),
        ScalarValue::String(s) => s.clone(),
    }
}

/// Interprets a [`ScalarValue`] as a boolean per the expression-engine cast
/// rules: bool passthrough; numeric non-zero; string non-empty and not
/// `"false"`/`"0"`.
#[must_use]
pub fn as_bool(value: &ScalarValue) -> bool {
    match value {
        ScalarValue::Bool(b) => *b,
        ScalarValue::Int(n) => *n != 0,
        ScalarValue::Float(n) => *n != 0.0,
        ScalarValue::String(s) => {
            let trimmed = s.trim();
            !trimmed.is_empty() && trimmed != "false" && trimmed != "0"
        }
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Compares two values with the polymorphic coercion policy: numeric when
/// both sides coerce to a finite float, lexicographic string comparison
/// otherwise.
///
/// # Errors
///
/// Returns [`ValueCoercionError::Incompatible`] only when the strings
/// themselves cannot be compared, which cannot currently happen since every
/// [`ScalarValue`] has a total string form; reserved for future variants.
pub fn compare(left: &ScalarValue, right: &ScalarValue) -> Result<Ordering3, ValueCoercionError> {
    if let (Some(left_num), Some(right_num)) = (as_numeric(left), as_numeric(right)) {
        return Ok(numeric_ordering(left_num, right_num));
    }
    let left_str = as_string(left);
    let right_str = as_string(right);
    Ok(match left_str.cmp(&right_str) {
        std::cmp::Ordering::Less => Ordering3::Less,
        std::cmp::Ordering::Equal => Ordering3::Equal,
        std::cmp::Ordering::Greater => Ordering3::Greater,
    })
}

fn numeric_ordering(left: f64, right: f64) -> Ordering3 {
    if (left - right).abs() < f64::EPSILON {
        Ordering3::Equal
    } else if left < right {
        Ordering3::Less
    } else {
        Ordering3::Greater
    }
}

/// Coerced equality used by the duplicate filter: numeric equality when both
/// sides parse as finite numbers, else exact string equality.
#[must_use]
pub fn coerced_eq(left: &ScalarValue, right: &ScalarValue) -> bool {
    matches!(compare(left, right), Ok(Ordering3::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_string_compares_against_int() {
        let left = ScalarValue::String("10".to_string());
        let right = ScalarValue::Int(10);
        assert_eq!(compare(&left, &right), Ok(Ordering3::Equal));
    }

    #[test]
    fn non_numeric_strings_compare_lexicographically() {
        let left = ScalarValue::String("apple".to_string());
        let right = ScalarValue::String("banana".to_string());
        assert_eq!(compare(&left, &right), Ok(Ordering3::Less));
    }

    #[test]
    fn bool_coerces_to_one_and_zero() {
        assert_eq!(as_numeric(&ScalarValue::Bool(true)), Some(1.0));
        assert_eq!(as_numeric(&ScalarValue::Bool(false)), Some(0.0));
    }

    #[test]
    fn infinite_float_is_not_numeric() {
        assert_eq!(as_numeric(&ScalarValue::Float(f64::INFINITY)), None);
    }

    #[test]
    fn bool_cast_rules_match_expression_semantics() {
        assert!(as_bool(&ScalarValue::String("nonempty".to_string())));
        assert!(!as_bool(&ScalarValue::String(String::new())));
        assert!(!as_bool(&ScalarValue::String("false".to_string())));
        assert!(!as_bool(&ScalarValue::String("0".to_string())));
        assert!(as_bool(&ScalarValue::Int(5)));
        assert!(!as_bool(&ScalarValue::Int(0)));
    }

    #[test]
    fn coerced_eq_treats_numeric_string_as_equal_to_int() {
        assert!(coerced_eq(
            &ScalarValue::String("42".to_string()),
            &ScalarValue::Int(42)
        ));
    }
}
