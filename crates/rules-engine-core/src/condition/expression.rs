// rules-engine-core/src/condition/expression.rs
// ============================================================================
// Module: Expression Engine / Arithmetic Parser
// Description: Hand-written recursive-descent parser for the shared
//              arithmetic/boolean expression DSL.
// Purpose: Exact operator precedence and parentheses, no string-splitting.
// Dependencies: crate::error::ExpressionError
// ============================================================================

//! ## Overview
//! A single recursive-descent parser is shared by the condition evaluator's
//! `expression` node kind and the transform engine's `expression` transform.
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ( "||" and_expr )*
//! and_expr   := comparison ( "&&" comparison )*
//! comparison := arithmetic ( (">"|">="|"<"|"<="|"=="|"!=") arithmetic )?
//! arithmetic := term ( ("+"|"-") term )*
//! term       := unary ( ("*"|"/"|"%") unary )*
//! unary      := ("+"|"-")? primary
//! primary    := number | identifier | identifier "(" expr ")" | "(" expr ")"
//! ```
//!
//! Parser state is exactly `{input, position}`; completion requires the
//! entire input (modulo trailing whitespace) to be consumed. `identifier(...)`
//! invokes one of the single-argument numeric functions listed in the
//! specification; any other identifier is a variable lookup.

use std::collections::HashMap;

use crate::error::ExpressionError;

/// Either a numeric or boolean intermediate result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExprValue {
    /// A numeric result.
    Number(f64),
    /// A boolean result, produced only by comparisons and `&&`/`||`.
    Bool(bool),
}

impl ExprValue {
    fn as_number(self, position: usize) -> Result<f64, ExpressionError> {
        match self {
            Self::Number(n) => Ok(n),
            Self::Bool(_) => Err(ExpressionError::UnexpectedToken {
                token: "<boolean>".to_string(),
                position,
            }),
        }
    }

    fn as_bool(self, position: usize) -> Result<bool, ExpressionError> {
        match self {
            Self::Bool(b) => Ok(b),
            Self::Number(_) => Err(ExpressionError::UnexpectedToken {
                token: "<number>".to_string(),
                position,
            }),
        }
    }
}

/// Recursive-descent parser/evaluator over the shared expression grammar.
pub struct ExpressionParser<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> ExpressionParser<'a> {
    /// Builds a parser over `input`, positioned at the start.
    #[must_use]
    pub const fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    /// Parses and evaluates the full input against `variables`, requiring
    /// the entire (whitespace-trimmed) input to be consumed.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpressionError`] on malformed syntax, an unbound
    /// variable, an unknown function, or an arithmetic domain error
    /// (division by zero, `sqrt` of a negative, `ln`/`log` of non-positive).
    pub fn evaluate(&mut self, variables: &HashMap<String, f64>) -> Result<ExprValue, ExpressionError> {
        let value = self.parse_or(variables)?;
        self.skip_whitespace();
        if self.position < self.input.len() {
            return Err(ExpressionError::UnexpectedToken {
                token: self.remaining().to_string(),
                position: self.position,
            });
        }
        Ok(value)
    }

    /// Convenience for arithmetic-only callers (the transform engine): parses
    /// and requires the result to be numeric.
    ///
    /// # Errors
    ///
    /// As [`Self::evaluate`], plus an error when the expression evaluates to
    /// a boolean.
    pub fn evaluate_numeric(&mut self, variables: &HashMap<String, f64>) -> Result<f64, ExpressionError> {
        let position = self.position;
        self.evaluate(variables)?.as_number(position)
    }

    fn parse_or(&mut self, variables: &HashMap<String, f64>) -> Result<ExprValue, ExpressionError> {
        let mut left = self.parse_and(variables)?;
        loop {
            self.skip_whitespace();
            if self.consume_literal("||") {
                let position = self.position;
                let right = self.parse_and(variables)?;
                let combined = left.as_bool(position)? || right.as_bool(position)?;
                left = ExprValue::Bool(combined);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_and(&mut self, variables: &HashMap<String, f64>) -> Result<ExprValue, ExpressionError> {
        let mut left = self.parse_comparison(variables)?;
        loop {
            self.skip_whitespace();
            if self.consume_literal("&&") {
                let position = self.position;
                let right = self.parse_comparison(variables)?;
                let combined = left.as_bool(position)? && right.as_bool(position)?;
                left = ExprValue::Bool(combined);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_comparison(&mut self, variables: &HashMap<String, f64>) -> Result<ExprValue, ExpressionError> {
        let left = self.parse_arithmetic(variables)?;
        self.skip_whitespace();
        let op = if self.consume_literal(">=") {
            Some(">=")
        } else if self.consume_literal("<=") {
            Some("<=")
        } else if self.consume_literal("==") {
            Some("==")
        } else if self.consume_literal("!=") {
            Some("!=")
        } else if self.consume_literal(">") {
            Some(">")
        } else if self.consume_literal("<") {
            Some("<")
        } else {
            None
        };
        let Some(op) = op else {
            return Ok(left);
        };
        let position = self.position;
        let right = self.parse_arithmetic(variables)?;
        let left_num = left.as_number(position)?;
        let right_num = right.as_number(position)?;
        let result = match op {
            ">=" => left_num >= right_num,
            "<=" => left_num <= right_num,
            "==" => (left_num - right_num).abs() < f64::EPSILON,
            "!=" => (left_num - right_num).abs() >= f64::EPSILON,
            ">" => left_num > right_num,
            _ => left_num < right_num,
        };
        Ok(ExprValue::Bool(result))
    }

    fn parse_arithmetic(&mut self, variables: &HashMap<String, f64>) -> Result<ExprValue, ExpressionError> {
        let mut left = self.parse_term(variables)?.as_number(self.position)?;
        loop {
            self.skip_whitespace();
            if self.consume_literal("+") {
                let right = self.parse_term(variables)?.as_number(self.position)?;
                left += right;
            } else if self.consume_literal("-") {
                let right = self.parse_term(variables)?.as_number(self.position)?;
                left -= right;
            } else {
                return Ok(ExprValue::Number(left));
            }
        }
    }

    fn parse_term(&mut self, variables: &HashMap<String, f64>) -> Result<ExprValue, ExpressionError> {
        let mut left = self.parse_unary(variables)?.as_number(self.position)?;
        loop {
            self.skip_whitespace();
            let position = self.position;
            if self.consume_literal("*") {
                let right = self.parse_unary(variables)?.as_number(self.position)?;
                left *= right;
            } else if self.consume_literal("/") {
                let right = self.parse_unary(variables)?.as_number(self.position)?;
                if right == 0.0 {
                    return Err(ExpressionError::DivideByZero);
                }
                left /= right;
            } else if self.consume_literal("%") {
                let right = self.parse_unary(variables)?.as_number(self.position)?;
                if right == 0.0 {
                    return Err(ExpressionError::DivideByZero);
                }
                left %= right;
            } else {
                let _ = position;
                return Ok(ExprValue::Number(left));
            }
        }
    }

    fn parse_unary(&mut self, variables: &HashMap<String, f64>) -> Result<ExprValue, ExpressionError> {
        self.skip_whitespace();
        if self.consume_literal("-") {
            let value = self.parse_unary(variables)?.as_number(self.position)?;
            return Ok(ExprValue::Number(-value));
        }
        if self.consume_literal("+") {
            return self.parse_unary(variables);
        }
        self.parse_primary(variables)
    }

    #[allow(clippy::too_many_lines, reason = "single dispatch point over literal/identifier/function/parenthesized forms")]
    fn parse_primary(&mut self, variables: &HashMap<String, f64>) -> Result<ExprValue, ExpressionError> {
        self.skip_whitespace();
        if self.consume_literal("(") {
            let value = self.parse_or(variables)?;
            self.skip_whitespace();
            if !self.consume_literal(")") {
                return Err(ExpressionError::UnexpectedToken {
                    token: self.remaining().to_string(),
                    position: self.position,
                });
            }
            return Ok(value);
        }

        if let Some(number) = self.consume_number() {
            return Ok(ExprValue::Number(number));
        }

        if let Some(identifier) = self.consume_identifier() {
            self.skip_whitespace();
            if self.consume_literal("(") {
                let position = self.position;
                let argument = self.parse_or(variables)?.as_number(position)?;
                self.skip_whitespace();
                if !self.consume_literal(")") {
                    return Err(ExpressionError::UnexpectedToken {
                        token: self.remaining().to_string(),
                        position: self.position,
                    });
                }
                return apply_function(&identifier, argument).map(ExprValue::Number);
            }
            return variables.get(&identifier).copied().map_or_else(
                || Err(ExpressionError::UnboundVariable { name: identifier.clone() }),
                |value| Ok(ExprValue::Number(value)),
            );
        }

        if self.position >= self.input.len() {
            return Err(ExpressionError::UnexpectedEof);
        }
        Err(ExpressionError::UnexpectedToken {
            token: self.remaining().to_string(),
            position: self.position,
        })
    }

    fn remaining(&self) -> &str {
        &self.input[self.position..]
    }

    fn skip_whitespace(&mut self) {
        while self.position < self.input.len() && self.input.as_bytes()[self.position].is_ascii_whitespace() {
            self.position += 1;
        }
    }

    fn consume_literal(&mut self, literal: &str) -> bool {
        self.skip_whitespace();
        if self.remaining().starts_with(literal) {
            self.position += literal.len();
            true
        } else {
            false
        }
    }

    fn consume_number(&mut self) -> Option<f64> {
        let start = self.position;
        let bytes = self.input.as_bytes();
        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
            end += 1;
        }
        if end == start {
            return None;
        }
        let text = &self.input[start..end];
        let number: f64 = text.parse().ok()?;
        self.position = end;
        Some(number)
    }

    fn consume_identifier(&mut self) -> Option<String> {
        let start = self.position;
        let bytes = self.input.as_bytes();
        if start >= bytes.len() || !(bytes[start].is_ascii_alphabetic() || bytes[start] == b'_') {
            return None;
        }
        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'.') {
            end += 1;
        }
        self.position = end;
        Some(self.input[start..end].to_string())
    }
}

fn apply_function(name: &str, argument: f64) -> Result<f64, ExpressionError> {
    match name {
        "abs" => Ok(argument.abs()),
        "sqrt" => {
            if argument < 0.0 {
                Err(ExpressionError::NegativeSqrt { value: argument })
            } else {
                Ok(argument.sqrt())
            }
        }
        "sin" => Ok(argument.sin()),
        "cos" => Ok(argument.cos()),
        "tan" => Ok(argument.tan()),
        "ln" | "log" => {
            if argument <= 0.0 {
                Err(ExpressionError::NonPositiveLog { value: argument })
            } else if name == "ln" {
                Ok(argument.ln())
            } else {
                Ok(argument.log10())
            }
        }
        "exp" => Ok(argument.exp()),
        "floor" => Ok(argument.floor()),
        "ceil" => Ok(argument.ceil()),
        "round" => Ok(argument.round()),
        other => Err(ExpressionError::UnknownFunction { name: other.to_string() }),
    }
}

/// Evaluates `expr` against `variables`, falling back to a naive
/// `&&`/`||`-splitting, one-comparison-per-leaf evaluator when the
/// recursive-descent parser rejects the input.
///
/// # Errors
///
/// Returns the recursive-descent parser's error unless the fallback also
/// fails, in which case the fallback's error is returned.
pub fn evaluate_boolean(expr: &str, variables: &HashMap<String, f64>) -> Result<bool, ExpressionError> {
    match ExpressionParser::new(expr).evaluate(variables) {
        Ok(ExprValue::Bool(b)) => Ok(b),
        Ok(ExprValue::Number(n)) => Ok(n != 0.0),
        Err(_) => fallback_split(expr, variables),
    }
}

fn fallback_split(expr: &str, variables: &HashMap<String, f64>) -> Result<bool, ExpressionError> {
    if let Some(leaves) = split_on(expr, "&&") {
        return leaves
            .iter()
            .try_fold(true, |acc, leaf| Ok(acc && fallback_leaf(leaf, variables)?));
    }
    if let Some(leaves) = split_on(expr, "||") {
        let mut any = false;
        for leaf in leaves {
            if fallback_leaf(&leaf, variables)? {
                any = true;
            }
        }
        return Ok(any);
    }
    fallback_leaf(expr, variables)
}

fn split_on(expr: &str, separator: &str) -> Option<Vec<String>> {
    if expr.contains(separator) {
        Some(expr.split(separator).map(str::trim).map(str::to_string).collect())
    } else {
        None
    }
}

fn fallback_leaf(leaf: &str, variables: &HashMap<String, f64>) -> Result<bool, ExpressionError> {
    const OPERATORS: [&str; 6] = [">=", "<=", "==", "!=", ">", "<"];
    let leaf = leaf.trim();
    for op in OPERATORS {
        if let Some((lhs, rhs)) = leaf.split_once(op) {
            let left = resolve_operand(lhs.trim(), variables)?;
            let right = resolve_operand(rhs.trim(), variables)?;
            return Ok(match op {
                ">=" => left >= right,
                "<=" => left <= right,
                "==" => (left - right).abs() < f64::EPSILON,
                "!=" => (left - right).abs() >= f64::EPSILON,
                ">" => left > right,
                _ => left < right,
            });
        }
    }
    resolve_operand(leaf, variables).map(|value| value != 0.0)
}

fn resolve_operand(text: &str, variables: &HashMap<String, f64>) -> Result<f64, ExpressionError> {
    if let Ok(number) = text.parse::<f64>() {
        return Ok(number);
    }
    variables
        .get(text)
        .copied()
        .ok_or_else(|| ExpressionError::UnboundVariable { name: text.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variables(value: f64) -> HashMap<String, f64> {
        HashMap::from([("value".to_string(), value)])
    }

    /// End-to-end scenario: `value > 10 && value < 100` matches 55 and
    /// rejects 5.
    #[test]
    fn compound_range_condition_matches_inside_but_not_outside() {
        assert_eq!(evaluate_boolean("value > 10 && value < 100", &variables(55.0)), Ok(true));
        assert_eq!(evaluate_boolean("value > 10 && value < 100", &variables(5.0)), Ok(false));
    }

    #[test]
    fn or_condition_matches_on_either_side() {
        assert_eq!(evaluate_boolean("value < 0 || value > 100", &variables(150.0)), Ok(true));
        assert_eq!(evaluate_boolean("value < 0 || value > 100", &variables(50.0)), Ok(false));
    }

    #[test]
    fn operator_precedence_evaluates_arithmetic_before_comparison() {
        assert_eq!(evaluate_boolean("2 + 3 * 10 == 32", &HashMap::new()), Ok(true));
    }

    #[test]
    fn unbound_variable_is_an_error() {
        assert!(evaluate_boolean("missing > 1", &HashMap::new()).is_err());
    }

    #[test]
    fn fallback_split_evaluates_the_same_compound_condition_directly() {
        let result = fallback_split("value > 10 && value < 20", &variables(15.0));
        assert_eq!(result, Ok(true));
    }
}
