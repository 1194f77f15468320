// rules-engine-core/src/error.rs
// ============================================================================
// Module: Rules Engine Error Definitions
// Description: Structured diagnostics for condition, action, and runtime faults.
// Purpose: Give every failure mode typed context without ever panicking the caller.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every error kind the engine can raise is represented here as a
//! `thiserror` variant carrying structured context
//! (field, operator, expected/actual type). Nothing in this crate panics
//! across an API boundary: [`crate::dispatch::dispatch_rule`] catches panics
//! at the per-action dispatch boundary and converts them into
//! [`ActionError::Runtime`] with the captured cause.

use thiserror::Error;

/// Errors the condition evaluator can raise.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    /// The condition tree could not be parsed (wire DSL, or the expression
    /// sub-language).
    #[error("condition parse error: {message}")]
    Parse {
        /// Human-readable parse failure.
        message: String,
    },
    /// The referenced field does not resolve on the point.
    #[error("unknown field '{field}', available: {available_fields:?}")]
    Field {
        /// The field path that failed to resolve.
        field: String,
        /// The fields that were available at the point this failure occurred.
        available_fields: Vec<String>,
    },
    /// The operator is not valid for the resolved field's type.
    #[error("operator '{operator}' is not valid for field '{field}' of type {actual_type}")]
    Operator {
        /// The field the operator was applied to.
        field: String,
        /// The offending operator.
        operator: String,
        /// The actual runtime type of the field's value.
        actual_type: String,
    },
    /// A node mixed shapes (e.g. an `and` node also carrying `field`).
    #[error("condition node has mixed shape: {message}")]
    Type {
        /// Description of the shape conflict.
        message: String,
    },
    /// Evaluation failed for a reason not covered by the other variants.
    #[error("condition evaluation error: {message}")]
    Eval {
        /// Human-readable evaluation failure.
        message: String,
    },
}

/// Errors raised while coercing or comparing polymorphic values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueCoercionError {
    /// The value could not be coerced to the type the operator requires.
    #[error("cannot coerce value of type {from} to {to}")]
    Incompatible {
        /// The source type.
        from: String,
        /// The type coercion was attempted into.
        to: String,
    },
    /// A regex pattern was empty or failed to compile.
    #[error("invalid regex pattern: {message}")]
    InvalidPattern {
        /// Compiler diagnostic or "empty pattern".
        message: String,
    },
}

/// Errors raised while validating or applying action configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A required configuration key was missing.
    #[error("missing required config key '{key}'")]
    MissingKey {
        /// The missing key.
        key: String,
    },
    /// A configuration value had the wrong shape or an out-of-range value.
    #[error("invalid config value for '{key}': {message}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// Explanation of why the value is invalid.
        message: String,
    },
}

/// Top-level error produced by any action handler (filter, transform,
/// aggregate, forward, alert).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    /// The action's configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A value could not be coerced for the operation requested.
    #[error(transparent)]
    Coercion(#[from] ValueCoercionError),
    /// The condition tree evaluation failed.
    #[error(transparent)]
    Condition(#[from] ConditionError),
    /// The expression parser/evaluator failed.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    /// A runtime fault not covered above, including recovered panics.
    #[error("runtime error: {message}")]
    Runtime {
        /// Description of the failure, including any recovered panic payload.
        message: String,
    },
}

impl ActionError {
    /// Builds a [`ActionError::Runtime`] from a recovered panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "action handler panicked with a non-string payload".to_string()
        };
        Self::Runtime {
            message,
        }
    }
}

/// Errors raised by the recursive-descent arithmetic/expression parser.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    /// The parser could not consume the full input.
    #[error("unexpected token '{token}' at position {position}")]
    UnexpectedToken {
        /// The offending token text.
        token: String,
        /// Byte offset into the input.
        position: usize,
    },
    /// The input ended before a complete expression was parsed.
    #[error("unexpected end of expression")]
    UnexpectedEof,
    /// A referenced function name is not recognized.
    #[error("unknown function '{name}'")]
    UnknownFunction {
        /// The offending function name.
        name: String,
    },
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivideByZero,
    /// `sqrt` of a negative number.
    #[error("sqrt of negative number {value}")]
    NegativeSqrt {
        /// The offending operand.
        value: f64,
    },
    /// `ln`/`log` of a non-positive number.
    #[error("logarithm of non-positive number {value}")]
    NonPositiveLog {
        /// The offending operand.
        value: f64,
    },
    /// A named variable referenced in the expression was not bound.
    #[error("unbound variable '{name}'")]
    UnboundVariable {
        /// The offending variable name.
        name: String,
    },
}
