// rules-engine-logic/src/error.rs
// ============================================================================
// Module: Condition Logic Error Definitions
// Description: Structured diagnostics for condition tree evaluation.
// Purpose: Carry enough context for callers to explain a failed evaluation.
// Dependencies: std::fmt
// ============================================================================

//! ## Overview
//! Centralizes the errors the universal boolean tree can raise. Domain-leaf
//! errors are opaque strings here; the owning crate (`rules-engine-core`)
//! wraps these into its richer, field-aware error types.

use std::fmt;

/// Errors that can occur while evaluating a condition tree.
///
/// # Invariants
/// - None. Variants capture structural evaluation failures only; leaf
///   (predicate) failures are surfaced through the leaf's own `Result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicError {
    /// An `and`/`or` node carried an empty child list.
    EmptyComposite {
        /// The node kind (`"and"` or `"or"`).
        kind: &'static str,
    },
    /// The leaf predicate failed evaluation with a domain-specific message.
    PredicateFailed(String),
}

impl fmt::Display for LogicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyComposite { kind } => {
                write!(f, "{kind} condition has no children")
            }
            Self::PredicateFailed(msg) => {
                write!(f, "predicate evaluation failed: {msg}")
            }
        }
    }
}

impl std::error::Error for LogicError {}

/// Convenient `Result` alias for condition-tree evaluation.
pub type LogicResult<T = bool> = Result<T, LogicError>;
