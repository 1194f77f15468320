// rules-engine-logic/src/tree.rs
// ============================================================================
// Module: Condition Tree
// Description: Universal short-circuiting Boolean algebra over typed leaves.
// Purpose: Define `ConditionTree` and its evaluation trait.
// Dependencies: serde::{Deserialize, Serialize}, smallvec::SmallVec
// ============================================================================

//! ## Overview
//! This module defines the core condition tree: a composable Boolean algebra
//! that works over any domain-specific leaf type while preserving
//! short-circuit evaluation guarantees. The logical operators (`And`, `Or`,
//! `Not`) are universal; the `Predicate` variant is the boundary where
//! domain-specific semantics (field comparisons, expressions) are injected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use smallvec::SmallVec;

use crate::error::LogicError;
use crate::error::LogicResult;

// ============================================================================
// SECTION: Predicate Evaluation Trait
// ============================================================================

/// Domain boundary: evaluates a single leaf predicate against a subject.
///
/// Implementors decide what "subject" means (for this crate's caller, a
/// telemetry `Point`). Errors from the leaf propagate out of the whole tree
/// evaluation without being swallowed by the composite operators.
pub trait PredicateEval<Subject> {
    /// The error type a leaf can fail with.
    type Error: std::fmt::Display;

    /// Evaluates this predicate against the given subject.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when the predicate cannot be evaluated (e.g. a
    /// missing field, a type mismatch, an invalid regex).
    fn eval(&self, subject: &Subject) -> Result<bool, Self::Error>;
}

// ============================================================================
// SECTION: Condition Tree Definition
// ============================================================================

/// Universal condition tree with domain-specific leaves.
///
/// This enum represents the composable Boolean algebra that powers the
/// rules engine's condition evaluator. `And`/`Or`/`Not` are universal and
/// domain-agnostic; `Predicate` is where domain semantics are injected.
///
/// # Invariants
/// - `And`/`Or` with an empty child list is a parse-time error, not
///   something this type can represent once constructed through
///   [`ConditionTree::and`]/[`ConditionTree::or`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree<P> {
    /// Logical AND: all children must be satisfied.
    ///
    /// Evaluation short-circuits on the first `false` child.
    And(SmallVec<[Box<Self>; 4]>),

    /// Logical OR: at least one child must be satisfied.
    ///
    /// Evaluation short-circuits on the first `true` child.
    Or(SmallVec<[Box<Self>; 4]>),

    /// Logical NOT: inverts the result of the sub-condition.
    Not(Box<Self>),

    /// Domain-specific atomic predicate (a simple comparison or an
    /// expression leaf).
    Predicate(P),
}

impl<P> ConditionTree<P> {
    /// Builds an `And` node, rejecting an empty child list.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::EmptyComposite`] when `children` is empty.
    pub fn and(children: Vec<Self>) -> LogicResult<Self> {
        if children.is_empty() {
            return Err(LogicError::EmptyComposite { kind: "and" });
        }
        Ok(Self::And(children.into_iter().map(Box::new).collect()))
    }

    /// Builds an `Or` node, rejecting an empty child list.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::EmptyComposite`] when `children` is empty.
    pub fn or(children: Vec<Self>) -> LogicResult<Self> {
        if children.is_empty() {
            return Err(LogicError::EmptyComposite { kind: "or" });
        }
        Ok(Self::Or(children.into_iter().map(Box::new).collect()))
    }

    /// Builds a `Not` node.
    #[must_use]
    pub fn not(child: Self) -> Self {
        Self::Not(Box::new(child))
    }

    /// Builds a leaf predicate node.
    #[must_use]
    pub const fn predicate(predicate: P) -> Self {
        Self::Predicate(predicate)
    }

    /// Evaluates this condition tree with aggressive short-circuiting.
    ///
    /// Composite nodes (`And`/`Or`/`Not`) are always evaluated first,
    /// regardless of how the caller materialized the tree, matching the
    /// "composite priority" contract: leaves only run when the structure
    /// requires it.
    ///
    /// # Errors
    ///
    /// Propagates the first leaf error encountered during evaluation. A
    /// short-circuited branch never evaluates, so it can never error.
    pub fn eval<Subject>(&self, subject: &Subject) -> LogicResult
    where
        P: PredicateEval<Subject>,
    {
        match self {
            Self::Predicate(predicate) => predicate
                .eval(subject)
                .map_err(|err| LogicError::PredicateFailed(err.to_string())),
            Self::Not(inner) => inner.eval(subject).map(|result| !result),
            Self::And(children) => {
                for child in children {
                    if !child.eval(subject)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(children) => {
                for child in children {
                    if child.eval(subject)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}
