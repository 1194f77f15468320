// rules-engine-logic/src/lib.rs
// ============================================================================
// Module: Condition Logic Root
// Description: Public API surface for the universal condition algebra.
// Purpose: Wire together the boolean tree, its evaluation trait, and errors.
// Dependencies: crate::{error, tree}
// ============================================================================

//! ## Overview
//! This crate provides a domain-agnostic short-circuiting boolean tree
//! (`And` / `Or` / `Not` / `Predicate`) used by the rules engine's condition
//! evaluator. The tree itself knows nothing about telemetry points; the
//! domain-specific leaf evaluation is injected through [`PredicateEval`].

pub mod error;
pub mod tree;

#[cfg(test)]
mod tests;

pub use error::LogicError;
pub use tree::ConditionTree;
pub use tree::PredicateEval;
