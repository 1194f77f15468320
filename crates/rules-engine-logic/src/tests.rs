// rules-engine-logic/src/tests.rs
// ============================================================================
// Module: Condition Tree Unit Tests
// Description: Short-circuit and structural-error coverage for ConditionTree.
// ============================================================================

use std::cell::Cell;

use crate::error::LogicError;
use crate::tree::ConditionTree;
use crate::tree::PredicateEval;

/// A leaf that records whether it was ever evaluated.
#[derive(Debug)]
struct CountingLeaf {
    result: bool,
    calls: std::rc::Rc<Cell<u32>>,
}

impl PredicateEval<()> for CountingLeaf {
    type Error = String;

    fn eval(&self, _subject: &()) -> Result<bool, Self::Error> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.result)
    }
}

#[test]
fn and_short_circuits_on_first_false() {
    let calls = std::rc::Rc::new(Cell::new(0));
    let first = ConditionTree::predicate(CountingLeaf {
        result: false,
        calls: calls.clone(),
    });
    let second = ConditionTree::predicate(CountingLeaf {
        result: true,
        calls: calls.clone(),
    });
    let tree = ConditionTree::and(vec![first, second]).expect("non-empty");

    let result = tree.eval(&()).expect("no leaf error");

    assert!(!result);
    assert_eq!(calls.get(), 1, "second child must not be evaluated");
}

#[test]
fn or_short_circuits_on_first_true() {
    let calls = std::rc::Rc::new(Cell::new(0));
    let first = ConditionTree::predicate(CountingLeaf {
        result: true,
        calls: calls.clone(),
    });
    let second = ConditionTree::predicate(CountingLeaf {
        result: false,
        calls: calls.clone(),
    });
    let tree = ConditionTree::or(vec![first, second]).expect("non-empty");

    let result = tree.eval(&()).expect("no leaf error");

    assert!(result);
    assert_eq!(calls.get(), 1, "second child must not be evaluated");
}

#[test]
fn not_inverts_leaf_result() {
    let calls = std::rc::Rc::new(Cell::new(0));
    let leaf = ConditionTree::predicate(CountingLeaf {
        result: true,
        calls,
    });
    let tree = ConditionTree::not(leaf);

    assert_eq!(tree.eval(&()), Ok(false));
}

#[test]
fn empty_and_is_a_structural_error() {
    let err = ConditionTree::<CountingLeaf>::and(Vec::new()).unwrap_err();
    assert_eq!(err, LogicError::EmptyComposite { kind: "and" });
}

#[test]
fn empty_or_is_a_structural_error() {
    let err = ConditionTree::<CountingLeaf>::or(Vec::new()).unwrap_err();
    assert_eq!(err, LogicError::EmptyComposite { kind: "or" });
}

#[test]
fn leaf_error_propagates_through_composites() {
    struct FailingLeaf;
    impl PredicateEval<()> for FailingLeaf {
        type Error = String;

        fn eval(&self, _subject: &()) -> Result<bool, Self::Error> {
            Err("boom".to_string())
        }
    }

    let tree = ConditionTree::and(vec![ConditionTree::predicate(FailingLeaf)]).expect("non-empty");

    let err = tree.eval(&()).unwrap_err();
    assert_eq!(err, LogicError::PredicateFailed("boom".to_string()));
}
