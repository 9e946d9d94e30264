//! The RHS API (spec.md §6.2): what a rule's right-hand side may do to
//! working memory while it fires. RHS actions are buffered into a
//! [`RhsContext`] while the RHS closure runs and only applied afterward by
//! the session's fire loop, so a rule never observes the network in a
//! half-updated state partway through its own action list.

use crate::schema::Schema;

pub(crate) enum RhsOp<S: Schema> {
    InsertLogical(S::Fact),
    InsertUnconditional(S::Fact),
    Retract(S::Fact),
}

/// Handed to a rule's RHS closure in place of ambient dynamic state (spec.md
/// §9: "RHS actions take an explicit rule-context parameter"). Every
/// logically-inserted fact recorded through one `RhsContext` is tied to the
/// same truth-maintenance support record when the firing that produced them
/// is applied.
pub struct RhsContext<S: Schema> {
    ops: Vec<RhsOp<S>>,
}

impl<S: Schema> Default for RhsContext<S> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<S: Schema> RhsContext<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `insert!`: logically insert one fact, supported by this activation.
    pub fn insert(&mut self, fact: S::Fact) {
        self.ops.push(RhsOp::InsertLogical(fact));
    }

    /// `insert-all!`: logically insert a batch of facts, all sharing one
    /// support record.
    pub fn insert_all(&mut self, facts: impl IntoIterator<Item = S::Fact>) {
        self.ops.extend(facts.into_iter().map(RhsOp::InsertLogical));
    }

    /// `insert-unconditional!`: insert a fact with no truth-maintenance
    /// support — it survives even if this activation is later retracted.
    pub fn insert_unconditional(&mut self, fact: S::Fact) {
        self.ops.push(RhsOp::InsertUnconditional(fact));
    }

    pub fn insert_all_unconditional(&mut self, facts: impl IntoIterator<Item = S::Fact>) {
        self.ops.extend(facts.into_iter().map(RhsOp::InsertUnconditional));
    }

    /// `retract!`: retract a fact (logically supported or not) right now.
    pub fn retract(&mut self, fact: S::Fact) {
        self.ops.push(RhsOp::Retract(fact));
    }

    pub(crate) fn into_ops(self) -> Vec<RhsOp<S>> {
        self.ops
    }
}
