//! Priority-grouped activation scheduler (spec.md §5): activations are
//! bucketed by `activation_group_fn`, groups are visited in the order
//! `activation_group_sort_fn` prescribes, and within a group salience
//! orders activations with ties broken FIFO.

use crate::node::NodeId;
use crate::rulebase::{RuleId, RuleMeta};
use crate::schema::Schema;
use crate::token::Token;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A production ready (or no longer ready) to fire.
pub struct Activation<S: Schema> {
    pub rule_id: RuleId,
    pub node: NodeId,
    pub token: Token<S>,
}

// Hand-written: a derive would require `S: Clone`, but `Token<S>` is already
// `Clone` given just `S: Schema` (see its own hand-written impl).
impl<S: Schema> Clone for Activation<S> {
    fn clone(&self) -> Self {
        Activation { rule_id: self.rule_id, node: self.node, token: self.token.clone() }
    }
}

impl<S: Schema> PartialEq for Activation<S> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.token == other.token
    }
}

/// Orders two activation-group keys; lower sorts first. The default orders
/// groups lexically, with the empty string (the default, ungrouped bucket)
/// sorting last so explicit groups always get priority over it.
pub fn default_group_sort(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(b),
    }
}

/// The agenda: pending activations bucketed by activation group, each
/// bucket kept in insertion (FIFO) order until it is popped, at which
/// point it is stably sorted by descending salience so FIFO survives as
/// the tie-break.
pub struct Scheduler<S: Schema> {
    pending: BTreeMap<String, Vec<Activation<S>>>,
    group_sort: Rc<dyn Fn(&str, &str) -> Ordering>,
}

impl<S: Schema> Scheduler<S> {
    pub fn new(group_sort: Rc<dyn Fn(&str, &str) -> Ordering>) -> Self {
        Self { pending: BTreeMap::new(), group_sort }
    }

    /// Rebuild a scheduler around activations carried over from a prior
    /// transient session (spec.md §6.1: `insert`/`retract` may enqueue
    /// activations that a later, separate `fire-rules` call must still see —
    /// the agenda is part of a session's persistent state, not scratch work
    /// that disappears when a transient session freezes back).
    pub fn from_pending(pending: BTreeMap<String, Vec<Activation<S>>>, group_sort: Rc<dyn Fn(&str, &str) -> Ordering>) -> Self {
        Self { pending, group_sort }
    }

    /// Hand back the raw pending map so it can be carried into the next
    /// persistent snapshot.
    pub fn into_pending(self) -> BTreeMap<String, Vec<Activation<S>>> {
        self.pending
    }

    pub fn enqueue(&mut self, group: String, activation: Activation<S>) {
        self.pending.entry(group).or_default().push(activation);
    }

    /// Remove a pending activation matching `(node, token)`, if one has not
    /// fired yet — used when the underlying token is retracted before its
    /// activation was popped (spec.md §5).
    pub fn remove(&mut self, node: NodeId, token: &Token<S>) {
        for bucket in self.pending.values_mut() {
            bucket.retain(|a| !(a.node == node && a.token == *token));
        }
    }

    fn next_group(&self) -> Option<String> {
        let mut candidates: Vec<&String> = self.pending.iter().filter(|(_, v)| !v.is_empty()).map(|(k, _)| k).collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| (self.group_sort)(a, b));
        Some(candidates[0].clone())
    }

    /// Pop the next activation to fire, in group order then salience order.
    pub fn pop(&mut self, rules: &BTreeMap<RuleId, RuleMeta>) -> Option<Activation<S>> {
        let group = self.next_group()?;
        let bucket = self.pending.get_mut(&group)?;
        bucket.sort_by_key(|a| std::cmp::Reverse(rules.get(&a.rule_id).map(|m| m.salience).unwrap_or(0)));
        if bucket.is_empty() {
            self.pending.remove(&group);
            return None;
        }
        let activation = bucket.remove(0);
        if bucket.is_empty() {
            self.pending.remove(&group);
        }
        Some(activation)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(|v| v.is_empty())
    }
}
