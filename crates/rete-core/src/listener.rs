//! The listener interface (spec.md §6.5): an optional observer notified of
//! insertions, retractions, and rule activation lifecycle events. Kept as
//! a single trait object shared by reference across a session's persistent
//! and transient phases — there is no separate state to split, unlike
//! working memory or the agenda, so (unlike `Session`) there is no
//! transient/persistent distinction for listeners themselves.

use crate::schema::Schema;
use crate::token::Token;
use std::rc::Rc;

/// Implement to observe session activity. Every method has a no-op default
/// so a listener only needs to implement the events it cares about.
///
/// Covers the insertion/retraction/activation lifecycle (wired into
/// `Session`, session.rs) plus the full per-node event vocabulary of
/// spec.md §6.5. The per-node hooks are called from `network.rs`'s
/// `BetaNetwork::dispatch`, the one place that already walks every node a
/// token or element passes through on activation/retraction — this is the
/// "actual event site" for `left-activate`/`left-retract`/`right-activate`/
/// `right-retract` the spec names, since node-local methods in `nodes.rs`
/// have no listener reference of their own. `add_accum_reduced` fires
/// alongside an accumulator node's emitted activation, reading the reduced
/// value back out of the token it just produced.
pub trait Listener<S: Schema> {
    fn on_insert(&self, _fact: &S::Fact) {}
    fn on_insert_logical(&self, _fact: &S::Fact) {}
    fn on_retract(&self, _fact: &S::Fact) {}
    fn on_activation(&self, _rule_name: &str, _token: &Token<S>) {}
    fn on_activation_cancelled(&self, _rule_name: &str, _token: &Token<S>) {}
    fn on_fire(&self, _rule_name: &str, _token: &Token<S>) {}
    /// spec.md §6.5 `left-activate`/`left-retract`: a token flowing into or
    /// out of a beta node's left side.
    fn left_activate(&self, _node: usize, _token: &Token<S>) {}
    fn left_retract(&self, _node: usize, _token: &Token<S>) {}
    /// spec.md §6.5 `right-activate`/`right-retract`: a fact flowing into
    /// or out of a beta node's right side (via its alpha-matched element).
    fn right_activate(&self, _node: usize, _fact: &S::Fact) {}
    fn right_retract(&self, _node: usize, _fact: &S::Fact) {}
    /// spec.md §6.5 `add-accum-reduced`: an accumulator node's reduced
    /// value changed; `value_debug` is that value's `Debug` rendering
    /// (kept schema-independent the same way `RuleEngineError::RhsException`
    /// captures its token as a string rather than `S::Value` itself).
    fn add_accum_reduced(&self, _node: usize, _value_debug: &str) {}
}

pub type SharedListener<S> = Rc<dyn Listener<S>>;
