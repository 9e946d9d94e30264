//! Working memory (the fact multiset, spec.md §3 "facts are not deduped by
//! value; working memory tracks occurrences as a multiset") and the truth
//! maintenance system (spec.md §4.11: support records tying a logically
//! inserted fact to the `(node, token)` activation that inserted it, plus
//! recursive retraction when that activation goes away).

use crate::node::NodeId;
use crate::schema::Schema;
use crate::token::Token;
use ahash::AHashMap;
use std::fmt;

/// The fact multiset: every call to `insert` is a new occurrence: two
/// value-equal facts inserted twice are tracked as count 2, and a single
/// `retract` removes one occurrence, not the value.
pub struct WorkingMemory<S: Schema> {
    counts: AHashMap<S::Fact, usize>,
}

// Hand-written: a derive would require `S: Debug`, but only `S::Fact`
// needs it (and already has it, via `Fact`'s own `Debug` supertrait).
impl<S: Schema> fmt::Debug for WorkingMemory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingMemory").field("counts", &self.counts).finish()
    }
}

impl<S: Schema> Default for WorkingMemory<S> {
    fn default() -> Self {
        Self { counts: AHashMap::default() }
    }
}

impl<S: Schema> WorkingMemory<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more occurrence of `fact`. Returns the occurrence count
    /// after insertion.
    pub fn insert(&mut self, fact: S::Fact) -> usize {
        let entry = self.counts.entry(fact).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Remove one occurrence of `fact`. Returns `true` if an occurrence was
    /// present to remove.
    pub fn retract(&mut self, fact: &S::Fact) -> bool {
        if let Some(count) = self.counts.get_mut(fact) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(fact);
            }
            true
        } else {
            false
        }
    }

    pub fn count(&self, fact: &S::Fact) -> usize {
        self.counts.get(fact).copied().unwrap_or(0)
    }

    pub fn contains(&self, fact: &S::Fact) -> bool {
        self.count(fact) > 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&S::Fact, usize)> {
        self.counts.iter().map(|(f, c)| (f, *c))
    }

    pub fn len(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// One logical-insertion support record: the facts in `facts` exist
/// because `(node, token)` fired `insert!`/`insert-all!`. Spec.md §4.11
/// groups a batch insert under one record so a single retraction of the
/// activation drops every fact the batch introduced together.
struct Support<S: Schema> {
    node: NodeId,
    token: Token<S>,
    facts: Vec<S::Fact>,
}

/// Truth maintenance bookkeeping, separate from `WorkingMemory` itself: it
/// only tracks *why* a logically-inserted fact exists, not whether it is
/// currently in working memory.
#[derive(Default)]
pub struct Tms<S: Schema> {
    supports: Vec<Support<S>>,
}

impl<S: Schema> Tms<S> {
    pub fn new() -> Self {
        Self { supports: Vec::new() }
    }

    /// Record that `(node, token)` logically inserted `facts` as one batch
    /// (spec.md §4.11 / §6.2's `insert-all!`).
    pub fn add_support(&mut self, node: NodeId, token: Token<S>, facts: Vec<S::Fact>) {
        self.supports.push(Support { node, token, facts });
    }

    /// Remove every support record belonging to `(node, token)` (the
    /// activation is retracting) and return the union of facts that must
    /// now be retracted from working memory — each exactly once, matching
    /// how many times this activation's RHS inserted it.
    pub fn take_supports_for(&mut self, node: NodeId, token: &Token<S>) -> Vec<S::Fact> {
        let mut out = Vec::new();
        self.supports.retain(|s| {
            if s.node == node && s.token == *token {
                out.extend(s.facts.iter().cloned());
                false
            } else {
                true
            }
        });
        out
    }

    /// Clear TMS support for one occurrence of `fact`, used when a caller
    /// explicitly `retract!`s a logically-inserted fact (spec.md §6.2): the
    /// fact is gone from working memory regardless of why it existed, so
    /// any support record that still lists it must stop claiming it.
    pub fn clear_one_occurrence(&mut self, fact: &S::Fact) {
        for support in &mut self.supports {
            if let Some(pos) = support.facts.iter().position(|f| f == fact) {
                support.facts.swap_remove(pos);
                return;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.supports.is_empty()
    }
}
