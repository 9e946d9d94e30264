//! Elements and tokens (spec.md §3).

use crate::bindings::Bindings;
use crate::node::NodeId;
use crate::schema::Schema;
use std::fmt;
use std::rc::Rc;

/// "Element = (fact, bindings). Produced by an alpha node or carried
/// through accumulator memory."
pub struct Element<S: Schema> {
    pub fact: S::Fact,
    pub bindings: Bindings<S>,
}

// Hand-written: a derive would bound `S: Debug` itself, but only
// `S::Fact`/`S::Value` need to be (and already are, via `Fact`/`Value`'s
// own `Debug` supertrait).
impl<S: Schema> fmt::Debug for Element<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element").field("fact", &self.fact).field("bindings", &self.bindings).finish()
    }
}

impl<S: Schema> Clone for Element<S> {
    fn clone(&self) -> Self {
        Element { fact: self.fact.clone(), bindings: self.bindings.clone() }
    }
}

impl<S: Schema> PartialEq for Element<S> {
    fn eq(&self, other: &Self) -> bool {
        self.fact == other.fact && self.bindings == other.bindings
    }
}

/// One entry of a token's match list (spec.md §3's "(fact,
/// originating-node-id) pairs"): ordinary nodes contribute the matched
/// fact itself, while an accumulator contributes its reduced value run
/// through `convert-return` instead (spec.md §4.6: "matches include
/// (convert-return(V'), node-id)") — the fact and value types are
/// independent associated types on [`Schema`], so the two cases need a
/// tag rather than a shared type.
pub enum Matched<S: Schema> {
    Fact(S::Fact),
    Value(S::Value),
}

impl<S: Schema> fmt::Debug for Matched<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matched::Fact(fact) => f.debug_tuple("Fact").field(fact).finish(),
            Matched::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

impl<S: Schema> Clone for Matched<S> {
    fn clone(&self) -> Self {
        match self {
            Matched::Fact(f) => Matched::Fact(f.clone()),
            Matched::Value(v) => Matched::Value(v.clone()),
        }
    }
}

impl<S: Schema> PartialEq for Matched<S> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matched::Fact(a), Matched::Fact(b)) => a == b,
            (Matched::Value(a), Matched::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl<S: Schema> Matched<S> {
    pub fn as_fact(&self) -> Option<&S::Fact> {
        match self {
            Matched::Fact(f) => Some(f),
            Matched::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&S::Value> {
        match self {
            Matched::Value(v) => Some(v),
            Matched::Fact(_) => None,
        }
    }
}

/// "Token = (matches, bindings), where matches is an ordered sequence of
/// (fact, originating-node-id) pairs representing the partial match built
/// up so far along one path in the beta network."
///
/// Tokens are wrapped in `Rc` at their point of storage (node memories) so
/// that fan-out to many children is a pointer clone, not a deep copy of the
/// match list.
pub struct Token<S: Schema> {
    pub matches: Rc<Vec<(Matched<S>, NodeId)>>,
    pub bindings: Bindings<S>,
}

impl<S: Schema> fmt::Debug for Token<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").field("matches", &self.matches).field("bindings", &self.bindings).finish()
    }
}

impl<S: Schema> Clone for Token<S> {
    fn clone(&self) -> Self {
        Token { matches: Rc::clone(&self.matches), bindings: self.bindings.clone() }
    }
}

impl<S: Schema> PartialEq for Token<S> {
    fn eq(&self, other: &Self) -> bool {
        *self.matches == *other.matches && self.bindings == other.bindings
    }
}

impl<S: Schema> Token<S> {
    /// The implicit empty token the network root holds (spec.md §4.2:
    /// "Holds the empty token implicitly").
    pub fn empty() -> Self {
        Token { matches: Rc::new(Vec::new()), bindings: Bindings::empty() }
    }

    /// Extend this token with one more matched fact and its bindings,
    /// merging consistently. Returns `None` if the new bindings conflict
    /// with the existing ones.
    pub fn extend(&self, fact: S::Fact, node: NodeId, bindings: Bindings<S>) -> Option<Self> {
        let merged = self.bindings.merge(&bindings)?;
        let mut matches = (*self.matches).clone();
        matches.push((Matched::Fact(fact), node));
        Some(Token { matches: Rc::new(matches), bindings: merged })
    }
}
