//! Binding maps (spec.md §3): "a mapping from variable name ... to
//! fact-derived value. Bindings are grown monotonically along a path from
//! network root to leaf."

use rete_types::Symbol;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::schema::Schema;

/// An immutable binding map, cheap to clone (structural sharing via `Rc`)
/// because tokens carry one of these down every path of the beta network
/// and a join emits a fresh token per combination.
pub struct Bindings<S: Schema>(Rc<BTreeMap<Symbol, S::Value>>);

// Hand-written: a derive would require `S: Debug`, but only `S::Value`
// needs it (and already has it, via `Value`'s own `Debug` supertrait).
impl<S: Schema> fmt::Debug for Bindings<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bindings").field(&self.0).finish()
    }
}

impl<S: Schema> Clone for Bindings<S> {
    fn clone(&self) -> Self {
        Bindings(Rc::clone(&self.0))
    }
}

impl<S: Schema> PartialEq for Bindings<S> {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}
impl<S: Schema> Eq for Bindings<S> {}

impl<S: Schema> Default for Bindings<S> {
    fn default() -> Self {
        Bindings(Rc::new(BTreeMap::new()))
    }
}

impl<S: Schema> Bindings<S> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, sym: &Symbol) -> Option<&S::Value> {
        self.0.get(sym)
    }

    pub fn contains(&self, sym: &Symbol) -> bool {
        self.0.contains_key(sym)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &S::Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extend with a new binding. If `sym` is already bound to a different
    /// value, returns `None` (the unification failed); if it is already
    /// bound to an equal value this is a no-op, matching "any later
    /// condition that mentions it either uses it as input or unifies
    /// against its current value."
    pub fn bind(&self, sym: Symbol, value: S::Value) -> Option<Self> {
        if let Some(existing) = self.0.get(&sym) {
            return if *existing == value { Some(self.clone()) } else { None };
        }
        let mut map = (*self.0).clone();
        map.insert(sym, value);
        Some(Bindings(Rc::new(map)))
    }

    /// Merge two binding maps, checking every shared variable agrees.
    /// Used by join nodes to combine a left token's bindings with a right
    /// element's bindings under a consistent join key.
    pub fn merge(&self, other: &Self) -> Option<Self> {
        let mut map = (*self.0).clone();
        for (sym, value) in other.0.iter() {
            match map.get(sym) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    map.insert(sym.clone(), value.clone());
                }
            }
        }
        Some(Bindings(Rc::new(map)))
    }

    /// Project the declared join-key symbols out of these bindings, in
    /// order, for use as a memory index key. Returns `None` if any key
    /// symbol is not yet bound (the caller must not index under those
    /// keys yet).
    pub fn project(&self, keys: &[Symbol]) -> Option<JoinKey<S>> {
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            out.push(self.0.get(k)?.clone());
        }
        Some(JoinKey(out))
    }

    /// Strip symbols introduced internally by DNF/negation normalization
    /// (spec.md §4.9: "Variables introduced internally by the
    /// normalization pass ... are stripped from returned bindings").
    pub fn without_generated(&self) -> BTreeMap<Symbol, S::Value> {
        self.0.iter().filter(|(k, _)| !k.is_generated()).map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// The projection of a binding map onto a node's declared join-key symbols,
/// used to index that node's left/right memory.
pub struct JoinKey<S: Schema>(Vec<S::Value>);

impl<S: Schema> fmt::Debug for JoinKey<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JoinKey").field(&self.0).finish()
    }
}

impl<S: Schema> Clone for JoinKey<S> {
    fn clone(&self) -> Self {
        JoinKey(self.0.clone())
    }
}
impl<S: Schema> PartialEq for JoinKey<S> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<S: Schema> Eq for JoinKey<S> {}
impl<S: Schema> std::hash::Hash for JoinKey<S> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<S: Schema> From<Vec<S::Value>> for JoinKey<S> {
    fn from(values: Vec<S::Value>) -> Self {
        JoinKey(values)
    }
}

impl<S: Schema> JoinKey<S> {
    pub fn as_slice(&self) -> &[S::Value] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSchema;
    impl Schema for TestSchema {
        type Fact = i64;
        type Value = i64;
        type Env = ();
        type Type = &'static str;
    }

    #[test]
    fn bind_rejects_conflicting_value() {
        let b = Bindings::<TestSchema>::empty();
        let b = b.bind(Symbol::new("?t"), 10).unwrap();
        assert!(b.bind(Symbol::new("?t"), 20).is_none());
        assert_eq!(b.bind(Symbol::new("?t"), 10).unwrap().get(&Symbol::new("?t")), Some(&10));
    }

    #[test]
    fn merge_unifies_shared_variables() {
        let a = Bindings::<TestSchema>::empty().bind(Symbol::new("?t"), 10).unwrap();
        let b = Bindings::<TestSchema>::empty().bind(Symbol::new("?t"), 10).unwrap();
        let c = Bindings::<TestSchema>::empty().bind(Symbol::new("?t"), 11).unwrap();
        assert!(a.merge(&b).is_some());
        assert!(a.merge(&c).is_none());
    }

    #[test]
    fn project_requires_all_keys_bound() {
        let b = Bindings::<TestSchema>::empty().bind(Symbol::new("?t"), 10).unwrap();
        assert!(b.project(&[Symbol::new("?t"), Symbol::new("?w")]).is_none());
        assert!(b.project(&[Symbol::new("?t")]).is_some());
    }
}
