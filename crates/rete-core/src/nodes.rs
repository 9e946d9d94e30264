//! Beta network node kinds (spec.md §4.2-§4.9), represented as "a tagged
//! variant with the capability set {left-activate, left-retract,
//! right-activate, right-retract, join-keys, description}" (spec.md §9).
//!
//! Every node-local transition function is pure with respect to its own
//! memory: it mutates its own state and returns the list of token
//! operations (`Op`) that must be propagated to its children. The driver
//! that walks the DAG and actually recurses into children lives in
//! `network.rs`.

use crate::bindings::{Bindings, JoinKey};
use crate::node::NodeId;
use crate::schema::Schema;
use crate::token::{Element, Token};
use ahash::AHashMap;
use rete_types::Symbol;
use std::rc::Rc;

/// A token operation to propagate downstream.
pub enum Op<S: Schema> {
    Activate(Token<S>),
    Retract(Token<S>),
}

// Hand-written: a derive would require `S: Clone`, but `Token<S>` is already
// `Clone` given just `S: Schema`.
impl<S: Schema> Clone for Op<S> {
    fn clone(&self) -> Self {
        match self {
            Op::Activate(t) => Op::Activate(t.clone()),
            Op::Retract(t) => Op::Retract(t.clone()),
        }
    }
}

/// A pure predicate over a token's bindings (spec.md §4.5).
pub type TestPredicate<S> = Rc<dyn Fn(&Bindings<S>) -> bool>;

// ---------------------------------------------------------------------------
// Root-join node (spec.md §4.2)
// ---------------------------------------------------------------------------

/// "The unique beta root. Holds the empty token implicitly." Every rule's
/// first beta node (an ordinary join, negation, test or accumulator node,
/// whichever its first LHS condition compiles to) is connected as a child
/// of this node. The root carries no memory of its own: once, at session
/// construction, [`crate::network::Rulebase::seed_root`] left-activates it
/// with the single implicit empty token; the root simply forwards that
/// token (and, symmetrically, a retraction of it, which never happens in
/// practice since the implicit token is permanent for the life of a
/// session) to its children, exactly as any interior node would. This is
/// what lets a negation or accumulator be the very first LHS condition of a
/// rule (spec.md §4.4's "starts with one match" scenario) without the
/// alpha network being involved at all.
pub struct RootJoinNode<S: Schema>(std::marker::PhantomData<S>);

impl<S: Schema> RootJoinNode<S> {
    pub fn new() -> Self {
        RootJoinNode(std::marker::PhantomData)
    }

    pub fn left_activate(&mut self, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        tokens.into_iter().map(Op::Activate).collect()
    }

    pub fn left_retract(&mut self, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        tokens.into_iter().map(Op::Retract).collect()
    }
}

impl<S: Schema> Default for RootJoinNode<S> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Join node (spec.md §4.3)
// ---------------------------------------------------------------------------

/// "Maintains left-memory (tokens) and right-memory (elements), both
/// indexed by the subset of bindings declared as this node's join keys."
pub struct JoinNode<S: Schema> {
    pub join_keys: Vec<Symbol>,
    left_memory: AHashMap<JoinKey<S>, Vec<Token<S>>>,
    right_memory: AHashMap<JoinKey<S>, Vec<Element<S>>>,
}

impl<S: Schema> JoinNode<S> {
    pub fn new(join_keys: Vec<Symbol>) -> Self {
        Self { join_keys, left_memory: AHashMap::default(), right_memory: AHashMap::default() }
    }

    fn key_of(&self, bindings: &Bindings<S>) -> Option<JoinKey<S>> {
        bindings.project(&self.join_keys)
    }

    pub fn left_activate(&mut self, id: NodeId, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for token in tokens {
            let Some(key) = self.key_of(&token.bindings) else { continue };
            if let Some(elements) = self.right_memory.get(&key) {
                for el in elements {
                    if let Some(child) = token.extend(el.fact.clone(), id, el.bindings.clone()) {
                        ops.push(Op::Activate(child));
                    }
                }
            }
            self.left_memory.entry(key).or_default().push(token);
        }
        ops
    }

    pub fn right_activate(&mut self, id: NodeId, elements: Vec<Element<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for el in elements {
            let Some(key) = self.key_of(&el.bindings) else { continue };
            if let Some(tokens) = self.left_memory.get(&key) {
                for token in tokens {
                    if let Some(child) = token.extend(el.fact.clone(), id, el.bindings.clone()) {
                        ops.push(Op::Activate(child));
                    }
                }
            }
            self.right_memory.entry(key).or_default().push(el);
        }
        ops
    }

    pub fn left_retract(&mut self, id: NodeId, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for token in tokens {
            let Some(key) = self.key_of(&token.bindings) else { continue };
            if let Some(bucket) = self.left_memory.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|t| *t == token) {
                    bucket.swap_remove(pos);
                }
            }
            if let Some(elements) = self.right_memory.get(&key) {
                for el in elements {
                    if let Some(child) = token.extend(el.fact.clone(), id, el.bindings.clone()) {
                        ops.push(Op::Retract(child));
                    }
                }
            }
        }
        ops
    }

    pub fn right_retract(&mut self, id: NodeId, elements: Vec<Element<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for el in elements {
            let Some(key) = self.key_of(&el.bindings) else { continue };
            if let Some(bucket) = self.right_memory.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|e| *e == el) {
                    bucket.swap_remove(pos);
                }
            }
            if let Some(tokens) = self.left_memory.get(&key) {
                for token in tokens {
                    if let Some(child) = token.extend(el.fact.clone(), id, el.bindings.clone()) {
                        ops.push(Op::Retract(child));
                    }
                }
            }
        }
        ops
    }
}

// ---------------------------------------------------------------------------
// Negation node (spec.md §4.4)
// ---------------------------------------------------------------------------

/// "Holds left tokens and right elements per join key B."
pub struct NegationNode<S: Schema> {
    pub join_keys: Vec<Symbol>,
    left_memory: AHashMap<JoinKey<S>, Vec<Token<S>>>,
    right_memory: AHashMap<JoinKey<S>, Vec<Element<S>>>,
}

impl<S: Schema> NegationNode<S> {
    pub fn new(join_keys: Vec<Symbol>) -> Self {
        Self { join_keys, left_memory: AHashMap::default(), right_memory: AHashMap::default() }
    }

    fn key_of(&self, bindings: &Bindings<S>) -> Option<JoinKey<S>> {
        bindings.project(&self.join_keys)
    }

    fn is_empty_under(&self, key: &JoinKey<S>) -> bool {
        self.right_memory.get(key).is_none_or(|v| v.is_empty())
    }

    /// "Left-activate(B, tokens): store; if right-memory under B is empty,
    /// emit tokens downstream."
    pub fn left_activate(&mut self, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for token in tokens {
            let Some(key) = self.key_of(&token.bindings) else { continue };
            let emit = self.is_empty_under(&key);
            self.left_memory.entry(key).or_default().push(token.clone());
            if emit {
                ops.push(Op::Activate(token));
            }
        }
        ops
    }

    /// "Right-activate(B, elements): store; retract all downstream tokens
    /// for B (they are now negated)."
    pub fn right_activate(&mut self, elements: Vec<Element<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for el in elements {
            let Some(key) = self.key_of(&el.bindings) else { continue };
            let was_empty = self.is_empty_under(&key);
            self.right_memory.entry(key.clone()).or_default().push(el);
            if was_empty {
                if let Some(tokens) = self.left_memory.get(&key) {
                    ops.extend(tokens.iter().cloned().map(Op::Retract));
                }
            }
        }
        ops
    }

    /// "Right-retract(B, elements): remove; if right-memory under B is now
    /// empty, re-emit the stored left tokens downstream."
    pub fn right_retract(&mut self, elements: Vec<Element<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for el in elements {
            let Some(key) = self.key_of(&el.bindings) else { continue };
            if let Some(bucket) = self.right_memory.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|e| *e == el) {
                    bucket.swap_remove(pos);
                }
            }
            if self.is_empty_under(&key) {
                if let Some(tokens) = self.left_memory.get(&key) {
                    ops.extend(tokens.iter().cloned().map(Op::Activate));
                }
            }
        }
        ops
    }

    /// "Left-retract(B, tokens): if right-memory under B is empty, retract
    /// downstream."
    pub fn left_retract(&mut self, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for token in tokens {
            let Some(key) = self.key_of(&token.bindings) else { continue };
            if let Some(bucket) = self.left_memory.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|t| *t == token) {
                    bucket.swap_remove(pos);
                }
            }
            if self.is_empty_under(&key) {
                ops.push(Op::Retract(token));
            }
        }
        ops
    }
}

// ---------------------------------------------------------------------------
// Test node (spec.md §4.5)
// ---------------------------------------------------------------------------

pub struct TestNode<S: Schema> {
    predicate: TestPredicate<S>,
}

impl<S: Schema> TestNode<S> {
    pub fn new(predicate: TestPredicate<S>) -> Self {
        Self { predicate }
    }

    /// "On left-activate, forwards those tokens that satisfy the
    /// predicate."
    pub fn left_activate(&mut self, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        tokens.into_iter().filter(|t| (self.predicate)(&t.bindings)).map(Op::Activate).collect()
    }

    /// "On left-retract, forwards all tokens as retractions
    /// unconditionally."
    pub fn left_retract(&mut self, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        tokens.into_iter().map(Op::Retract).collect()
    }
}

// ---------------------------------------------------------------------------
// Accumulator descriptor shared by both accumulator node kinds (spec.md §6.3)
// ---------------------------------------------------------------------------

/// Caller-constructed accumulator behavior (spec.md §6.3). `retract` and
/// `convert_return` have the spec's stated defaults; build them with
/// [`AccumulatorSpec::new`] plus the `with_*` setters rather than
/// constructing the struct literal directly.
pub struct AccumulatorSpec<S: Schema> {
    /// `None` means "no sensible empty value" — the accumulator produces no
    /// result at all when its inner condition has no matches, instead of
    /// the spec.md §4.6 zero-match convenience value.
    pub initial: Option<S::Value>,
    /// Folds one fact into the running accumulator value. `None` means "no
    /// fact has been folded into this group yet" — reduce functions for
    /// accumulators with no natural zero (e.g. "first" or "last") use this
    /// to seed themselves from the first fact instead of from `initial`.
    pub reduce: Rc<dyn Fn(Option<&S::Value>, &S::Fact, &Bindings<S>) -> S::Value>,
    pub combine: Rc<dyn Fn(&S::Value, &S::Value) -> S::Value>,
    /// Returns `None` to mean the group's value collapsed to nothing (the
    /// default no-op retract never does this).
    pub retract: Rc<dyn Fn(&S::Value, &S::Fact, &Bindings<S>) -> Option<S::Value>>,
    pub convert_return: Rc<dyn Fn(&S::Value) -> S::Value>,
    pub result_binding: Option<Symbol>,
    pub join_keys: Vec<Symbol>,
    /// Extra grouping variables beyond `join_keys` the accumulator's inner
    /// condition introduces (spec.md §4.6's "group by full
    /// element-bindings", narrowed here to the variables the network
    /// builder declares as significant for grouping — analogous to the
    /// `group_by` field of a concrete aggregation condition).
    pub group_keys: Vec<Symbol>,
}

// Hand-written: a derive would require `S: Clone`, but every field here is
// either an `Rc` (cheap to clone regardless of `S`) or an `Option<S::Value>`,
// which only needs `S::Value: Clone` — already guaranteed by `Value`'s own
// `Clone` supertrait.
impl<S: Schema> Clone for AccumulatorSpec<S> {
    fn clone(&self) -> Self {
        Self {
            initial: self.initial.clone(),
            reduce: Rc::clone(&self.reduce),
            combine: Rc::clone(&self.combine),
            retract: Rc::clone(&self.retract),
            convert_return: Rc::clone(&self.convert_return),
            result_binding: self.result_binding.clone(),
            join_keys: self.join_keys.clone(),
            group_keys: self.group_keys.clone(),
        }
    }
}

impl<S: Schema> AccumulatorSpec<S> {
    pub fn new(
        initial: Option<S::Value>,
        reduce: Rc<dyn Fn(Option<&S::Value>, &S::Fact, &Bindings<S>) -> S::Value>,
        join_keys: Vec<Symbol>,
    ) -> Self {
        // Default combine-fn: reduce folds a single fact in, while combine
        // folds two already-reduced values together, so reduce can't serve
        // as the default directly. Accumulators whose combine isn't just
        // "prefer one side" (sum, count, min/max all need a real combine)
        // must call `with_combine`.
        let combine: Rc<dyn Fn(&S::Value, &S::Value) -> S::Value> = Rc::new(|a: &S::Value, _b: &S::Value| a.clone());
        Self {
            initial,
            reduce,
            combine,
            retract: Rc::new(|acc: &S::Value, _fact: &S::Fact, _b: &Bindings<S>| Some(acc.clone())),
            convert_return: Rc::new(|v: &S::Value| v.clone()),
            result_binding: None,
            join_keys,
            group_keys: Vec::new(),
        }
    }

    pub fn with_combine(mut self, combine: Rc<dyn Fn(&S::Value, &S::Value) -> S::Value>) -> Self {
        self.combine = combine;
        self
    }

    pub fn with_retract(mut self, retract: Rc<dyn Fn(&S::Value, &S::Fact, &Bindings<S>) -> Option<S::Value>>) -> Self {
        self.retract = retract;
        self
    }

    pub fn with_convert_return(mut self, convert_return: Rc<dyn Fn(&S::Value) -> S::Value>) -> Self {
        self.convert_return = convert_return;
        self
    }

    pub fn with_result_binding(mut self, sym: Symbol) -> Self {
        self.result_binding = Some(sym);
        self
    }

    pub fn with_group_keys(mut self, group_keys: Vec<Symbol>) -> Self {
        self.group_keys = group_keys;
        self
    }

    fn bind_result(&self, base: &Bindings<S>, value: &S::Value) -> Bindings<S> {
        match &self.result_binding {
            Some(sym) => base.bind(sym.clone(), (self.convert_return)(value)).unwrap_or_else(|| base.clone()),
            None => base.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Accumulator node, no cross-condition filter (spec.md §4.6)
// ---------------------------------------------------------------------------

pub struct AccumulatorNode<S: Schema> {
    pub spec: AccumulatorSpec<S>,
    left_memory: AHashMap<JoinKey<S>, Vec<Token<S>>>,
    reduced: AHashMap<JoinKey<S>, AHashMap<JoinKey<S>, S::Value>>,
}

impl<S: Schema> AccumulatorNode<S> {
    pub fn new(spec: AccumulatorSpec<S>) -> Self {
        Self { left_memory: AHashMap::default(), reduced: AHashMap::default(), spec }
    }

    fn group_of(&self, bindings: &Bindings<S>) -> Option<JoinKey<S>> {
        bindings.project(&self.spec.group_keys)
    }

    fn emit_for_group(&self, id: NodeId, token: &Token<S>, group_bindings: &Bindings<S>, value: &S::Value) -> Op<S> {
        let base = token.bindings.merge(group_bindings).unwrap_or_else(|| token.bindings.clone());
        let bindings = self.spec.bind_result(&base, value);
        let matches = {
            let mut m = (*token.matches).clone();
            m.push((crate::token::Matched::Value((self.spec.convert_return)(value)), id));
            m
        };
        Op::Activate(Token { matches: Rc::new(matches), bindings })
    }

    fn retract_for_group(&self, id: NodeId, token: &Token<S>, group_bindings: &Bindings<S>, value: &S::Value) -> Op<S> {
        match self.emit_for_group(id, token, group_bindings, value) {
            Op::Activate(t) => Op::Retract(t),
            other => other,
        }
    }

    pub fn left_activate(&mut self, id: NodeId, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for token in tokens {
            let Some(key) = token.bindings.project(&self.spec.join_keys) else { continue };
            if let Some(groups) = self.reduced.get(&key) {
                if !groups.is_empty() {
                    for (group_key, value) in groups {
                        let group_bindings = self.group_bindings_from_key(group_key);
                        ops.push(self.emit_for_group(id, &token, &group_bindings, value));
                    }
                } else if let Some(initial) = &self.spec.initial {
                    ops.push(self.emit_for_group(id, &token, &Bindings::empty(), initial));
                }
            } else if let Some(initial) = &self.spec.initial {
                ops.push(self.emit_for_group(id, &token, &Bindings::empty(), initial));
            }
            self.left_memory.entry(key).or_default().push(token);
        }
        ops
    }

    pub fn left_retract(&mut self, id: NodeId, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for token in tokens {
            let Some(key) = token.bindings.project(&self.spec.join_keys) else { continue };
            if let Some(bucket) = self.left_memory.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|t| *t == token) {
                    bucket.swap_remove(pos);
                }
            }
            if let Some(groups) = self.reduced.get(&key) {
                for (group_key, value) in groups {
                    let group_bindings = self.group_bindings_from_key(group_key);
                    ops.push(self.retract_for_group(id, &token, &group_bindings, value));
                }
            } else if let Some(initial) = &self.spec.initial {
                ops.push(self.retract_for_group(id, &token, &Bindings::empty(), initial));
            }
        }
        ops
    }

    // The node stores `JoinKey<S>` (a plain value vector) as its group
    // index; reconstructing full `Bindings` for the result requires
    // pairing those values back up with `group_keys`' symbols.
    fn group_bindings_from_key(&self, key: &JoinKey<S>) -> Bindings<S> {
        let mut bindings = Bindings::empty();
        for (sym, value) in self.spec.group_keys.iter().zip(key.values()) {
            bindings = bindings.bind(sym.clone(), value.clone()).unwrap_or(bindings);
        }
        bindings
    }

    /// Right-activate for a batch of raw elements: pre-reduce per
    /// spec.md §4.6, then fold into the stored reduction.
    pub fn right_activate(&mut self, id: NodeId, elements: Vec<Element<S>>) -> Vec<Op<S>> {
        let mut by_b: AHashMap<JoinKey<S>, AHashMap<JoinKey<S>, S::Value>> = AHashMap::default();
        for el in &elements {
            let Some(b) = el.bindings.project(&self.spec.join_keys) else { continue };
            let Some(g) = self.group_of(&el.bindings) else { continue };
            let entry = by_b.entry(b).or_default();
            let acc = entry.get(&g).or(self.spec.initial.as_ref());
            let updated = (self.spec.reduce)(acc, &el.fact, &el.bindings);
            entry.insert(g, updated);
        }

        let mut ops = Vec::new();
        for (b, batch) in by_b {
            let group_map = self.reduced.entry(b.clone()).or_default();
            for (g, batch_value) in batch {
                let previous = group_map.get(&g).cloned();
                let new_value = match &previous {
                    Some(prev) => (self.spec.combine)(prev, &batch_value),
                    None => batch_value,
                };
                if let Some(tokens) = self.left_memory.get(&b) {
                    let group_bindings = self.group_bindings_from_key(&g);
                    if let Some(prev) = &previous {
                        for token in tokens {
                            ops.push(self.retract_for_group(id, token, &group_bindings, prev));
                        }
                    }
                    for token in tokens {
                        ops.push(self.emit_for_group(id, token, &group_bindings, &new_value));
                    }
                }
                group_map.insert(g, new_value);
            }
        }
        ops
    }

    pub fn right_retract(&mut self, id: NodeId, elements: Vec<Element<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for el in elements {
            let Some(b) = el.bindings.project(&self.spec.join_keys) else { continue };
            let Some(g) = self.group_of(&el.bindings) else { continue };
            let Some(group_map) = self.reduced.get_mut(&b) else { continue };
            let Some(previous) = group_map.get(&g).cloned() else { continue };
            let new_value = (self.spec.retract)(&previous, &el.fact, &el.bindings);
            let group_bindings = self.group_bindings_from_key(&g);
            if let Some(tokens) = self.left_memory.get(&b) {
                for token in tokens {
                    ops.push(self.retract_for_group(id, token, &group_bindings, &previous));
                }
                if let Some(new_value) = &new_value {
                    for token in tokens {
                        ops.push(self.emit_for_group(id, token, &group_bindings, new_value));
                    }
                }
            }
            match new_value {
                Some(v) => {
                    group_map.insert(g, v);
                }
                None => {
                    group_map.remove(&g);
                }
            }
        }
        ops
    }
}

// ---------------------------------------------------------------------------
// Accumulator node with a left-token-dependent join filter (spec.md §4.7)
// ---------------------------------------------------------------------------

pub type JoinFilter<S> = Rc<dyn Fn(&Token<S>, &<S as Schema>::Fact, &Bindings<S>) -> bool>;

/// "Some accumulators must filter candidate facts by a predicate that
/// depends on the LEFT token's bindings ... This node cannot pre-reduce to
/// a single V per binding group because the filter depends on which token
/// is joining. Instead the memory stores, per (B, G), the raw list of
/// candidate facts."
pub struct AccumulatorJoinFilterNode<S: Schema> {
    pub spec: AccumulatorSpec<S>,
    pub filter: JoinFilter<S>,
    // Each left token is paired with the value it last emitted downstream
    // (`None` if the filter matched nothing and there was no initial
    // value), so a right-side change can retract exactly that token before
    // emitting its recomputed one, instead of leaving the stale activation
    // live.
    left_memory: AHashMap<JoinKey<S>, Vec<(Token<S>, Option<S::Value>)>>,
    candidates: AHashMap<JoinKey<S>, Vec<Element<S>>>,
}

impl<S: Schema> AccumulatorJoinFilterNode<S> {
    pub fn new(spec: AccumulatorSpec<S>, filter: JoinFilter<S>) -> Self {
        Self { spec, filter, left_memory: AHashMap::default(), candidates: AHashMap::default() }
    }

    fn do_accumulate(&self, token: &Token<S>, key: &JoinKey<S>) -> Option<S::Value> {
        let candidates = self.candidates.get(key)?;
        let mut acc = self.spec.initial.clone();
        let mut any = false;
        for el in candidates {
            if (self.filter)(token, &el.fact, &el.bindings) {
                acc = Some((self.spec.reduce)(acc.as_ref(), &el.fact, &el.bindings));
                any = true;
            }
        }
        if any { acc } else { self.spec.initial.clone() }
    }

    fn emit(&self, id: NodeId, token: &Token<S>, value: &S::Value) -> Op<S> {
        let bindings = self.spec.bind_result(&token.bindings, value);
        let mut matches = (*token.matches).clone();
        matches.push((crate::token::Matched::Value((self.spec.convert_return)(value)), id));
        Op::Activate(Token { matches: Rc::new(matches), bindings })
    }

    fn retract_emit(&self, id: NodeId, token: &Token<S>, value: &S::Value) -> Op<S> {
        match self.emit(id, token, value) {
            Op::Activate(t) => Op::Retract(t),
            other => other,
        }
    }

    pub fn left_activate(&mut self, id: NodeId, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for token in tokens {
            let Some(key) = token.bindings.project(&self.spec.join_keys) else { continue };
            let value = self.do_accumulate(&token, &key);
            if let Some(v) = &value {
                ops.push(self.emit(id, &token, v));
            }
            self.left_memory.entry(key).or_default().push((token, value));
        }
        ops
    }

    pub fn left_retract(&mut self, id: NodeId, tokens: Vec<Token<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for token in tokens {
            let Some(key) = token.bindings.project(&self.spec.join_keys) else { continue };
            if let Some(bucket) = self.left_memory.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|(t, _)| *t == token) {
                    let (removed, previous) = bucket.swap_remove(pos);
                    if let Some(v) = &previous {
                        ops.push(self.retract_emit(id, &removed, v));
                    }
                }
            }
        }
        ops
    }

    /// On right-activate/right-retract every joined left token must be
    /// recomputed, since the filter depends on which token is joining.
    pub fn right_activate(&mut self, id: NodeId, elements: Vec<Element<S>>) -> Vec<Op<S>> {
        let mut touched: Vec<JoinKey<S>> = Vec::new();
        for el in elements {
            let Some(key) = el.bindings.project(&self.spec.join_keys) else { continue };
            self.candidates.entry(key.clone()).or_default().push(el);
            if !touched.contains(&key) {
                touched.push(key);
            }
        }
        self.recompute_touched(id, touched)
    }

    pub fn right_retract(&mut self, id: NodeId, elements: Vec<Element<S>>) -> Vec<Op<S>> {
        let mut touched: Vec<JoinKey<S>> = Vec::new();
        for el in elements {
            let Some(key) = el.bindings.project(&self.spec.join_keys) else { continue };
            if let Some(bucket) = self.candidates.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|e| *e == el) {
                    bucket.swap_remove(pos);
                }
            }
            if !touched.contains(&key) {
                touched.push(key);
            }
        }
        self.recompute_touched(id, touched)
    }

    /// Retract the value each touched token last emitted (spec.md §4.7:
    /// "retract the previous token downstream, and emit the new one if it
    /// converts to a non-nil value"), then recompute and emit its
    /// replacement. Recomputing from scratch rather than incrementally is
    /// still the only sound option here, since the filter depends on which
    /// token is joining — but the previous value is now read back out of
    /// `left_memory` instead of assumed absent.
    fn recompute_touched(&mut self, id: NodeId, touched: Vec<JoinKey<S>>) -> Vec<Op<S>> {
        let mut ops = Vec::new();
        for key in touched {
            let Some(bucket) = self.left_memory.get(&key) else { continue };
            let snapshot = bucket.clone();
            let mut updated = Vec::with_capacity(snapshot.len());
            for (token, previous) in snapshot {
                if let Some(prev) = &previous {
                    ops.push(self.retract_emit(id, &token, prev));
                }
                let new_value = self.do_accumulate(&token, &key);
                if let Some(v) = &new_value {
                    ops.push(self.emit(id, &token, v));
                }
                updated.push((token, new_value));
            }
            self.left_memory.insert(key, updated);
        }
        ops
    }
}

impl<S: Schema> JoinKey<S> {
    pub fn values(&self) -> std::slice::Iter<'_, S::Value> {
        self.as_slice().iter()
    }
}

// ---------------------------------------------------------------------------
// Production node (spec.md §4.8) — scheduling side-effects handled by the
// network driver (it needs access to the scheduler and TMS), this struct
// only keeps the tokens currently registered as activations so they can be
// evicted on retraction.
// ---------------------------------------------------------------------------

pub struct ProductionNode<S: Schema> {
    pub rule_id: crate::rulebase::RuleId,
    tokens: Vec<Token<S>>,
}

impl<S: Schema> ProductionNode<S> {
    pub fn new(rule_id: crate::rulebase::RuleId) -> Self {
        Self { rule_id, tokens: Vec::new() }
    }

    pub fn add(&mut self, token: Token<S>) {
        self.tokens.push(token);
    }

    pub fn remove(&mut self, token: &Token<S>) -> bool {
        if let Some(pos) = self.tokens.iter().position(|t| t == token) {
            self.tokens.swap_remove(pos);
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> &[Token<S>] {
        &self.tokens
    }
}

// ---------------------------------------------------------------------------
// Query node (spec.md §4.9)
// ---------------------------------------------------------------------------

pub struct QueryNode<S: Schema> {
    pub param_keys: Vec<Symbol>,
    tokens: AHashMap<JoinKey<S>, Vec<Token<S>>>,
}

impl<S: Schema> QueryNode<S> {
    pub fn new(param_keys: Vec<Symbol>) -> Self {
        Self { param_keys, tokens: AHashMap::default() }
    }

    pub fn left_activate(&mut self, tokens: Vec<Token<S>>) {
        for token in tokens {
            let key = token.bindings.project(&self.param_keys).unwrap_or_else(|| JoinKey::from(Vec::new()));
            self.tokens.entry(key).or_default().push(token);
        }
    }

    pub fn left_retract(&mut self, tokens: Vec<Token<S>>) {
        for token in tokens {
            let key = token.bindings.project(&self.param_keys).unwrap_or_else(|| JoinKey::from(Vec::new()));
            if let Some(bucket) = self.tokens.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|t| *t == token) {
                    bucket.swap_remove(pos);
                }
            }
        }
    }

    /// Run a query for the given parameter values, in the same order as
    /// `param_keys`. Returns the (query-variable-stripped) bindings of
    /// every stored token whose parameter values match.
    pub fn query(&self, params: &[S::Value]) -> Vec<std::collections::BTreeMap<Symbol, S::Value>> {
        let key = JoinKey::from(params.to_vec());
        self.tokens.get(&key).map(|tokens| tokens.iter().map(|t| t.bindings.without_generated()).collect()).unwrap_or_default()
    }
}
