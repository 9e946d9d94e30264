//! Alpha network (spec.md §4.1): "An alpha node owns (condition-eval,
//! child-beta-nodes, env). On insertion of a set of facts it filters and
//! maps them to elements, then calls the transport to send the resulting
//! elements right-wise to its children, grouping by each child's declared
//! join keys."

use crate::bindings::Bindings;
use crate::node::NodeId;
use crate::schema::Schema;
use ahash::AHashMap;
use rete_types::Symbol;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A single-condition predicate evaluated against one candidate fact plus
/// the caller's environment (spec.md §9's `env` thread-through). Returns
/// the bindings the condition extracts when it passes, `None` otherwise.
pub type AlphaPredicate<S> =
    Rc<dyn Fn(&<S as Schema>::Fact, &<S as Schema>::Env) -> Option<Bindings<S>>>;

/// One of this alpha node's children, together with the join-key symbols
/// that child declared — the alpha node groups outgoing elements by this
/// subset of bindings when handing them to the transport (spec.md §4.1).
#[derive(Clone)]
pub struct AlphaChild {
    pub beta_node: NodeId,
    pub join_keys: Vec<Symbol>,
}

pub struct AlphaNode<S: Schema> {
    pub id: NodeId,
    condition: AlphaPredicate<S>,
    pub children: Vec<AlphaChild>,
}

impl<S: Schema> fmt::Debug for AlphaNode<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlphaNode").field("id", &self.id).field("children", &self.children.len()).finish()
    }
}

impl<S: Schema> fmt::Debug for AlphaChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlphaChild").field("beta_node", &self.beta_node).field("join_keys", &self.join_keys).finish()
    }
}

impl<S: Schema> AlphaNode<S> {
    pub fn new(id: NodeId, condition: AlphaPredicate<S>) -> Self {
        AlphaNode { id, condition, children: Vec::new() }
    }

    pub fn add_child(&mut self, beta_node: NodeId, join_keys: Vec<Symbol>) {
        self.children.push(AlphaChild { beta_node, join_keys });
    }

    /// Evaluate this node's condition against a candidate fact. Returns the
    /// bindings extracted if the condition passes.
    pub fn eval(&self, fact: &S::Fact, env: &S::Env) -> Option<Bindings<S>> {
        (self.condition)(fact, env)
    }
}

/// The alpha network: a flat arena of alpha nodes plus the type-keyed
/// routing table described in spec.md §4.1. "Routing: facts are first
/// grouped by the caller's type function. For each type, the union of
/// alpha roots for {type} ∪ ancestors(type) is computed once and memoized
/// for the lifetime of the session."
pub struct AlphaNetwork<S: Schema> {
    nodes: Vec<AlphaNode<S>>,
    roots_by_type: AHashMap<S::Type, Vec<NodeId>>,
    type_fn: Rc<dyn Fn(&S::Fact) -> S::Type>,
    ancestors_fn: Rc<dyn Fn(&S::Type) -> Vec<S::Type>>,
    route_cache: RefCell<AHashMap<S::Type, Rc<Vec<NodeId>>>>,
    cache_enabled: bool,
}

impl<S: Schema> fmt::Debug for AlphaNetwork<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlphaNetwork").field("nodes", &self.nodes.len()).finish()
    }
}

impl<S: Schema> AlphaNetwork<S> {
    pub fn new(
        type_fn: Rc<dyn Fn(&S::Fact) -> S::Type>,
        ancestors_fn: Rc<dyn Fn(&S::Type) -> Vec<S::Type>>,
        cache_enabled: bool,
    ) -> Self {
        AlphaNetwork {
            nodes: Vec::new(),
            roots_by_type: AHashMap::default(),
            type_fn,
            ancestors_fn,
            route_cache: RefCell::new(AHashMap::default()),
            cache_enabled,
        }
    }

    pub fn add_node(&mut self, condition: AlphaPredicate<S>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(AlphaNode::new(id, condition));
        id
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AlphaNode<S> {
        &mut self.nodes[id]
    }

    pub fn node(&self, id: NodeId) -> &AlphaNode<S> {
        &self.nodes[id]
    }

    /// Register an alpha node as a root for a given type tag (a rule's LHS
    /// compiler calls this once per type condition it builds an alpha node
    /// for).
    pub fn register_root(&mut self, type_tag: S::Type, node: NodeId) {
        self.roots_by_type.entry(type_tag).or_default().push(node);
    }

    /// The memoized set of alpha roots reachable from `type_tag` via
    /// {type_tag} ∪ ancestors(type_tag).
    pub fn routed_roots(&self, type_tag: &S::Type) -> Rc<Vec<NodeId>> {
        if self.cache_enabled {
            if let Some(hit) = self.route_cache.borrow().get(type_tag) {
                return Rc::clone(hit);
            }
        }
        let mut roots = Vec::new();
        if let Some(direct) = self.roots_by_type.get(type_tag) {
            roots.extend(direct.iter().copied());
        }
        for ancestor in (self.ancestors_fn)(type_tag) {
            if let Some(anc_roots) = self.roots_by_type.get(&ancestor) {
                roots.extend(anc_roots.iter().copied());
            }
        }
        let roots = Rc::new(roots);
        if self.cache_enabled {
            self.route_cache.borrow_mut().insert(type_tag.clone(), Rc::clone(&roots));
        }
        roots
    }

    pub fn fact_type(&self, fact: &S::Fact) -> S::Type {
        (self.type_fn)(fact)
    }

    /// Evaluate every alpha root reachable from `fact`'s type, returning
    /// the nodes whose condition passed together with the bindings they
    /// extracted. This is the "filters and maps them to elements" half of
    /// §4.1; forwarding to children (grouped by declared join keys) is the
    /// transport's job, implemented in `network.rs`.
    pub fn matches(&self, fact: &S::Fact, env: &S::Env) -> Vec<(NodeId, Bindings<S>)> {
        let type_tag = self.fact_type(fact);
        let roots = self.routed_roots(&type_tag);
        let mut out = Vec::new();
        for &root in roots.iter() {
            if let Some(bindings) = self.nodes[root].eval(fact, env) {
                out.push((root, bindings));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSchema;
    impl Schema for TestSchema {
        type Fact = (&'static str, i64);
        type Value = i64;
        type Env = ();
        type Type = &'static str;
    }

    fn temperature_below(threshold: i64) -> AlphaPredicate<TestSchema> {
        Rc::new(move |fact: &(&'static str, i64), _env: &()| {
            if fact.0 == "Temperature" && fact.1 < threshold {
                Bindings::<TestSchema>::empty().bind(Symbol::new("?t"), fact.1)
            } else {
                None
            }
        })
    }

    #[test]
    fn routes_by_memoized_ancestor_expansion() {
        let type_fn: Rc<dyn Fn(&(&'static str, i64)) -> &'static str> = Rc::new(|f| f.0);
        let ancestors_fn: Rc<dyn Fn(&&'static str) -> Vec<&'static str>> =
            Rc::new(|t| if *t == "Temperature" { vec!["Reading"] } else { vec![] });
        let mut net = AlphaNetwork::<TestSchema>::new(type_fn, ancestors_fn, true);
        let node = net.add_node(temperature_below(20));
        net.register_root("Reading", node);

        let matches = net.matches(&("Temperature", 10), &());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1.get(&Symbol::new("?t")), Some(&10));

        // second call hits the route cache
        let matches2 = net.matches(&("Temperature", 30), &());
        assert!(matches2.is_empty());
    }
}
