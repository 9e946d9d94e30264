//! The compiled discrimination network: alpha network plus beta network
//! wired together, and the driver that walks token operations through the
//! beta DAG (spec.md §4 end-to-end). This is the "Rulebase" of spec.md §9:
//! an immutable, `Rc`-shareable compiled network that many sessions can
//! share without recompiling.

use crate::alpha::AlphaNetwork;
use crate::bindings::Bindings;
use crate::error::{RuleEngineError, RuleEngineResult};
use crate::listener::SharedListener;
use crate::node::NodeId;
use crate::nodes::{
    AccumulatorJoinFilterNode, AccumulatorNode, JoinNode, NegationNode, Op, ProductionNode,
    QueryNode, RootJoinNode, TestNode,
};
use crate::rulebase::{QueryId, QueryMeta, RuleId, RuleMeta};
use crate::schema::Schema;
use crate::token::{Element, Matched, Token};
use rete_types::Symbol;
use std::collections::BTreeMap;
use tracing::{instrument, trace};

/// Which side of a beta node just received input.
pub enum Input<S: Schema> {
    Left(Vec<Token<S>>),
    Right(Vec<Element<S>>),
}

// Hand-written: a derive would require `S: Clone`, but `Token<S>`/`Element<S>`
// are already `Clone` given just `S: Schema`.
impl<S: Schema> Clone for Input<S> {
    fn clone(&self) -> Self {
        match self {
            Input::Left(tokens) => Input::Left(tokens.clone()),
            Input::Right(elements) => Input::Right(elements.clone()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dir {
    Activate,
    Retract,
}

/// A production reaching or leaving its activation set, to be handed to the
/// scheduler (spec.md §5). Query nodes never emit these — they are read
/// directly via `QueryNode::query`.
pub struct ProductionEvent<S: Schema> {
    pub rule_id: RuleId,
    pub node: NodeId,
    pub token: Token<S>,
    pub dir: Dir,
}

enum BetaKind<S: Schema> {
    RootJoin(RootJoinNode<S>),
    Join(JoinNode<S>),
    Negation(NegationNode<S>),
    Test(TestNode<S>),
    Accumulator(AccumulatorNode<S>),
    AccumulatorJoinFilter(AccumulatorJoinFilterNode<S>),
    Production(ProductionNode<S>, RuleId),
    Query(QueryNode<S>, QueryId),
}

struct BetaNode<S: Schema> {
    kind: BetaKind<S>,
    children: Vec<NodeId>,
}

/// The beta network: an arena of nodes plus parent-to-child edges only
/// (spec.md §9: "never child-to-parent").
pub struct BetaNetwork<S: Schema> {
    nodes: Vec<BetaNode<S>>,
}

impl<S: Schema> Default for BetaNetwork<S> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<S: Schema> BetaNetwork<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: BetaKind<S>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(BetaNode { kind, children: Vec::new() });
        id
    }

    pub fn add_root_join(&mut self) -> NodeId {
        self.push(BetaKind::RootJoin(RootJoinNode::new()))
    }

    pub fn add_join(&mut self, join_keys: Vec<Symbol>) -> NodeId {
        self.push(BetaKind::Join(JoinNode::new(join_keys)))
    }

    pub fn add_negation(&mut self, join_keys: Vec<Symbol>) -> NodeId {
        self.push(BetaKind::Negation(NegationNode::new(join_keys)))
    }

    pub fn add_test(&mut self, predicate: crate::nodes::TestPredicate<S>) -> NodeId {
        self.push(BetaKind::Test(TestNode::new(predicate)))
    }

    pub fn add_accumulator(&mut self, spec: crate::nodes::AccumulatorSpec<S>) -> NodeId {
        self.push(BetaKind::Accumulator(AccumulatorNode::new(spec)))
    }

    pub fn add_accumulator_join_filter(
        &mut self,
        spec: crate::nodes::AccumulatorSpec<S>,
        filter: crate::nodes::JoinFilter<S>,
    ) -> NodeId {
        self.push(BetaKind::AccumulatorJoinFilter(AccumulatorJoinFilterNode::new(spec, filter)))
    }

    pub fn add_production(&mut self, rule_id: RuleId) -> NodeId {
        self.push(BetaKind::Production(ProductionNode::new(rule_id), rule_id))
    }

    pub fn add_query(&mut self, query_id: QueryId, param_keys: Vec<Symbol>) -> NodeId {
        self.push(BetaKind::Query(QueryNode::new(param_keys), query_id))
    }

    /// Wire `parent -> child`. Both ids come from this same network's own
    /// `add_*` calls, so an out-of-range id here means the builder produced
    /// a dangling reference rather than anything a caller's rule/query
    /// input could trigger — surfaced as `Internal` rather than panicking,
    /// matching [`RuleEngineError::Internal`]'s documented purpose.
    pub fn connect(&mut self, parent: NodeId, child: NodeId) -> RuleEngineResult<()> {
        if parent >= self.nodes.len() || child >= self.nodes.len() {
            return Err(RuleEngineError::internal(
                "beta_network::connect",
                format!("malformed DAG edge: parent={parent} child={child} out of {} nodes", self.nodes.len()),
            ));
        }
        self.nodes[parent].children.push(child);
        Ok(())
    }

    pub fn query_node(&self, id: NodeId) -> Option<&QueryNode<S>> {
        match &self.nodes[id].kind {
            BetaKind::Query(q, _) => Some(q),
            _ => None,
        }
    }

    pub fn production_tokens(&self, id: NodeId) -> &[Token<S>] {
        match &self.nodes[id].kind {
            BetaKind::Production(p, _) => p.tokens(),
            _ => &[],
        }
    }

    /// Drive one token operation batch into `id` and recursively through
    /// every descendant it activates or retracts, collecting the
    /// production activations/retractions this produced along the way.
    pub fn dispatch(
        &mut self,
        id: NodeId,
        dir: Dir,
        input: Input<S>,
        listener: Option<&SharedListener<S>>,
    ) -> Vec<ProductionEvent<S>> {
        trace!(node = id, ?dir, "dispatching to beta node");
        notify_flow(listener, id, dir, &input);
        let mut events = Vec::new();
        let ops: Vec<Op<S>> = match &mut self.nodes[id].kind {
            BetaKind::RootJoin(n) => match (dir, input) {
                (Dir::Activate, Input::Left(t)) => n.left_activate(t),
                (Dir::Retract, Input::Left(t)) => n.left_retract(t),
                _ => Vec::new(),
            },
            BetaKind::Join(n) => match (dir, input) {
                (Dir::Activate, Input::Left(t)) => n.left_activate(id, t),
                (Dir::Activate, Input::Right(e)) => n.right_activate(id, e),
                (Dir::Retract, Input::Left(t)) => n.left_retract(id, t),
                (Dir::Retract, Input::Right(e)) => n.right_retract(id, e),
            },
            BetaKind::Negation(n) => match (dir, input) {
                (Dir::Activate, Input::Left(t)) => n.left_activate(t),
                (Dir::Activate, Input::Right(e)) => n.right_activate(e),
                (Dir::Retract, Input::Left(t)) => n.left_retract(t),
                (Dir::Retract, Input::Right(e)) => n.right_retract(e),
            },
            BetaKind::Test(n) => match (dir, input) {
                (Dir::Activate, Input::Left(t)) => n.left_activate(t),
                (Dir::Retract, Input::Left(t)) => n.left_retract(t),
                _ => Vec::new(),
            },
            BetaKind::Accumulator(n) => {
                let ops = match (dir, input) {
                    (Dir::Activate, Input::Left(t)) => n.left_activate(id, t),
                    (Dir::Activate, Input::Right(e)) => n.right_activate(id, e),
                    (Dir::Retract, Input::Left(t)) => n.left_retract(id, t),
                    (Dir::Retract, Input::Right(e)) => n.right_retract(id, e),
                };
                notify_accum_reduced(listener, id, &ops);
                ops
            }
            BetaKind::AccumulatorJoinFilter(n) => {
                let ops = match (dir, input) {
                    (Dir::Activate, Input::Left(t)) => n.left_activate(id, t),
                    (Dir::Activate, Input::Right(e)) => n.right_activate(id, e),
                    (Dir::Retract, Input::Left(t)) => n.left_retract(id, t),
                    (Dir::Retract, Input::Right(e)) => n.right_retract(id, e),
                };
                notify_accum_reduced(listener, id, &ops);
                ops
            }
            BetaKind::Production(p, rule_id) => {
                if let Input::Left(tokens) = input {
                    for token in tokens {
                        match dir {
                            Dir::Activate => {
                                p.add(token.clone());
                                events.push(ProductionEvent { rule_id: *rule_id, node: id, token, dir });
                            }
                            Dir::Retract => {
                                if p.remove(&token) {
                                    events.push(ProductionEvent { rule_id: *rule_id, node: id, token, dir });
                                }
                            }
                        }
                    }
                }
                Vec::new()
            }
            BetaKind::Query(q, _) => {
                if let Input::Left(tokens) = input {
                    match dir {
                        Dir::Activate => q.left_activate(tokens),
                        Dir::Retract => q.left_retract(tokens),
                    }
                }
                Vec::new()
            }
        };

        if !ops.is_empty() {
            let children = self.nodes[id].children.clone();
            for op in ops {
                let (child_dir, token) = match op {
                    Op::Activate(t) => (Dir::Activate, t),
                    Op::Retract(t) => (Dir::Retract, t),
                };
                for &child in &children {
                    events.extend(self.dispatch(child, child_dir, Input::Left(vec![token.clone()]), listener));
                }
            }
        }
        events
    }
}

/// spec.md §6.5 `left-activate`/`left-retract`/`right-activate`/
/// `right-retract`: tell the listener about the token or element a beta
/// node is about to process, at the one place (`dispatch`) that already
/// walks every node on a token's or element's path through the DAG.
fn notify_flow<S: Schema>(listener: Option<&SharedListener<S>>, id: NodeId, dir: Dir, input: &Input<S>) {
    let Some(listener) = listener else { return };
    match (dir, input) {
        (Dir::Activate, Input::Left(tokens)) => tokens.iter().for_each(|t| listener.left_activate(id, t)),
        (Dir::Retract, Input::Left(tokens)) => tokens.iter().for_each(|t| listener.left_retract(id, t)),
        (Dir::Activate, Input::Right(elements)) => elements.iter().for_each(|e| listener.right_activate(id, &e.fact)),
        (Dir::Retract, Input::Right(elements)) => elements.iter().for_each(|e| listener.right_retract(id, &e.fact)),
    }
}

/// spec.md §6.5 `add-accum-reduced`: an accumulator node's emitted
/// activations carry the reduced value as their token's last match entry
/// (`nodes.rs`'s `emit_for_group`/`emit`); read it back out here rather
/// than threading the listener into `nodes.rs` itself.
fn notify_accum_reduced<S: Schema>(listener: Option<&SharedListener<S>>, id: NodeId, ops: &[Op<S>]) {
    let Some(listener) = listener else { return };
    for op in ops {
        if let Op::Activate(token) = op {
            if let Some((Matched::Value(value), _)) = token.matches.last() {
                listener.add_accum_reduced(id, &format!("{value:?}"));
            }
        }
    }
}

/// The compiled, immutable network a session fires facts through: alpha
/// network plus beta network plus rule/query metadata (spec.md §9's
/// "Rulebase").
pub struct Rulebase<S: Schema> {
    pub alpha: AlphaNetwork<S>,
    pub beta: BetaNetwork<S>,
    pub rules: BTreeMap<RuleId, RuleMeta>,
    pub queries: BTreeMap<QueryId, QueryMeta>,
    pub query_nodes: BTreeMap<QueryId, NodeId>,
    /// The beta root every alpha child edge ultimately traces back to;
    /// kept so a freshly built session can seed its root-join node with
    /// nothing (the empty token lives implicitly in `RootJoinNode`).
    pub root: NodeId,
}

impl<S: Schema> Rulebase<S> {
    /// Left-activate the root with the single implicit empty token (spec.md
    /// §4.2), once, so that rules whose first LHS condition is a negation,
    /// test or accumulator — which have no alpha element to trigger them —
    /// still see their initial match before any fact is ever inserted.
    /// Ordinary type-pattern-first rules also receive this seed: it is what
    /// populates their first join node's left-memory with the one token a
    /// join against "nothing yet bound" needs.
    #[instrument(skip(self, listener))]
    pub fn seed_root(&mut self, listener: Option<&SharedListener<S>>) -> Vec<ProductionEvent<S>> {
        self.beta.dispatch(self.root, Dir::Activate, Input::Left(vec![Token::empty()]), listener)
    }

    /// Insert one fact: evaluate it against every routed alpha node, then
    /// fan the resulting elements out through the beta network.
    pub fn insert_fact(&mut self, fact: &S::Fact, env: &S::Env, listener: Option<&SharedListener<S>>) -> Vec<ProductionEvent<S>> {
        self.route_fact(fact, env, Dir::Activate, listener)
    }

    pub fn retract_fact(&mut self, fact: &S::Fact, env: &S::Env, listener: Option<&SharedListener<S>>) -> Vec<ProductionEvent<S>> {
        self.route_fact(fact, env, Dir::Retract, listener)
    }

    #[instrument(skip(self, fact, env, listener))]
    fn route_fact(&mut self, fact: &S::Fact, env: &S::Env, dir: Dir, listener: Option<&SharedListener<S>>) -> Vec<ProductionEvent<S>> {
        let matches = self.alpha.matches(fact, env);
        trace!(alpha_matches = matches.len(), ?dir, "routed fact to alpha roots");
        let mut events = Vec::new();
        for (alpha_id, bindings) in matches {
            let children = self.alpha.node(alpha_id).children.clone();
            for child in children {
                let element = Element { fact: fact.clone(), bindings: restrict(&bindings, &child.join_keys) };
                events.extend(self.beta.dispatch(child.beta_node, dir, Input::Right(vec![element]), listener));
            }
        }
        events
    }
}

/// Elements only need the bindings their target node actually indexes on,
/// but also anything else the node later merges into a token; since a join
/// node re-derives its own index via `Bindings::project`, the element is
/// always handed the alpha condition's *full* extracted bindings — the
/// `join_keys` parameter here exists only to document which subset a given
/// edge cares about and is a no-op restriction today.
fn restrict<S: Schema>(bindings: &Bindings<S>, _join_keys: &[Symbol]) -> Bindings<S> {
    bindings.clone()
}
