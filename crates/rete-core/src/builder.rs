//! Compiles a rule or query's LHS (expressed as a [`Formula`] of [`Atom`]s)
//! into the alpha/beta network, by first normalizing it to DNF (spec.md
//! §4.10) and then threading each resulting conjunction through a chain of
//! beta nodes rooted at the network's single root-join node.
//!
//! Surface syntax, a macro parser, and an AOT rule compiler that infers
//! join keys from shared variable names are explicitly out of scope (the
//! spec's Non-goals); callers build an [`Atom`] tree and declare join keys
//! themselves, the way a generated-code backend would.

use crate::alpha::AlphaPredicate;
use crate::dnf::{to_dnf, Formula, Signed};
use crate::error::{RuleEngineError, RuleEngineResult};
use crate::network::{BetaNetwork, Rulebase};
use crate::node::NodeId;
use crate::nodes::{AccumulatorSpec, JoinFilter, TestPredicate};
use crate::rulebase::{QueryId, QueryMeta, RuleId, RuleMeta};
use crate::schema::Schema;
use rete_types::Symbol;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, instrument};

/// One LHS atom: either a fact pattern (optionally negated by DNF), an
/// accumulator, an accumulator with a token-dependent join filter, or a
/// pure binding test.
pub enum Atom<S: Schema> {
    Pattern { type_tag: S::Type, condition: AlphaPredicate<S>, join_keys: Vec<Symbol> },
    Accumulator { type_tag: S::Type, condition: AlphaPredicate<S>, spec: AccumulatorSpec<S> },
    AccumulatorJoinFilter {
        type_tag: S::Type,
        condition: AlphaPredicate<S>,
        spec: AccumulatorSpec<S>,
        filter: JoinFilter<S>,
    },
    Test(TestPredicate<S>),
}

// Hand-written for the same reason as `AccumulatorSpec`: every field clones
// via `Rc` or `S::Type: Clone` (a `TypeTag` supertrait), never `S` itself.
// Required because `to_dnf` is generic over `L: Clone` and atoms are the `L`
// here — DNF distribution over `or` duplicates conjuncts, each carrying its
// own copy of the atoms it shares with sibling branches.
impl<S: Schema> Clone for Atom<S> {
    fn clone(&self) -> Self {
        match self {
            Atom::Pattern { type_tag, condition, join_keys } => {
                Atom::Pattern { type_tag: type_tag.clone(), condition: Rc::clone(condition), join_keys: join_keys.clone() }
            }
            Atom::Accumulator { type_tag, condition, spec } => {
                Atom::Accumulator { type_tag: type_tag.clone(), condition: Rc::clone(condition), spec: spec.clone() }
            }
            Atom::AccumulatorJoinFilter { type_tag, condition, spec, filter } => Atom::AccumulatorJoinFilter {
                type_tag: type_tag.clone(),
                condition: Rc::clone(condition),
                spec: spec.clone(),
                filter: Rc::clone(filter),
            },
            Atom::Test(predicate) => Atom::Test(Rc::clone(predicate)),
        }
    }
}

pub struct RulebaseBuilder<S: Schema> {
    alpha: crate::alpha::AlphaNetwork<S>,
    beta: BetaNetwork<S>,
    root: NodeId,
    rules: BTreeMap<RuleId, RuleMeta>,
    queries: BTreeMap<QueryId, QueryMeta>,
    query_nodes: BTreeMap<QueryId, NodeId>,
    next_rule_id: RuleId,
    next_query_id: QueryId,
}

impl<S: Schema> RulebaseBuilder<S> {
    pub fn new(
        type_fn: Rc<dyn Fn(&S::Fact) -> S::Type>,
        ancestors_fn: Rc<dyn Fn(&S::Type) -> Vec<S::Type>>,
        cache_enabled: bool,
    ) -> Self {
        let alpha = crate::alpha::AlphaNetwork::new(type_fn, ancestors_fn, cache_enabled);
        let mut beta = BetaNetwork::new();
        let root = beta.add_root_join();
        Self {
            alpha,
            beta,
            root,
            rules: BTreeMap::new(),
            queries: BTreeMap::new(),
            query_nodes: BTreeMap::new(),
            next_rule_id: 0,
            next_query_id: 0,
        }
    }

    /// Compile and register a production rule. Returns the assigned
    /// [`RuleId`] the session's RHS dispatch table keys on.
    ///
    /// Detects, at this construction call (spec.md §7), an LHS that
    /// references a join key with no binding source and an accumulator
    /// used in a negated position — see [`Self::compile_atom`].
    #[instrument(skip(self, lhs), fields(rule_name = %meta.name))]
    pub fn add_rule(&mut self, meta: RuleMeta, lhs: Formula<Atom<S>>) -> RuleEngineResult<RuleId> {
        let rule_id = self.next_rule_id;
        self.next_rule_id += 1;
        let rule_name = meta.name.clone();
        self.rules.insert(rule_id, meta);
        let production = self.beta.add_production(rule_id);
        let variants = to_dnf(lhs);
        debug!(rule_id, rule_name = %rule_name, variants = variants.len(), "compiling rule LHS to DNF");
        for conjunct in variants {
            let chain_end = self.compile_conjunct(&rule_name, conjunct)?;
            self.beta.connect(chain_end, production)?;
        }
        Ok(rule_id)
    }

    /// Compile and register a query. `params` declares, in order, which
    /// bound variables a caller must supply values for at query time.
    #[instrument(skip(self, params, lhs))]
    pub fn add_query(&mut self, name: impl Into<String>, params: Vec<Symbol>, lhs: Formula<Atom<S>>) -> RuleEngineResult<QueryId> {
        let query_id = self.next_query_id;
        self.next_query_id += 1;
        let name = name.into();
        debug!(query_id, query_name = %name, "compiling query LHS to DNF");
        self.queries.insert(query_id, QueryMeta::new(name.clone(), params.clone()));
        let query_node = self.beta.add_query(query_id, params);
        for conjunct in to_dnf(lhs) {
            let chain_end = self.compile_conjunct(&name, conjunct)?;
            self.beta.connect(chain_end, query_node)?;
        }
        self.query_nodes.insert(query_id, query_node);
        Ok(query_id)
    }

    fn compile_conjunct(&mut self, context: &str, conjunct: Vec<Signed<Atom<S>>>) -> RuleEngineResult<NodeId> {
        let mut chain = self.root;
        for signed in conjunct {
            let negated = signed.is_negated();
            chain = self.compile_atom(context, chain, negated, signed.into_atom())?;
        }
        Ok(chain)
    }

    /// Compile one DNF-normalized LHS atom onto the chain rooted at
    /// `parent`, returning the beta node it produced.
    ///
    /// `parent == self.root` means this is the first atom of its conjunct,
    /// joining only against the network root's implicit empty token
    /// (spec.md §4.2) — which has no bindings at all, so a first atom may
    /// not declare join keys referencing a variable nothing upstream has
    /// bound yet (spec.md §7: "its LHS references a variable with no
    /// binding source"). Negating an accumulator or accumulator-join-filter
    /// atom has no defined semantics (spec.md §4.6/§4.7 describe them only
    /// as positive conjuncts), so that combination is also rejected here
    /// rather than silently compiled as if it were positive.
    fn compile_atom(&mut self, context: &str, parent: NodeId, negated: bool, atom: Atom<S>) -> RuleEngineResult<NodeId> {
        let is_first = parent == self.root;
        match atom {
            Atom::Pattern { type_tag, condition, join_keys } => {
                if is_first && !join_keys.is_empty() {
                    return Err(RuleEngineError::invalid_rule(
                        context.to_string(),
                        format!("first LHS condition declares join keys {join_keys:?} but nothing is bound yet"),
                    ));
                }
                let alpha_id = self.alpha.add_node(condition);
                self.alpha.register_root(type_tag, alpha_id);
                let beta_id = if negated { self.beta.add_negation(join_keys.clone()) } else { self.beta.add_join(join_keys.clone()) };
                self.alpha.node_mut(alpha_id).add_child(beta_id, join_keys);
                self.beta.connect(parent, beta_id)?;
                Ok(beta_id)
            }
            Atom::Accumulator { type_tag, condition, spec } => {
                if negated {
                    return Err(RuleEngineError::invalid_accumulator_usage(
                        context.to_string(),
                        "an accumulator condition cannot be negated",
                    ));
                }
                if is_first && !spec.join_keys.is_empty() {
                    return Err(RuleEngineError::invalid_accumulator_usage(
                        context.to_string(),
                        format!("first LHS condition declares join keys {:?} but nothing is bound yet", spec.join_keys),
                    ));
                }
                let alpha_id = self.alpha.add_node(condition);
                self.alpha.register_root(type_tag, alpha_id);
                let join_keys = spec.join_keys.clone();
                let beta_id = self.beta.add_accumulator(spec);
                self.alpha.node_mut(alpha_id).add_child(beta_id, join_keys);
                self.beta.connect(parent, beta_id)?;
                Ok(beta_id)
            }
            Atom::AccumulatorJoinFilter { type_tag, condition, spec, filter } => {
                if negated {
                    return Err(RuleEngineError::invalid_accumulator_usage(
                        context.to_string(),
                        "an accumulator-with-join-filter condition cannot be negated",
                    ));
                }
                if is_first && !spec.join_keys.is_empty() {
                    return Err(RuleEngineError::invalid_accumulator_usage(
                        context.to_string(),
                        format!("first LHS condition declares join keys {:?} but nothing is bound yet", spec.join_keys),
                    ));
                }
                let alpha_id = self.alpha.add_node(condition);
                self.alpha.register_root(type_tag, alpha_id);
                let join_keys = spec.join_keys.clone();
                let beta_id = self.beta.add_accumulator_join_filter(spec, filter);
                self.alpha.node_mut(alpha_id).add_child(beta_id, join_keys);
                self.beta.connect(parent, beta_id)?;
                Ok(beta_id)
            }
            Atom::Test(predicate) => {
                let predicate: TestPredicate<S> = if negated {
                    let inner = predicate;
                    Rc::new(move |b: &crate::bindings::Bindings<S>| !(inner)(b))
                } else {
                    predicate
                };
                let beta_id = self.beta.add_test(predicate);
                self.beta.connect(parent, beta_id)?;
                Ok(beta_id)
            }
        }
    }

    pub fn build(self) -> Rulebase<S> {
        Rulebase {
            alpha: self.alpha,
            beta: self.beta,
            rules: self.rules,
            queries: self.queries,
            query_nodes: self.query_nodes,
            root: self.root,
        }
    }
}
