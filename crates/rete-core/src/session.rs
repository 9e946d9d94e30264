//! The Session API (spec.md §6.1, §9): an immutable-looking session value
//! that insertion, retraction and firing each *consume and return*, so a
//! caller can never observe the network mid-update through a stale handle.
//!
//! Internally this is a move-based builder, not a structurally persistent
//! data structure: every operation takes `self` by value and hands back a
//! new `Self`, uniquely owning the same compiled network and memories
//! throughout — cheap, because there is never a second live handle to copy
//! away from. [`PersistentSession`] is the session "at rest" between
//! `fire_rules` calls; [`TransientSession::fire_rules`] is the only place
//! the agenda and the currently-firing rule context exist.

use crate::error::{RuleEngineError, RuleEngineResult};
use crate::listener::SharedListener;
use crate::memory::{Tms, WorkingMemory};
use crate::network::{Dir, ProductionEvent, Rulebase};
use crate::node::NodeId;
use crate::rhs::{RhsContext, RhsOp};
use crate::rulebase::{QueryId, RuleId};
use crate::scheduler::{default_group_sort, Activation, Scheduler};
use crate::schema::Schema;
use crate::token::Token;
use rete_types::Symbol;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, instrument, warn};

/// A compiled rule's RHS action. Returns `Err` to model "any exception
/// raised by a user RHS propagates out of `fire-rules`" (spec.md §7).
pub type RhsFn<S> = Rc<dyn Fn(&Token<S>, &mut RhsContext<S>, &<S as Schema>::Env) -> Result<(), String>>;

/// Construction-time options (spec.md §6.4), mirrored after the teacher's
/// builder-style config structs: every knob has a sensible default, set via
/// `with_*` methods rather than a struct literal.
pub struct SessionOptions<S: Schema> {
    pub(crate) type_fn: Rc<dyn Fn(&S::Fact) -> S::Type>,
    pub(crate) ancestors_fn: Rc<dyn Fn(&S::Type) -> Vec<S::Type>>,
    pub(crate) activation_group_fn: Rc<dyn Fn(&crate::rulebase::RuleMeta) -> String>,
    pub(crate) activation_group_sort_fn: Rc<dyn Fn(&str, &str) -> Ordering>,
    pub(crate) listener: Option<SharedListener<S>>,
    pub(crate) cache: bool,
    pub(crate) env: S::Env,
}

impl<S: Schema> SessionOptions<S> {
    pub fn new(type_fn: Rc<dyn Fn(&S::Fact) -> S::Type>, env: S::Env) -> Self {
        Self {
            type_fn,
            ancestors_fn: Rc::new(|_: &S::Type| Vec::new()),
            // Spec default: a rule's activation group is its declared `group`
            // property if set, otherwise all rules share one ungrouped
            // bucket — within which `Scheduler::pop` already orders by
            // descending salience, giving the spec's "default: the rule's
            // salience property or 0" grouping behavior without needing a
            // distinct bucket per salience value.
            activation_group_fn: Rc::new(|meta: &crate::rulebase::RuleMeta| {
                meta.activation_group.clone().unwrap_or_default()
            }),
            activation_group_sort_fn: Rc::new(default_group_sort),
            listener: None,
            cache: true,
            env,
        }
    }

    pub fn with_ancestors_fn(mut self, f: Rc<dyn Fn(&S::Type) -> Vec<S::Type>>) -> Self {
        self.ancestors_fn = f;
        self
    }

    pub fn with_activation_group_fn(mut self, f: Rc<dyn Fn(&crate::rulebase::RuleMeta) -> String>) -> Self {
        self.activation_group_fn = f;
        self
    }

    pub fn with_activation_group_sort_fn(mut self, f: Rc<dyn Fn(&str, &str) -> Ordering>) -> Self {
        self.activation_group_sort_fn = f;
        self
    }

    pub fn with_listener(mut self, listener: SharedListener<S>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }
}

/// Read-only access to session internals without cloning them (spec.md
/// §6.1's `components`).
pub struct Components<'a, S: Schema> {
    pub working_memory: &'a WorkingMemory<S>,
    pub rules: &'a BTreeMap<RuleId, crate::rulebase::RuleMeta>,
    pub queries: &'a BTreeMap<QueryId, crate::rulebase::QueryMeta>,
}

/// A session at rest: no agenda, no in-flight firing context. Cheap to hold
/// onto between bursts of activity.
pub struct PersistentSession<S: Schema> {
    rulebase: Rulebase<S>,
    wm: WorkingMemory<S>,
    tms: Tms<S>,
    rhs: BTreeMap<RuleId, RhsFn<S>>,
    options: SessionOptions<S>,
    /// Activations enqueued by a prior `insert`/`retract`/`fire_rules` call
    /// that have not fired yet. Carried across the persistent/transient
    /// split rather than dropped, so a caller who inserts facts and only
    /// later calls `fire_rules` on a separate session handle still sees
    /// them (spec.md §6.1).
    pending: BTreeMap<String, Vec<crate::scheduler::Activation<S>>>,
}

impl<S: Schema> PersistentSession<S> {
    /// Build a fresh session from a compiled rulebase. Detects, at this
    /// construction call (spec.md §7: "a rule lacks an RHS action ...
    /// detected at network construction"), any compiled rule with no
    /// matching entry in `rhs` — the dispatch table is only available once
    /// the caller hands it to the session, so this is the first point such
    /// a gap can be caught. Then immediately seeds the beta root with the
    /// implicit empty token (spec.md §4.2) and drains the resulting
    /// events, so rules whose LHS is already satisfied with zero facts
    /// (e.g. a bare negation, spec.md §4.4's "starts with one match"
    /// scenario) are matched before the caller inserts anything.
    pub fn new(mut rulebase: Rulebase<S>, rhs: BTreeMap<RuleId, RhsFn<S>>, options: SessionOptions<S>) -> RuleEngineResult<Self> {
        for (rule_id, meta) in &rulebase.rules {
            if !rhs.contains_key(rule_id) {
                return Err(RuleEngineError::invalid_rule(meta.name.clone(), "rule has no registered RHS action"));
            }
        }
        let seed_events = rulebase.seed_root(options.listener.as_ref());
        let group_sort = Rc::clone(&options.activation_group_sort_fn);
        let mut transient = TransientSession {
            rulebase,
            wm: WorkingMemory::new(),
            tms: Tms::new(),
            rhs,
            options,
            scheduler: Scheduler::new(group_sort),
            current_rule: None,
            last_error: None,
        };
        transient.handle_events(seed_events);
        Ok(transient.to_persistent())
    }

    /// Move this session's state into a [`TransientSession`] that can
    /// insert, retract and fire rules.
    pub fn to_transient(self) -> TransientSession<S> {
        let group_sort = Rc::clone(&self.options.activation_group_sort_fn);
        TransientSession {
            rulebase: self.rulebase,
            wm: self.wm,
            tms: self.tms,
            rhs: self.rhs,
            options: self.options,
            scheduler: Scheduler::from_pending(self.pending, group_sort),
            current_rule: None,
            last_error: None,
        }
    }

    pub fn components(&self) -> Components<'_, S> {
        Components { working_memory: &self.wm, rules: &self.rulebase.rules, queries: &self.rulebase.queries }
    }

    pub fn query(&self, query_id: QueryId, params: &[S::Value]) -> Vec<BTreeMap<Symbol, S::Value>> {
        self.rulebase
            .query_nodes
            .get(&query_id)
            .and_then(|node| self.rulebase.beta.query_node(*node))
            .map(|q| q.query(params))
            .unwrap_or_default()
    }

    pub fn query_by_name(&self, name: &str, params: &[S::Value]) -> RuleEngineResult<Vec<BTreeMap<Symbol, S::Value>>> {
        let id = self
            .rulebase
            .queries
            .iter()
            .find(|(_, meta)| meta.name == name)
            .map(|(id, _)| *id)
            .ok_or_else(|| RuleEngineError::invalid_query(name))?;
        Ok(self.query(id, params))
    }
}

/// A session mid-lifecycle: insert/retract are always legal, but the
/// agenda and `current_rule` (used for no-loop suppression) only make
/// sense while this type is live.
pub struct TransientSession<S: Schema> {
    rulebase: Rulebase<S>,
    wm: WorkingMemory<S>,
    tms: Tms<S>,
    rhs: BTreeMap<RuleId, RhsFn<S>>,
    options: SessionOptions<S>,
    scheduler: Scheduler<S>,
    current_rule: Option<RuleId>,
    last_error: Option<RuleEngineError>,
}

impl<S: Schema> TransientSession<S> {
    pub fn to_persistent(self) -> PersistentSession<S> {
        PersistentSession {
            rulebase: self.rulebase,
            wm: self.wm,
            tms: self.tms,
            rhs: self.rhs,
            options: self.options,
            pending: self.scheduler.into_pending(),
        }
    }

    #[instrument(skip(self, fact))]
    pub fn insert(mut self, fact: S::Fact) -> Self {
        self.insert_internal(fact);
        self
    }

    #[instrument(skip(self, fact))]
    pub fn retract(mut self, fact: S::Fact) -> Self {
        self.retract_internal(fact);
        self
    }

    /// Drain the agenda, firing one activation at a time in priority-group
    /// then salience order (spec.md §5), applying each firing's RHS effects
    /// before popping the next activation.
    #[instrument(skip(self))]
    pub fn fire_rules(mut self) -> RuleEngineResult<Self> {
        let mut fired = 0usize;
        while let Some(activation) = self.scheduler.pop(&self.rulebase.rules) {
            let meta = self.rulebase.rules.get(&activation.rule_id).cloned();
            let Some(meta) = meta else { continue };
            let Some(rhs) = self.rhs.get(&activation.rule_id).cloned() else { continue };

            self.current_rule = Some(activation.rule_id);
            let mut ctx = RhsContext::new();
            match (rhs)(&activation.token, &mut ctx, &self.options.env) {
                Ok(()) => {
                    fired += 1;
                    debug!(rule_name = %meta.name, salience = meta.salience, "rule fired");
                    if let Some(listener) = &self.options.listener {
                        listener.on_fire(&meta.name, &activation.token);
                    }
                    self.apply_rhs_ops(activation.rule_id, activation.node, activation.token, ctx.into_ops());
                }
                Err(message) => {
                    warn!(rule_name = %meta.name, node = activation.node, %message, "RHS raised an exception, aborting fire-rules");
                    let token_debug = format!("{:?}", activation.token);
                    self.last_error =
                        Some(RuleEngineError::rhs_exception(meta.name.clone(), activation.node, token_debug, message));
                    self.current_rule = None;
                    break;
                }
            }
            self.current_rule = None;
        }
        debug!(fired, "fire-rules drained agenda");
        if let Some(err) = self.last_error.take() {
            return Err(err);
        }
        Ok(self)
    }

    fn insert_internal(&mut self, fact: S::Fact) {
        self.wm.insert(fact.clone());
        if let Some(listener) = &self.options.listener {
            listener.on_insert(&fact);
        }
        let events = self.rulebase.insert_fact(&fact, &self.options.env, self.options.listener.as_ref());
        self.handle_events(events);
    }

    fn retract_internal(&mut self, fact: S::Fact) {
        if self.wm.retract(&fact) {
            self.tms.clear_one_occurrence(&fact);
            if let Some(listener) = &self.options.listener {
                listener.on_retract(&fact);
            }
            let events = self.rulebase.retract_fact(&fact, &self.options.env, self.options.listener.as_ref());
            self.handle_events(events);
        }
    }

    fn handle_events(&mut self, events: Vec<ProductionEvent<S>>) {
        for ev in events {
            match ev.dir {
                Dir::Activate => {
                    let Some(meta) = self.rulebase.rules.get(&ev.rule_id) else { continue };
                    if meta.no_loop && self.current_rule == Some(ev.rule_id) {
                        debug!(rule_name = %meta.name, "suppressing no-loop self-activation");
                        continue;
                    }
                    let group = (self.options.activation_group_fn)(meta);
                    if let Some(listener) = &self.options.listener {
                        listener.on_activation(&meta.name, &ev.token);
                    }
                    self.scheduler.enqueue(group, Activation { rule_id: ev.rule_id, node: ev.node, token: ev.token });
                }
                Dir::Retract => {
                    self.scheduler.remove(ev.node, &ev.token);
                    if let Some(meta) = self.rulebase.rules.get(&ev.rule_id) {
                        if let Some(listener) = &self.options.listener {
                            listener.on_activation_cancelled(&meta.name, &ev.token);
                        }
                    }
                    let supported = self.tms.take_supports_for(ev.node, &ev.token);
                    if !supported.is_empty() {
                        debug!(node = ev.node, supported = supported.len(), "cascading truth-maintenance retraction");
                    }
                    for fact in supported {
                        self.retract_internal(fact);
                    }
                }
            }
        }
    }

    fn apply_rhs_ops(&mut self, rule_id: RuleId, node: NodeId, token: Token<S>, ops: Vec<RhsOp<S>>) {
        let mut logical_facts = Vec::new();
        for op in ops {
            match op {
                RhsOp::InsertLogical(fact) => {
                    logical_facts.push(fact.clone());
                    self.insert_internal(fact.clone());
                    if let Some(listener) = &self.options.listener {
                        listener.on_insert_logical(&fact);
                    }
                }
                RhsOp::InsertUnconditional(fact) => {
                    self.insert_internal(fact);
                }
                RhsOp::Retract(fact) => {
                    self.retract_internal(fact);
                }
            }
        }
        if !logical_facts.is_empty() {
            let _ = rule_id;
            self.tms.add_support(node, token, logical_facts);
        }
    }

    pub fn components(&self) -> Components<'_, S> {
        Components { working_memory: &self.wm, rules: &self.rulebase.rules, queries: &self.rulebase.queries }
    }

    pub fn query(&self, query_id: QueryId, params: &[S::Value]) -> Vec<BTreeMap<Symbol, S::Value>> {
        self.rulebase
            .query_nodes
            .get(&query_id)
            .and_then(|node| self.rulebase.beta.query_node(*node))
            .map(|q| q.query(params))
            .unwrap_or_default()
    }
}
