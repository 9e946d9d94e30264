//! Universal properties from the spec's testable-properties section:
//! salience ordering, no-loop self-suppression, and the fact multiset's
//! confluence under duplicate insert/retract.

use rete_core::*;
use rete_types::Symbol;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Initialize a test-scoped `tracing` subscriber so the spans/events this
/// crate emits on insert/retract/fire-rules are visible when a test is run
/// with `--nocapture` (mirrors how the teacher's binary entry points call
/// `tracing_subscriber::fmt::init()`; `try_init` instead, since many test
/// functions share one process and only the first call may succeed).
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}


#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum Fact {
    Trigger,
    Counter(i64),
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum Val {
    Int(i64),
}

struct Counters;
impl Schema for Counters {
    type Fact = Fact;
    type Value = Val;
    type Env = ();
    type Type = &'static str;
}

fn type_fn() -> Rc<dyn Fn(&Fact) -> &'static str> {
    Rc::new(|f: &Fact| match f {
        Fact::Trigger => "Trigger",
        Fact::Counter(_) => "Counter",
    })
}

fn no_ancestors() -> Rc<dyn Fn(&&'static str) -> Vec<&'static str>> {
    Rc::new(|_: &&'static str| Vec::new())
}

fn trigger_pattern() -> Atom<Counters> {
    let cond: alpha::AlphaPredicate<Counters> = Rc::new(|f: &Fact, _env: &()| match f {
        Fact::Trigger => Some(Bindings::<Counters>::empty()),
        _ => None,
    });
    Atom::Pattern { type_tag: "Trigger", condition: cond, join_keys: Vec::new() }
}

fn counter_pattern() -> Atom<Counters> {
    let cond: alpha::AlphaPredicate<Counters> = Rc::new(|f: &Fact, _env: &()| match f {
        Fact::Counter(n) => Bindings::<Counters>::empty().bind(Symbol::new("?n"), Val::Int(*n)),
        _ => None,
    });
    Atom::Pattern { type_tag: "Counter", condition: cond, join_keys: Vec::new() }
}

/// Salience ordering: under any permutation of rule definition order, three
/// rules with salience 100, 50, 0 triggered by one fact fire in that order.
#[test]
fn salience_orders_activations_regardless_of_definition_order() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Counters>::new(type_fn(), no_ancestors(), true);
    // Defined out of salience order on purpose.
    let low = builder.add_rule(RuleMeta::new("low").with_salience(0), Formula::Atom(trigger_pattern())).unwrap();
    let high = builder.add_rule(RuleMeta::new("high").with_salience(100), Formula::Atom(trigger_pattern())).unwrap();
    let mid = builder.add_rule(RuleMeta::new("mid").with_salience(50), Formula::Atom(trigger_pattern())).unwrap();
    let rulebase = builder.build();

    let log: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));
    let mut rhs: BTreeMap<RuleId, RhsFn<Counters>> = BTreeMap::new();
    for (rule_id, salience) in [(low, 0), (high, 100), (mid, 50)] {
        let log = Rc::clone(&log);
        rhs.insert(
            rule_id,
            Rc::new(move |_token: &Token<Counters>, _ctx: &mut RhsContext<Counters>, _env: &()| {
                log.borrow_mut().push(salience);
                Ok(())
            }),
        );
    }

    let options = SessionOptions::<Counters>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, rhs, options).unwrap();
    let session = session.to_transient().insert(Fact::Trigger).fire_rules().unwrap();
    let _ = session.to_persistent();

    assert_eq!(*log.borrow(), vec![100, 50, 0]);
}

/// No-loop: a rule marked no-loop whose RHS inserts facts that would
/// re-satisfy its own LHS does not fire a second time for the same
/// activation.
#[test]
fn no_loop_suppresses_self_triggered_reactivation() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Counters>::new(type_fn(), no_ancestors(), true);
    let rule_id =
        builder.add_rule(RuleMeta::new("increment").with_no_loop(true), Formula::Atom(counter_pattern())).unwrap();
    let rulebase = builder.build();

    let fire_count: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
    let fire_count_rhs = Rc::clone(&fire_count);
    let rhs: RhsFn<Counters> = Rc::new(move |token: &Token<Counters>, ctx: &mut RhsContext<Counters>, _env: &()| {
        *fire_count_rhs.borrow_mut() += 1;
        if let Some(Val::Int(n)) = token.bindings.get(&Symbol::new("?n")) {
            ctx.insert_unconditional(Fact::Counter(n + 1));
        }
        Ok(())
    });
    let mut rhs_map = BTreeMap::new();
    rhs_map.insert(rule_id, rhs);

    let options = SessionOptions::<Counters>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, rhs_map, options).unwrap();
    let session = session.to_transient().insert(Fact::Counter(1)).fire_rules().unwrap().to_persistent();

    // Only the original activation fired; the RHS-inserted Counter(2) never
    // gets queued while rule "increment" is the currently-firing rule.
    assert_eq!(*fire_count.borrow(), 1);
    assert!(session.components().working_memory.contains(&Fact::Counter(1)));
    assert!(session.components().working_memory.contains(&Fact::Counter(2)));
}

/// Confluence of equal facts: inserting fact x twice then retracting it
/// once leaves exactly one occurrence in working memory, and the match
/// that depends only on x's presence is still there.
#[test]
fn duplicate_insertion_tracked_as_occurrence_count() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Counters>::new(type_fn(), no_ancestors(), true);
    let query_id = builder.add_query("triggers", Vec::new(), Formula::Atom(trigger_pattern())).unwrap();
    let rulebase = builder.build();

    let options = SessionOptions::<Counters>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, BTreeMap::new(), options).unwrap();
    let session = session
        .to_transient()
        .insert(Fact::Trigger)
        .insert(Fact::Trigger)
        .retract(Fact::Trigger)
        .fire_rules()
        .unwrap()
        .to_persistent();

    assert_eq!(session.components().working_memory.count(&Fact::Trigger), 1);
    assert!(session.components().working_memory.contains(&Fact::Trigger));
    assert_eq!(session.query(query_id, &[]).len(), 1);
}
