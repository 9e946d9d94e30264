//! End-to-end scenarios straight out of the spec's testable-properties
//! section: a small weather domain (Temperature/WindSpeed facts, a Cold
//! derived fact) driven through insert/retract/fire-rules/query exactly as
//! an embedding application would.

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
    Temperature(i64, &'static str),
    WindSpeed(i64, &'static str),
    Cold(i64),
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum Val {
    Int(i64),
}

struct Weather;
impl Schema for Weather {
    type Fact = Fact;
    type Value = Val;
    type Env = ();
    type Type = &'static str;
}

fn type_fn() -> Rc<dyn Fn(&Fact) -> &'static str> {
    Rc::new(|f: &Fact| match f {
        Fact::Temperature(..) => "Temperature",
        Fact::WindSpeed(..) => "WindSpeed",
        Fact::Cold(_) => "Cold",
    })
}

fn no_ancestors() -> Rc<dyn Fn(&&'static str) -> Vec<&'static str>> {
    Rc::new(|_: &&'static str| Vec::new())
}

fn temperature_below(threshold: i64) -> Atom<Weather> {
    let cond: alpha::AlphaPredicate<Weather> = Rc::new(move |f: &Fact, _env: &()| match f {
        Fact::Temperature(t, _) if *t < threshold => Bindings::<Weather>::empty().bind(Symbol::new("?t"), Val::Int(*t)),
        _ => None,
    });
    Atom::Pattern { type_tag: "Temperature", condition: cond, join_keys: Vec::new() }
}

fn windspeed_above(threshold: i64) -> Atom<Weather> {
    let cond: alpha::AlphaPredicate<Weather> = Rc::new(move |f: &Fact, _env: &()| match f {
        Fact::WindSpeed(w, _) if *w > threshold => Bindings::<Weather>::empty().bind(Symbol::new("?w"), Val::Int(*w)),
        _ => None,
    });
    Atom::Pattern { type_tag: "WindSpeed", condition: cond, join_keys: Vec::new() }
}

// This is the first atom of its conjunct: the left side it joins against is
// just the network root's implicit empty token, which has no bindings yet,
// so its own join_keys must be empty — "?t" only becomes a join key for the
// *next* atom in the chain, which joins against this one's binding.
fn temperature_eq_t() -> Atom<Weather> {
    let cond: alpha::AlphaPredicate<Weather> =
        Rc::new(|f: &Fact, _env: &()| match f {
            Fact::Temperature(t, _) => Bindings::<Weather>::empty().bind(Symbol::new("?t"), Val::Int(*t)),
            _ => None,
        });
    Atom::Pattern { type_tag: "Temperature", condition: cond, join_keys: Vec::new() }
}

fn windspeed_eq_t() -> Atom<Weather> {
    let cond: alpha::AlphaPredicate<Weather> =
        Rc::new(|f: &Fact, _env: &()| match f {
            Fact::WindSpeed(w, _) => Bindings::<Weather>::empty().bind(Symbol::new("?t"), Val::Int(*w)),
            _ => None,
        });
    Atom::Pattern { type_tag: "WindSpeed", condition: cond, join_keys: vec![Symbol::new("?t")] }
}

fn cold_pattern() -> Atom<Weather> {
    let cond: alpha::AlphaPredicate<Weather> = Rc::new(|f: &Fact, _env: &()| match f {
        Fact::Cold(t) => Bindings::<Weather>::empty().bind(Symbol::new("?c"), Val::Int(*t)),
        _ => None,
    });
    Atom::Pattern { type_tag: "Cold", condition: cond, join_keys: Vec::new() }
}

type Captured = Rc<RefCell<Vec<Token<Weather>>>>;

fn capturing_rhs(captured: Captured) -> RhsFn<Weather> {
    Rc::new(move |token: &Token<Weather>, _ctx: &mut RhsContext<Weather>, _env: &()| {
        captured.borrow_mut().push(token.clone());
        Ok(())
    })
}

/// Scenario 1: `[Temperature t<20] ⇒ capture t`; insert `Temperature(10,
/// "MCI")`; fire. Captured token matches on `Temperature(10,"MCI")`.
#[test]
fn single_condition_rule_captures_matching_fact() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Weather>::new(type_fn(), no_ancestors(), true);
    let rule_id = builder.add_rule(RuleMeta::new("cold-capture"), Formula::Atom(temperature_below(20))).unwrap();
    let rulebase = builder.build();

    let captured: Captured = Rc::new(RefCell::new(Vec::new()));
    let mut rhs = BTreeMap::new();
    rhs.insert(rule_id, capturing_rhs(Rc::clone(&captured)));

    let options = SessionOptions::<Weather>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, rhs, options).unwrap();
    let session = session.to_transient().insert(Fact::Temperature(10, "MCI")).fire_rules().unwrap();
    let _ = session.to_persistent();

    let rows = captured.borrow();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].matches.iter().any(|(m, _)| m.as_fact() == Some(&Fact::Temperature(10, "MCI"))));
}

/// Scenario 2: `[Temperature t=?t][WindSpeed w=?t] ⇒ capture ?t`; insert
/// `Temperature(10,"MCI")`, `WindSpeed(10,"MCI")`; fire. Captured value = 10.
#[test]
fn join_on_shared_variable_binds_consistently() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Weather>::new(type_fn(), no_ancestors(), true);
    let lhs = Formula::and([Formula::Atom(temperature_eq_t()), Formula::Atom(windspeed_eq_t())]);
    let rule_id = builder.add_rule(RuleMeta::new("temp-wind-match"), lhs).unwrap();
    let rulebase = builder.build();

    let captured: Captured = Rc::new(RefCell::new(Vec::new()));
    let mut rhs = BTreeMap::new();
    rhs.insert(rule_id, capturing_rhs(Rc::clone(&captured)));

    let options = SessionOptions::<Weather>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, rhs, options).unwrap();
    let session = session
        .to_transient()
        .insert(Fact::Temperature(10, "MCI"))
        .insert(Fact::WindSpeed(10, "MCI"))
        .fire_rules()
        .unwrap();
    let _ = session.to_persistent();

    let rows = captured.borrow();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].bindings.get(&Symbol::new("?t")), Some(&Val::Int(10)));
}

/// Scenario 3: `(min :temperature) from Temperature`, inserted values 15,
/// 10, 80; query returns `{?t: 10}`.
#[test]
fn min_accumulator_tracks_running_minimum() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Weather>::new(type_fn(), no_ancestors(), true);

    let cond: alpha::AlphaPredicate<Weather> = Rc::new(|f: &Fact, _env: &()| match f {
        Fact::Temperature(t, _) => Bindings::<Weather>::empty().bind(Symbol::new("?raw"), Val::Int(*t)),
        _ => None,
    });
    let reduce: Rc<dyn Fn(Option<&Val>, &Fact, &Bindings<Weather>) -> Val> =
        Rc::new(|acc, fact, _b| {
            let v = match fact {
                Fact::Temperature(t, _) => *t,
                _ => unreachable!(),
            };
            match acc {
                Some(Val::Int(cur)) if *cur < v => Val::Int(*cur),
                _ => Val::Int(v),
            }
        });
    let spec = AccumulatorSpec::<Weather>::new(None, reduce, Vec::new())
        .with_combine(Rc::new(|a: &Val, b: &Val| match (a, b) {
            (Val::Int(x), Val::Int(y)) => Val::Int((*x).min(*y)),
            _ => a.clone(),
        }))
        .with_result_binding(Symbol::new("?t"));
    let atom = Atom::Accumulator { type_tag: "Temperature", condition: cond, spec };

    let query_id = builder.add_query("min-temperature", Vec::new(), Formula::Atom(atom)).unwrap();
    let rulebase = builder.build();

    let options = SessionOptions::<Weather>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, BTreeMap::new(), options).unwrap();
    let session = session
        .to_transient()
        .insert(Fact::Temperature(15, "MCI"))
        .insert(Fact::Temperature(10, "MCI"))
        .insert(Fact::Temperature(80, "MCI"))
        .fire_rules()
        .unwrap()
        .to_persistent();

    let rows = session.query(query_id, &[]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(&Symbol::new("?t")), Some(&Val::Int(10)));
}

/// Scenario 4: `[Temperature t<20] ⇒ insert!(Cold t)`, query for `Cold`;
/// insert `Temperature(10,"MCI")`, fire, query returns one `Cold(10)`;
/// retract the Temperature, fire, query returns empty.
#[test]
fn logical_insertion_is_truth_maintained() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Weather>::new(type_fn(), no_ancestors(), true);
    let rule_id = builder.add_rule(RuleMeta::new("cold-if-below-20"), Formula::Atom(temperature_below(20))).unwrap();
    let query_id = builder.add_query("cold", Vec::new(), Formula::Atom(cold_pattern())).unwrap();
    let rulebase = builder.build();

    let rhs: RhsFn<Weather> = Rc::new(|token: &Token<Weather>, ctx: &mut RhsContext<Weather>, _env: &()| {
        if let Some(Val::Int(t)) = token.bindings.get(&Symbol::new("?t")) {
            ctx.insert(Fact::Cold(*t));
        }
        Ok(())
    });
    let mut rhs_map = BTreeMap::new();
    rhs_map.insert(rule_id, rhs);

    let options = SessionOptions::<Weather>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, rhs_map, options).unwrap();

    let session = session.to_transient().insert(Fact::Temperature(10, "MCI")).fire_rules().unwrap().to_persistent();
    let rows = session.query(query_id, &[]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(&Symbol::new("?c")), Some(&Val::Int(10)));

    let session =
        session.to_transient().retract(Fact::Temperature(10, "MCI")).fire_rules().unwrap().to_persistent();
    assert!(session.query(query_id, &[]).is_empty());
}

/// Scenario 5: `[:not [Temperature t<20]]`; starts with one match; insert
/// `Temperature(10,"MCI")` — zero matches; retract it — one match again.
#[test]
fn negation_round_trip() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Weather>::new(type_fn(), no_ancestors(), true);
    let query_id = builder.add_query("no-cold-temp", Vec::new(), Formula::not(Formula::Atom(temperature_below(20)))).unwrap();
    let rulebase = builder.build();

    let options = SessionOptions::<Weather>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, BTreeMap::new(), options).unwrap();
    assert_eq!(session.query(query_id, &[]).len(), 1);

    let session = session.to_transient().insert(Fact::Temperature(10, "MCI")).fire_rules().unwrap().to_persistent();
    assert!(session.query(query_id, &[]).is_empty());

    let session =
        session.to_transient().retract(Fact::Temperature(10, "MCI")).fire_rules().unwrap().to_persistent();
    assert_eq!(session.query(query_id, &[]).len(), 1);
}

/// Scenario 6: `[:not [:or [WindSpeed>30] [Temperature<20]]]` with no facts
/// yields one match; with `WindSpeed(40,"MCI")` yields zero; after
/// retraction yields one.
#[test]
fn dnf_normalizes_negated_disjunction() {
    init_tracing();
    let mut builder = RulebaseBuilder::<Weather>::new(type_fn(), no_ancestors(), true);
    let lhs = Formula::not(Formula::or([Formula::Atom(windspeed_above(30)), Formula::Atom(temperature_below(20))]));
    let query_id = builder.add_query("calm-and-warm", Vec::new(), lhs).unwrap();
    let rulebase = builder.build();

    let options = SessionOptions::<Weather>::new(type_fn(), ());
    let session = PersistentSession::new(rulebase, BTreeMap::new(), options).unwrap();
    assert_eq!(session.query(query_id, &[]).len(), 1);

    let session = session.to_transient().insert(Fact::WindSpeed(40, "MCI")).fire_rules().unwrap().to_persistent();
    assert!(session.query(query_id, &[]).is_empty());

    let session = session.to_transient().retract(Fact::WindSpeed(40, "MCI")).fire_rules().unwrap().to_persistent();
    assert_eq!(session.query(query_id, &[]).len(), 1);
}
