//! Tests for agenda ordering, filters, triggers and the firing loop.

use std::sync::Arc;

use ruleweave_engine::{Activation, Network, Session, SessionConfig};
use ruleweave_foundation::{ErrorKind, SemanticLimit, Value};
use ruleweave_model::{
    ActionBody, ActionElement, ActionFn, ActionTrigger, Expr, Repeatability, RuleDefinition,
    RuleElement,
};

use crate::common::{Recorder, item, pattern, row, session};

fn item_rule(name: &str, recorder: &Recorder) -> RuleDefinition {
    RuleDefinition::new(name)
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(recorder.action(vec![Expr::lit(name), Expr::var("i").field("name")]))
}

fn qty(activation: &Activation) -> i64 {
    match activation.value("i") {
        Some(Value::Record(record)) => record.get("qty").and_then(Value::as_int).unwrap_or(0),
        _ => 0,
    }
}

#[test]
fn higher_priority_fires_first_then_arrival_order() {
    let recorder = Recorder::new();
    let mut session = session(vec![
        item_rule("low", &recorder),
        item_rule("high", &recorder).with_priority(10),
    ]);
    session.insert(item("a", 1)).unwrap();
    session.insert(item("b", 1)).unwrap();

    let summary = session.fire().unwrap();
    assert_eq!(summary.fired, 4);
    assert!(!summary.halted);
    assert_eq!(
        recorder.take(),
        vec![
            row([Value::from("high"), Value::from("a")]),
            row([Value::from("high"), Value::from("b")]),
            row([Value::from("low"), Value::from("a")]),
            row([Value::from("low"), Value::from("b")]),
        ]
    );
}

#[test]
fn rejected_activation_is_reconsidered_on_update() {
    let recorder = Recorder::new();
    let mut session = session(vec![item_rule("stocked", &recorder)]);
    session.add_filter(|activation: &Activation| qty(activation) > 0);

    let id = session.insert(item("a", 0)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.update(id, item("a", 5)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.update(id, item("a", 0)).unwrap();
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn rule_filter_only_affects_its_rule() {
    let recorder = Recorder::new();
    let mut session = session(vec![
        item_rule("first", &recorder),
        item_rule("second", &recorder),
    ]);
    session.add_rule_filter("first", |_: &Activation| false);
    session.insert(item("a", 1)).unwrap();

    session.fire().unwrap();
    assert_eq!(
        recorder.take(),
        vec![row([Value::from("second"), Value::from("a")])]
    );
}

#[test]
fn deactivation_actions_see_the_retracted_match() {
    let recorder = Recorder::new();
    let rule = RuleDefinition::new("tracked")
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(
            recorder
                .firing()
                .on(ActionTrigger::ACTIVATED | ActionTrigger::DEACTIVATED),
        )
        .with_action(
            recorder
                .action(vec![Expr::var("i").field("name")])
                .on(ActionTrigger::DEACTIVATED),
        );
    let mut session = session(vec![rule]);

    let id = session.insert(item("a", 1)).unwrap();
    session.fire().unwrap();
    session.retract(id).unwrap();
    assert_eq!(session.agenda_len(), 1);
    assert_eq!(session.fire().unwrap().fired, 1);
    assert_eq!(
        recorder.take(),
        vec![
            row([Value::from("tracked"), Value::from("Activated")]),
            row([Value::from("tracked"), Value::from("Deactivated")]),
            row([Value::from("a")]),
        ]
    );
}

#[test]
fn retracting_an_unfired_match_queues_no_deactivation() {
    let recorder = Recorder::new();
    let rule = RuleDefinition::new("tracked")
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(recorder.firing().on(ActionTrigger::DEACTIVATED));
    let mut session = session(vec![rule]);

    let id = session.insert(item("a", 1)).unwrap();
    session.retract(id).unwrap();
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn update_after_firing_reactivates() {
    let recorder = Recorder::new();
    let rule = RuleDefinition::new("watch")
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(recorder.firing());
    let mut session = session(vec![rule]);

    let id = session.insert(item("a", 1)).unwrap();
    // Updating a queued activation keeps a single entry.
    session.update(id, item("a", 2)).unwrap();
    session.fire().unwrap();
    session.update(id, item("a", 3)).unwrap();
    session.fire().unwrap();
    assert_eq!(
        recorder.take(),
        vec![
            row([Value::from("watch"), Value::from("Activated")]),
            row([Value::from("watch"), Value::from("Reactivated")]),
        ]
    );
}

#[test]
fn halt_stops_after_the_current_activation() {
    let halting = RuleDefinition::new("stop")
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(ActionElement::new(ActionBody::Invoke {
            function: ActionFn::new(|context, _, _| {
                context.halt();
                Ok(())
            }),
            args: Vec::new(),
            dependencies: Vec::new(),
        }));
    let mut session = session(vec![halting]);
    session
        .insert_all([item("a", 1), item("b", 1), item("c", 1)])
        .unwrap();

    let summary = session.fire().unwrap();
    assert_eq!(summary.fired, 1);
    assert!(summary.halted);
    assert_eq!(session.agenda_len(), 2);

    // The next call starts over.
    assert_eq!(session.fire().unwrap().fired, 1);
}

fn touch_rule(repeatability: Repeatability) -> RuleDefinition {
    RuleDefinition::new("touch")
        .with_repeatability(repeatability)
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(ActionElement::new(ActionBody::Update {
            target: "i".into(),
            value: Expr::var("i"),
        }))
}

#[test]
fn repeatable_self_update_trips_the_kill_switch() {
    let network = Arc::new(Network::compile([touch_rule(Repeatability::Repeatable)]).unwrap());
    let mut session =
        Session::with_config(network, SessionConfig::new().with_max_fires(20)).unwrap();
    session.insert(item("a", 1)).unwrap();

    let err = session.fire().unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::LimitExceeded(SemanticLimit::MaxActivations { limit: 20, .. })
    ));
}

#[test]
fn non_repeatable_self_update_fires_once() {
    let network = Arc::new(Network::compile([touch_rule(Repeatability::NonRepeatable)]).unwrap());
    let mut session =
        Session::with_config(network, SessionConfig::new().with_max_fires(20)).unwrap();
    session.insert(item("a", 1)).unwrap();

    assert_eq!(session.fire().unwrap().fired, 1);
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn fire_limit_leaves_the_rest_queued() {
    let recorder = Recorder::new();
    let mut session = session(vec![item_rule("seen", &recorder)]);
    session
        .insert_all([item("a", 1), item("b", 1), item("c", 1)])
        .unwrap();

    let summary = session.fire_limit(2).unwrap();
    assert_eq!(summary.fired, 2);
    assert!(!summary.halted);
    assert_eq!(session.agenda_len(), 1);
}
