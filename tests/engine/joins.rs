//! Tests for pattern selection and joins between patterns.

use ruleweave_foundation::Value;
use ruleweave_model::{Expr, RuleDefinition, RuleElement};

use crate::common::{Recorder, customer, order, pattern, row, same_customer, session};

fn customer_orders(recorder: &Recorder) -> RuleDefinition {
    RuleDefinition::new("customer-order")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Pattern(
            pattern("o", "Order").with_condition(same_customer()),
        ))
        .with_action(recorder.action(vec![
            Expr::var("c").field("name"),
            Expr::var("o").field("id"),
        ]))
}

#[test]
fn join_fires_each_match_in_arrival_order() {
    let recorder = Recorder::new();
    let mut session = session(vec![customer_orders(&recorder)]);
    session.insert(customer("alice")).unwrap();
    session.insert(customer("bob")).unwrap();
    session.insert(order(1, "alice", 10)).unwrap();
    session.insert(order(2, "bob", 20)).unwrap();
    session.insert(order(3, "alice", 30)).unwrap();
    session.insert(order(4, "carol", 40)).unwrap();

    assert_eq!(session.agenda_len(), 3);
    let summary = session.fire().unwrap();
    assert_eq!(summary.fired, 3);
    assert_eq!(
        recorder.take(),
        vec![
            row([Value::from("alice"), Value::Int(1)]),
            row([Value::from("bob"), Value::Int(2)]),
            row([Value::from("alice"), Value::Int(3)]),
        ]
    );
}

#[test]
fn join_works_in_either_insertion_order() {
    let recorder = Recorder::new();
    let mut session = session(vec![customer_orders(&recorder)]);
    session.insert(order(1, "alice", 10)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.insert(customer("alice")).unwrap();
    assert_eq!(session.agenda_len(), 1);
}

#[test]
fn retracting_a_customer_drops_its_matches() {
    let recorder = Recorder::new();
    let mut session = session(vec![customer_orders(&recorder)]);
    let alice = session.insert(customer("alice")).unwrap();
    session.insert(customer("bob")).unwrap();
    session.insert(order(1, "alice", 10)).unwrap();
    session.insert(order(2, "bob", 20)).unwrap();
    session.insert(order(3, "alice", 30)).unwrap();

    session.retract(alice).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.fire().unwrap();
    assert_eq!(
        recorder.take(),
        vec![row([Value::from("bob"), Value::Int(2)])]
    );
}

#[test]
fn update_moves_an_order_between_customers() {
    let recorder = Recorder::new();
    let mut session = session(vec![customer_orders(&recorder)]);
    session.insert(customer("alice")).unwrap();
    session.insert(customer("bob")).unwrap();
    let id = session.insert(order(1, "alice", 10)).unwrap();

    session.update(id, order(1, "bob", 10)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    let activation = session.activations().next().unwrap();
    assert_eq!(activation.value("c"), Some(customer("bob")));
    assert_eq!(activation.fact("o"), Some(id));
}

#[test]
fn update_across_a_selection_creates_and_removes_matches() {
    let recorder = Recorder::new();
    let large = RuleDefinition::new("large-order")
        .with_element(RuleElement::Pattern(
            pattern("o", "Order")
                .with_condition(Expr::var("o").field("amount").greater_than(Expr::lit(100))),
        ))
        .with_action(recorder.action(vec![Expr::var("o").field("amount")]));
    let mut session = session(vec![large]);

    let id = session.insert(order(1, "alice", 50)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.update(id, order(1, "alice", 150)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.update(id, order(1, "alice", 20)).unwrap();
    assert_eq!(session.agenda_len(), 0);

    session.update(id, order(1, "alice", 200)).unwrap();
    session.fire().unwrap();
    assert_eq!(recorder.take(), vec![row([Value::Int(200)])]);
}

#[test]
fn updating_a_retracted_fact_fails() {
    let mut session = session(Vec::new());
    let id = session.insert(customer("alice")).unwrap();
    session.retract(id).unwrap();
    assert!(!session.contains(id));
    assert!(session.update(id, customer("bob")).is_err());
    assert!(session.retract(id).is_err());
}
