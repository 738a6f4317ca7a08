//! Tests for negation and existential quantification.

use ruleweave_foundation::{Record, Value};
use ruleweave_model::{ElementSource, Expr, RuleDefinition, RuleElement};

use crate::common::{Recorder, customer, order, pattern, row, same_customer, session};

fn payment(order: i64) -> Value {
    Value::Record(Record::new("Payment").with("order", order))
}

#[test]
fn not_matches_until_a_blocker_arrives() {
    let recorder = Recorder::new();
    let idle = RuleDefinition::new("idle-customer")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Not(ElementSource::Pattern(
            pattern("o", "Order").with_condition(same_customer()),
        )))
        .with_action(recorder.action(vec![Expr::var("c").field("name")]));
    let mut session = session(vec![idle]);

    session.insert(customer("alice")).unwrap();
    assert_eq!(session.agenda_len(), 1);
    let id = session.insert(order(1, "alice", 10)).unwrap();
    assert_eq!(session.agenda_len(), 0);

    // An order for someone else does not block alice.
    session.update(id, order(1, "bob", 10)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.update(id, order(1, "alice", 10)).unwrap();
    assert_eq!(session.agenda_len(), 0);

    session.retract(id).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.fire().unwrap();
    assert_eq!(recorder.take(), vec![row([Value::from("alice")])]);
}

#[test]
fn leading_not_matches_on_an_empty_session() {
    let recorder = Recorder::new();
    let empty = RuleDefinition::new("no-customers")
        .with_element(RuleElement::Not(ElementSource::Pattern(pattern(
            "c", "Customer",
        ))))
        .with_action(recorder.firing());
    let mut session = session(vec![empty]);
    assert_eq!(session.agenda_len(), 1);

    let id = session.insert(customer("alice")).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.retract(id).unwrap();
    assert_eq!(session.fire().unwrap().fired, 1);
}

#[test]
fn exists_matches_once_however_many_facts_match() {
    let recorder = Recorder::new();
    let active = RuleDefinition::new("active-customer")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Exists(ElementSource::Pattern(
            pattern("o", "Order").with_condition(same_customer()),
        )))
        .with_action(recorder.action(vec![Expr::var("c").field("name")]));
    let mut session = session(vec![active]);

    session.insert(customer("alice")).unwrap();
    assert_eq!(session.agenda_len(), 0);
    let first = session.insert(order(1, "alice", 10)).unwrap();
    let second = session.insert(order(2, "alice", 20)).unwrap();
    assert_eq!(session.agenda_len(), 1);

    session.retract(first).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.retract(second).unwrap();
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn not_over_a_group_needs_the_whole_combination() {
    let recorder = Recorder::new();
    let unpaid = RuleDefinition::new("nothing-paid")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Not(ElementSource::Group(vec![
            RuleElement::Pattern(pattern("o", "Order").with_condition(same_customer())),
            RuleElement::Pattern(
                pattern("p", "Payment")
                    .with_condition(Expr::var("p").field("order").equals(Expr::var("o").field("id"))),
            ),
        ])))
        .with_action(recorder.action(vec![Expr::var("c").field("name")]));
    let mut session = session(vec![unpaid]);

    session.insert(customer("alice")).unwrap();
    session.insert(order(1, "alice", 10)).unwrap();
    assert_eq!(session.agenda_len(), 1);

    // A payment for an unknown order completes no combination.
    session.insert(payment(7)).unwrap();
    assert_eq!(session.agenda_len(), 1);

    let paid = session.insert(payment(1)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.retract(paid).unwrap();
    assert_eq!(session.agenda_len(), 1);
}

#[test]
fn exists_over_a_group_keeps_other_customers_apart() {
    let recorder = Recorder::new();
    let paying = RuleDefinition::new("paying-customer")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Exists(ElementSource::Group(vec![
            RuleElement::Pattern(pattern("o", "Order").with_condition(same_customer())),
            RuleElement::Pattern(
                pattern("p", "Payment")
                    .with_condition(Expr::var("p").field("order").equals(Expr::var("o").field("id"))),
            ),
        ])))
        .with_action(recorder.action(vec![Expr::var("c").field("name")]));
    let mut session = session(vec![paying]);

    session.insert(customer("alice")).unwrap();
    session.insert(customer("bob")).unwrap();
    session.insert(order(1, "alice", 10)).unwrap();
    session.insert(order(2, "bob", 20)).unwrap();
    session.insert(payment(2)).unwrap();

    session.fire().unwrap();
    assert_eq!(recorder.take(), vec![row([Value::from("bob")])]);
}
