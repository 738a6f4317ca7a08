//! Tests for event listeners and the session event log.

use std::sync::{Arc, Mutex};

use ruleweave_engine::{
    ActivationChange, AggregationAction, Event, EventListener, FactChange, FactBinding, Network,
    Session, SessionConfig, TupleId,
};
use ruleweave_foundation::{FactId, Type, Value};
use ruleweave_model::{
    ActionTrigger, AggregateElement, AggregatorSpec, BinaryOp, Declaration, ElementSource, Expr,
    RuleDefinition, RuleElement,
};

use crate::common::{Recorder, customer, item, order, pattern, same_customer};

/// Writes one line per event it hears.
#[derive(Clone, Default)]
struct Transcript {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Transcript {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap())
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl EventListener for Transcript {
    fn on_fact(&mut self, change: FactChange, _fact: FactId, _value: &Value) {
        self.push(format!("fact {change:?}"));
    }

    fn on_activation(&mut self, change: ActivationChange, rule: &str, _tuple: TupleId) {
        self.push(format!("activation {change:?} {rule}"));
    }

    fn on_rule_fired(&mut self, rule: &str, trigger: ActionTrigger, facts: &[FactBinding]) {
        self.push(format!("fired {rule} {trigger:?} with {}", facts.len()));
    }

    fn on_condition_failed(&mut self, _message: &str) {
        self.push("condition failed".to_string());
    }
}

fn summarize(event: &Event) -> String {
    match event {
        Event::Fact { change, .. } => format!("fact {change:?}"),
        Event::Activation { change, rule, .. } => format!("activation {change:?} {rule}"),
        Event::RuleFired { rule, .. } => format!("fired {rule}"),
        Event::Aggregation { action, value } => format!("aggregation {action:?} {value}"),
        Event::ConditionFailed { .. } => "condition failed".to_string(),
    }
}

fn seen_rule() -> RuleDefinition {
    RuleDefinition::new("seen")
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(Recorder::new().firing())
}

#[test]
fn listener_hears_propagation_before_the_fact_change() {
    let transcript = Transcript::default();
    let network = Arc::new(Network::compile([seen_rule()]).unwrap());
    let mut session = Session::new(network).unwrap();
    session.add_listener(transcript.clone());

    let id = session.insert(item("a", 1)).unwrap();
    session.fire().unwrap();
    session.retract(id).unwrap();
    assert_eq!(
        transcript.take(),
        vec![
            "activation Created seen",
            "fact Inserted",
            "fired seen Activated with 1",
            "activation Deleted seen",
            "fact Retracted",
        ]
    );
}

#[test]
fn event_log_records_aggregation_results() {
    let counted = RuleDefinition::new("order-count")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Aggregate(AggregateElement::new(
            Declaration::new("n", Type::Int),
            ElementSource::Pattern(pattern("o", "Order").with_condition(same_customer())),
            AggregatorSpec::Count,
        )))
        .with_action(Recorder::new().firing());
    let network = Arc::new(Network::compile([counted]).unwrap());
    let mut session = Session::with_config(network, SessionConfig::recording(64)).unwrap();

    session.insert(customer("alice")).unwrap();
    session.insert(order(1, "alice", 10)).unwrap();
    let events: Vec<String> = session.events().events().map(summarize).collect();
    assert_eq!(
        events,
        vec![
            "aggregation Added 0",
            "activation Created order-count",
            "fact Inserted",
            "aggregation Modified 1",
            "activation Updated order-count",
            "fact Inserted",
        ]
    );
    assert!(session.events().iter().any(|record| matches!(
        record.event,
        Event::Aggregation {
            action: AggregationAction::Modified,
            ..
        }
    )));

    session.clear_events();
    assert!(session.events().is_empty());
}

#[test]
fn event_log_keeps_only_the_latest_records() {
    let network = Arc::new(Network::compile(Vec::<RuleDefinition>::new()).unwrap());
    let mut session = Session::with_config(network, SessionConfig::recording(2)).unwrap();
    session
        .insert_all([item("a", 1), item("b", 1), item("c", 1)])
        .unwrap();

    let ids: Vec<u64> = session.events().iter().map(|record| record.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn failing_condition_is_reported_not_raised() {
    let transcript = Transcript::default();
    let divided = RuleDefinition::new("divided")
        .with_element(RuleElement::Pattern(pattern("i", "Item").with_condition(
            Expr::var("i")
                .field("qty")
                .binary(BinaryOp::Div, Expr::lit(0))
                .greater_than(Expr::lit(1)),
        )))
        .with_action(Recorder::new().firing());
    let network = Arc::new(Network::compile([divided]).unwrap());
    let mut session = Session::new(network).unwrap();
    session.add_listener(transcript.clone());

    session.insert(item("a", 4)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    assert_eq!(transcript.take(), vec!["condition failed", "fact Inserted"]);
}
