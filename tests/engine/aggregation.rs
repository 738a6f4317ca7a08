//! Tests for aggregate elements: built-in and custom aggregators.

use std::collections::BTreeMap;
use std::sync::Arc;

use ruleweave_engine::{
    AggregateExpression, AggregateExpressions, AggregateFact, AggregationResult, Aggregator,
    NetworkBuilder, Session, TupleView,
};
use ruleweave_foundation::{Error, FactId, Record, Result, Type, Value};
use ruleweave_model::{
    AggregateElement, AggregatorSpec, Declaration, ElementSource, Expr, RuleDefinition,
    RuleElement,
};

use crate::common::{Recorder, customer, item, order, pattern, row, same_customer, session};

fn list(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().collect()
}

fn orders_of_customer() -> ElementSource {
    ElementSource::Pattern(pattern("o", "Order").with_condition(same_customer()))
}

#[test]
fn count_starts_at_zero_and_follows_inserts() {
    let recorder = Recorder::new();
    let counted = RuleDefinition::new("order-count")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Aggregate(AggregateElement::new(
            Declaration::new("n", Type::Int),
            orders_of_customer(),
            AggregatorSpec::Count,
        )))
        .with_action(recorder.action(vec![Expr::var("c").field("name"), Expr::var("n")]));
    let mut session = session(vec![counted]);

    session.insert(customer("alice")).unwrap();
    assert_eq!(session.agenda_len(), 1);
    assert_eq!(
        session.activations().next().unwrap().value("n"),
        Some(Value::Int(0))
    );

    session.insert(order(1, "alice", 10)).unwrap();
    session.insert(order(2, "bob", 10)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.fire().unwrap();
    assert_eq!(
        recorder.take(),
        vec![row([Value::from("alice"), Value::Int(1)])]
    );
}

#[test]
fn sum_with_a_threshold_tracks_updates_and_retractions() {
    let recorder = Recorder::new();
    let big_spender = RuleDefinition::new("big-spender")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Aggregate(
            AggregateElement::new(
                Declaration::new("total", Type::Int),
                orders_of_customer(),
                AggregatorSpec::Sum(Expr::var("o").field("amount")),
            )
            .with_condition(Expr::var("total").greater_than(Expr::lit(100))),
        ))
        .with_action(recorder.action(vec![Expr::var("total")]));
    let mut session = session(vec![big_spender]);

    session.insert(customer("alice")).unwrap();
    let first = session.insert(order(1, "alice", 60)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    let second = session.insert(order(2, "alice", 70)).unwrap();
    assert_eq!(session.agenda_len(), 1);

    session.update(second, order(2, "alice", 30)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.update(second, order(2, "alice", 50)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    assert_eq!(
        session.activations().next().unwrap().value("total"),
        Some(Value::Int(110))
    );

    session.retract(first).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.insert(order(3, "alice", 100)).unwrap();
    session.fire().unwrap();
    assert_eq!(recorder.take(), vec![row([Value::Int(150)])]);
}

#[test]
fn collect_matches_before_any_fact_exists() {
    let recorder = Recorder::new();
    let inventory = RuleDefinition::new("inventory")
        .with_element(RuleElement::Aggregate(AggregateElement::new(
            Declaration::new("items", Type::List),
            ElementSource::Pattern(pattern("i", "Item")),
            AggregatorSpec::Collect,
        )))
        .with_action(recorder.action(vec![Expr::var("items")]));
    let mut session = session(vec![inventory]);
    assert_eq!(session.agenda_len(), 1);

    session.insert(item("apple", 3)).unwrap();
    session.insert(item("pear", 1)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.fire().unwrap();
    assert_eq!(
        recorder.take(),
        vec![row([list([item("apple", 3), item("pear", 1)])])]
    );
}

#[test]
fn group_by_matches_once_per_key() {
    let recorder = Recorder::new();
    let per_customer = RuleDefinition::new("per-customer")
        .with_element(RuleElement::Aggregate(AggregateElement::new(
            Declaration::new("g", Type::record("Group")),
            ElementSource::Pattern(pattern("o", "Order")),
            AggregatorSpec::GroupBy {
                key: Expr::var("o").field("customer"),
                element: Expr::var("o").field("amount"),
            },
        )))
        .with_action(recorder.action(vec![
            Expr::var("g").field("key"),
            Expr::var("g").field("elements"),
        ]));
    let mut session = session(vec![per_customer]);
    assert_eq!(session.agenda_len(), 0);

    session.insert(order(1, "alice", 10)).unwrap();
    let bobs = session.insert(order(2, "bob", 20)).unwrap();
    session.insert(order(3, "alice", 5)).unwrap();
    assert_eq!(session.agenda_len(), 2);

    session.retract(bobs).unwrap();
    assert_eq!(session.agenda_len(), 1);
    let group = session.activations().next().unwrap().value("g");
    assert_eq!(
        group,
        Some(Value::Record(
            Record::new("Group")
                .with("key", "alice")
                .with("elements", list([Value::Int(10), Value::Int(5)])),
        ))
    );

    session.fire().unwrap();
    assert_eq!(
        recorder.take(),
        vec![row([
            Value::from("alice"),
            list([Value::Int(10), Value::Int(5)])
        ])]
    );
}

#[test]
fn flatten_matches_once_per_element() {
    let recorder = Recorder::new();
    let tags = RuleDefinition::new("tag")
        .with_element(RuleElement::Aggregate(AggregateElement::new(
            Declaration::new("tag", Type::String),
            ElementSource::Pattern(pattern("o", "Order")),
            AggregatorSpec::Flatten(Expr::var("o").field("tags")),
        )))
        .with_action(recorder.action(vec![Expr::var("tag")]));
    let mut session = session(vec![tags]);

    let tagged = Value::Record(
        Record::new("Order").with("tags", list([Value::from("rush"), Value::from("gift")])),
    );
    let id = session.insert(tagged).unwrap();
    assert_eq!(session.agenda_len(), 2);
    session.retract(id).unwrap();
    assert_eq!(session.agenda_len(), 0);

    session
        .insert(Value::Record(
            Record::new("Order").with("tags", list([Value::from("bulk")])),
        ))
        .unwrap();
    session.fire().unwrap();
    assert_eq!(recorder.take(), vec![row([Value::from("bulk")])]);
}

#[test]
fn flatten_keeps_equal_elements_of_different_facts_apart() {
    let recorder = Recorder::new();
    let tags = RuleDefinition::new("tag")
        .with_element(RuleElement::Aggregate(AggregateElement::new(
            Declaration::new("tag", Type::String),
            ElementSource::Pattern(pattern("o", "Order")),
            AggregatorSpec::Flatten(Expr::var("o").field("tags")),
        )))
        .with_action(recorder.action(vec![Expr::var("tag")]));
    let mut session = session(vec![tags]);
    let tagged = || Value::Record(Record::new("Order").with("tags", list([Value::from("x")])));

    session.insert(tagged()).unwrap();
    let second = session.insert(tagged()).unwrap();
    assert_eq!(session.agenda_len(), 2);
    assert_eq!(session.fire_limit(1).unwrap().fired, 1);

    // The first order's match already fired and must stay retired.
    session.retract(second).unwrap();
    assert_eq!(session.agenda_len(), 0);
    assert_eq!(session.fire().unwrap().fired, 0);
    assert_eq!(recorder.take(), vec![row([Value::from("x")])]);
}

#[test]
fn failing_selector_leaves_the_fact_out_of_the_aggregate() {
    let total = RuleDefinition::new("total")
        .with_element(RuleElement::Aggregate(AggregateElement::new(
            Declaration::new("total", Type::Int),
            ElementSource::Pattern(pattern("o", "Order")),
            AggregatorSpec::Sum(Expr::var("o").field("amount")),
        )))
        .with_action(Recorder::new().action(vec![Expr::var("total")]));
    let mut session = session(vec![total]);
    let current = |session: &Session| session.activations().next().unwrap().value("total");
    let broken = || Value::Record(Record::new("Order").with("amount", "oops"));

    session.insert(order(1, "alice", 10)).unwrap();
    let odd = session.insert(broken()).unwrap();
    assert_eq!(session.fact_count(), 2);
    assert_eq!(current(&session), Some(Value::Int(10)));

    session.update(odd, order(2, "alice", 5)).unwrap();
    assert_eq!(current(&session), Some(Value::Int(15)));

    session.update(odd, broken()).unwrap();
    assert_eq!(current(&session), Some(Value::Int(10)));

    session.retract(odd).unwrap();
    assert_eq!(session.fact_count(), 1);
    assert_eq!(current(&session), Some(Value::Int(10)));
}

// =============================================================================
// Custom Aggregator
// =============================================================================

/// Largest integer seen, absent while nothing matches.
struct MaxAggregator {
    selector: AggregateExpression,
    values: BTreeMap<FactId, i64>,
    current: Option<Value>,
}

impl MaxAggregator {
    fn settle(&mut self) -> Vec<AggregationResult> {
        let next = self.values.values().max().copied().map(Value::Int);
        let result = match (self.current.take(), next.clone()) {
            (None, None) => None,
            (None, Some(value)) => Some(AggregationResult::added(value)),
            (Some(previous), Some(value)) => Some(AggregationResult::modified(value, previous)),
            (Some(previous), None) => Some(AggregationResult::removed(previous)),
        };
        self.current = next;
        result.into_iter().collect()
    }

    fn record(&mut self, facts: &[AggregateFact<'_>]) -> Result<()> {
        for fact in facts {
            match self.selector.invoke(fact)? {
                Value::Int(n) => {
                    self.values.insert(fact.id, n);
                }
                other => return Err(Error::type_mismatch(Type::Int, other.value_type())),
            }
        }
        Ok(())
    }
}

impl Aggregator for MaxAggregator {
    fn add(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        self.record(facts)?;
        Ok(self.settle())
    }

    fn modify(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        self.record(facts)?;
        Ok(self.settle())
    }

    fn remove(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        for fact in facts {
            self.values.remove(&fact.id);
        }
        Ok(self.settle())
    }

    fn aggregates(&self) -> Vec<Value> {
        self.current.iter().cloned().collect()
    }
}

fn max_aggregator(expressions: &AggregateExpressions) -> Result<Box<dyn Aggregator>> {
    Ok(Box::new(MaxAggregator {
        selector: expressions.get("value")?.clone(),
        values: BTreeMap::new(),
        current: None,
    }))
}

fn largest_order_rule(recorder: &Recorder) -> RuleDefinition {
    RuleDefinition::new("largest-order")
        .with_element(RuleElement::Aggregate(AggregateElement::new(
            Declaration::new("top", Type::Int),
            ElementSource::Pattern(pattern("o", "Order")),
            AggregatorSpec::Custom {
                name: "max".into(),
                expressions: vec![("value".into(), Expr::var("o").field("amount"))],
            },
        )))
        .with_action(recorder.action(vec![Expr::var("top")]))
}

#[test]
fn custom_aggregator_is_resolved_by_name() {
    let recorder = Recorder::new();
    let mut builder = NetworkBuilder::new().with_aggregator("max", max_aggregator);
    builder.add_rule(largest_order_rule(&recorder)).unwrap();
    let mut session = Session::new(Arc::new(builder.build())).unwrap();
    assert_eq!(session.agenda_len(), 0);

    session.insert(order(1, "alice", 10)).unwrap();
    let largest = session.insert(order(2, "alice", 30)).unwrap();
    session.insert(order(3, "bob", 20)).unwrap();
    assert_eq!(
        session.activations().next().unwrap().value("top"),
        Some(Value::Int(30))
    );

    session.retract(largest).unwrap();
    session.fire().unwrap();
    assert_eq!(recorder.take(), vec![row([Value::Int(20)])]);
}

#[test]
fn unregistered_custom_aggregator_fails_to_compile() {
    let recorder = Recorder::new();
    let mut builder = NetworkBuilder::new();
    assert!(builder.add_rule(largest_order_rule(&recorder)).is_err());
}
