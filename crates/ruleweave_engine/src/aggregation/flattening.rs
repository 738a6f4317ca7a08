//! One aggregate per element of a list-valued expression.

use ruleweave_foundation::{Error, FactId, Result, Type, Value};

use super::{
    AggregateExpression, AggregateFact, AggregationResult, Aggregator, ensure_tracked,
    ensure_untracked,
};
use crate::tuple::TupleView;

/// Flattens a list-valued selector so each element is its own aggregate.
///
/// Adding a fact yields one `Added` result per element. Modifying it removes
/// every element it produced before and adds every element it produces now.
/// Removing it yields one `Removed` result per element.
#[derive(Clone, Debug)]
pub struct FlatteningAggregator {
    selector: AggregateExpression,
    sources: Vec<(FactId, Vec<Value>)>,
}

impl FlatteningAggregator {
    /// Creates an aggregator flattening `selector`.
    #[must_use]
    pub fn new(selector: AggregateExpression) -> Self {
        Self {
            selector,
            sources: Vec::new(),
        }
    }

    fn tracks(&self, id: FactId) -> bool {
        self.sources.iter().any(|(tracked, _)| *tracked == id)
    }

    fn elements(&self, fact: &AggregateFact<'_>) -> Result<Vec<Value>> {
        match self.selector.invoke(fact)? {
            Value::List(items) => Ok(items.into_iter().collect()),
            Value::Nil => Ok(Vec::new()),
            other => Err(Error::type_mismatch(Type::List, other.value_type())),
        }
    }

    fn take(&mut self, id: FactId) -> Vec<Value> {
        match self.sources.iter().position(|(tracked, _)| *tracked == id) {
            Some(index) => self.sources.remove(index).1,
            None => Vec::new(),
        }
    }
}

fn added(id: FactId, elements: &[Value]) -> impl Iterator<Item = AggregationResult> + '_ {
    elements
        .iter()
        .map(move |v| AggregationResult::added(v.clone()).with_source([id]))
}

fn removed(id: FactId, elements: Vec<Value>) -> impl Iterator<Item = AggregationResult> {
    elements
        .into_iter()
        .map(move |v| AggregationResult::removed(v).with_source([id]))
}

impl Aggregator for FlatteningAggregator {
    fn add(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_untracked(facts, |id| self.tracks(id))?;
        let evaluated = facts
            .iter()
            .map(|f| self.elements(f).map(|e| (f.id, e)))
            .collect::<Result<Vec<_>>>()?;

        let mut results = Vec::new();
        for (id, elements) in evaluated {
            results.extend(added(id, &elements));
            self.sources.push((id, elements));
        }
        Ok(results)
    }

    fn modify(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.tracks(id))?;
        let evaluated = facts
            .iter()
            .map(|f| self.elements(f).map(|e| (f.id, e)))
            .collect::<Result<Vec<_>>>()?;

        let mut results = Vec::new();
        for (id, elements) in evaluated {
            let index = self
                .sources
                .iter()
                .position(|(tracked, _)| *tracked == id)
                .ok_or_else(|| Error::aggregate_fact_not_found(id))?;
            let previous = std::mem::replace(&mut self.sources[index].1, elements);
            results.extend(removed(id, previous));
            results.extend(added(id, &self.sources[index].1));
        }
        Ok(results)
    }

    fn remove(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.tracks(id))?;
        let mut results = Vec::new();
        for fact in facts {
            let previous = self.take(fact.id);
            results.extend(removed(fact.id, previous));
        }
        Ok(results)
    }

    fn aggregates(&self) -> Vec<Value> {
        self.sources
            .iter()
            .flat_map(|(_, elements)| elements.iter().cloned())
            .collect()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::aggregation::AggregationAction;
    use crate::aggregation::testing::batch;
    use crate::tuple::EmptyTuple;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    enum Op {
        Add(u64, Vec<i64>),
        Modify(u64, Vec<i64>),
        Remove(u64),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        let values = || prop::collection::vec(0i64..5, 0..4);
        prop_oneof![
            (0u64..6, values()).prop_map(|(id, v)| Op::Add(id, v)),
            (0u64..6, values()).prop_map(|(id, v)| Op::Modify(id, v)),
            (0u64..6).prop_map(Op::Remove),
        ]
    }

    fn list(values: &[i64]) -> Value {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    fn sorted(mut values: Vec<Value>) -> Vec<Value> {
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values
    }

    proptest! {
        #[test]
        fn only_tracked_facts_accept_modify_and_remove(ops in prop::collection::vec(arb_op(), 0..40)) {
            let mut target = FlatteningAggregator::new(AggregateExpression::from_fn("selector", |v| Ok(v.clone())));
            let mut tracked: Vec<u64> = Vec::new();

            for op in ops {
                let (id, ok) = match &op {
                    Op::Add(id, values) => (*id, target.add(&EmptyTuple, &batch(&[(*id, list(values))])).is_ok()),
                    Op::Modify(id, values) => (*id, target.modify(&EmptyTuple, &batch(&[(*id, list(values))])).is_ok()),
                    Op::Remove(id) => (*id, target.remove(&EmptyTuple, &batch(&[(*id, Value::Nil)])).is_ok()),
                };
                let was_tracked = tracked.contains(&id);
                match op {
                    Op::Add(..) => {
                        prop_assert_eq!(ok, !was_tracked);
                        if ok {
                            tracked.push(id);
                        }
                    }
                    Op::Modify(..) => prop_assert_eq!(ok, was_tracked),
                    Op::Remove(_) => {
                        prop_assert_eq!(ok, was_tracked);
                        tracked.retain(|t| *t != id);
                    }
                }
            }

            for id in tracked {
                prop_assert!(target.remove(&EmptyTuple, &batch(&[(id, Value::Nil)])).is_ok());
            }
            prop_assert!(target.aggregates().is_empty());
        }

        #[test]
        fn results_replay_to_aggregates(ops in prop::collection::vec(arb_op(), 0..40)) {
            let mut target = FlatteningAggregator::new(AggregateExpression::from_fn("selector", |v| Ok(v.clone())));
            let mut live: Vec<Value> = Vec::new();

            for op in ops {
                let outcome = match &op {
                    Op::Add(id, values) => target.add(&EmptyTuple, &batch(&[(*id, list(values))])),
                    Op::Modify(id, values) => target.modify(&EmptyTuple, &batch(&[(*id, list(values))])),
                    Op::Remove(id) => target.remove(&EmptyTuple, &batch(&[(*id, Value::Nil)])),
                };
                let Ok(results) = outcome else { continue };
                for result in results {
                    match result.action {
                        AggregationAction::Added => live.push(result.aggregate),
                        AggregationAction::Removed => {
                            let index = live.iter().position(|v| *v == result.aggregate);
                            prop_assert!(index.is_some());
                            if let Some(index) = index {
                                live.remove(index);
                            }
                        }
                        AggregationAction::Modified => prop_assert!(false, "flattening never modifies"),
                    }
                }
                prop_assert_eq!(sorted(live.clone()), sorted(target.aggregates()));
            }
        }
    }
}
