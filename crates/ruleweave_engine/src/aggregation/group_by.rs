//! One aggregate per distinct key.

use std::collections::HashMap;

use ruleweave_foundation::{FactId, Record, Result, Value};

use super::{
    AggregateExpression, AggregateFact, AggregationResult, Aggregator, ensure_tracked,
    ensure_untracked,
};
use crate::tuple::TupleView;

/// Record type name of group values.
pub const GROUP_TYPE: &str = "Group";

#[derive(Clone, Debug)]
struct Group {
    key: Value,
    elements: Vec<(FactId, Value)>,
    emitted: Option<Value>,
}

impl Group {
    fn value(&self) -> Value {
        let elements: Value = self.elements.iter().map(|(_, v)| v.clone()).collect();
        Value::Record(
            Record::new(GROUP_TYPE)
                .with("key", self.key.clone())
                .with("elements", elements),
        )
    }
}

/// Partitions facts by a key expression.
///
/// Each group is a `Group` record with a `key` field and an `elements` list
/// holding the element expression of every fact in the group, in the order
/// the facts joined it. A group appears when its first fact arrives and
/// disappears with its last one.
#[derive(Clone, Debug)]
pub struct GroupByAggregator {
    key: AggregateExpression,
    element: AggregateExpression,
    groups: Vec<Group>,
    keys: HashMap<FactId, Value>,
}

impl GroupByAggregator {
    /// Creates an aggregator grouping by `key`, collecting `element`.
    #[must_use]
    pub fn new(key: AggregateExpression, element: AggregateExpression) -> Self {
        Self {
            key,
            element,
            groups: Vec::new(),
            keys: HashMap::new(),
        }
    }

    fn group_index(&self, key: &Value) -> Option<usize> {
        self.groups.iter().position(|g| g.key == *key)
    }

    fn evaluate(&self, facts: &[AggregateFact<'_>]) -> Result<Vec<(FactId, Value, Value)>> {
        facts
            .iter()
            .map(|f| Ok((f.id, self.key.invoke(f)?, self.element.invoke(f)?)))
            .collect()
    }

    fn insert(&mut self, id: FactId, key: Value, element: Value, touched: &mut Vec<Value>) {
        let index = match self.group_index(&key) {
            Some(index) => index,
            None => {
                self.groups.push(Group {
                    key: key.clone(),
                    elements: Vec::new(),
                    emitted: None,
                });
                self.groups.len() - 1
            }
        };
        self.groups[index].elements.push((id, element));
        self.keys.insert(id, key.clone());
        touch(touched, key);
    }

    fn detach(&mut self, id: FactId, touched: &mut Vec<Value>) {
        let Some(key) = self.keys.remove(&id) else {
            return;
        };
        if let Some(index) = self.group_index(&key) {
            self.groups[index].elements.retain(|(fact, _)| *fact != id);
        }
        touch(touched, key);
    }

    /// Turns the groups touched by a batch into results, in touch order.
    fn settle(&mut self, touched: Vec<Value>) -> Vec<AggregationResult> {
        let mut results = Vec::new();
        for key in touched {
            let Some(index) = self.group_index(&key) else {
                continue;
            };
            let group = &mut self.groups[index];
            let source: Vec<FactId> = group.elements.iter().map(|(id, _)| *id).collect();
            if group.elements.is_empty() {
                if let Some(previous) = group.emitted.take() {
                    results.push(AggregationResult::removed(previous));
                }
                self.groups.remove(index);
                continue;
            }
            let value = group.value();
            let result = match group.emitted.replace(value.clone()) {
                None => AggregationResult::added(value),
                Some(previous) => AggregationResult::modified(value, previous),
            };
            results.push(result.with_source(source));
        }
        results
    }
}

fn touch(touched: &mut Vec<Value>, key: Value) {
    if !touched.contains(&key) {
        touched.push(key);
    }
}

impl Aggregator for GroupByAggregator {
    fn add(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_untracked(facts, |id| self.keys.contains_key(&id))?;
        let evaluated = self.evaluate(facts)?;
        let mut touched = Vec::new();
        for (id, key, element) in evaluated {
            self.insert(id, key, element, &mut touched);
        }
        Ok(self.settle(touched))
    }

    fn modify(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.keys.contains_key(&id))?;
        let evaluated = self.evaluate(facts)?;
        let mut touched = Vec::new();
        for (id, key, element) in evaluated {
            if self.keys.get(&id) == Some(&key) {
                if let Some(index) = self.group_index(&key) {
                    if let Some(entry) = self.groups[index]
                        .elements
                        .iter_mut()
                        .find(|(fact, _)| *fact == id)
                    {
                        entry.1 = element;
                    }
                }
                touch(&mut touched, key);
            } else {
                self.detach(id, &mut touched);
                self.insert(id, key, element, &mut touched);
            }
        }
        Ok(self.settle(touched))
    }

    fn remove(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.keys.contains_key(&id))?;
        let mut touched = Vec::new();
        for fact in facts {
            self.detach(fact.id, &mut touched);
        }
        Ok(self.settle(touched))
    }

    fn aggregates(&self) -> Vec<Value> {
        self.groups.iter().filter_map(|g| g.emitted.clone()).collect()
    }
}
