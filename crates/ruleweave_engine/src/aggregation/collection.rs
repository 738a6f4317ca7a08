//! List of matching fact values.

use ruleweave_foundation::{FactId, Result, Value};

use super::{
    AggregateFact, AggregationResult, Aggregator, SingleValue, ensure_tracked, ensure_untracked,
    ids,
};
use crate::tuple::TupleView;

/// Collects fact values into a list, in the order facts were added.
///
/// A modified fact keeps its place in the list.
#[derive(Clone, Debug, Default)]
pub struct CollectionAggregator {
    items: Vec<(FactId, Value)>,
    state: SingleValue,
}

impl CollectionAggregator {
    /// Creates an aggregator with an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tracks(&self, id: FactId) -> bool {
        self.items.iter().any(|(tracked, _)| *tracked == id)
    }

    fn collection(&self) -> Value {
        Value::List(self.items.iter().map(|(_, v)| v.clone()).collect())
    }
}

impl Aggregator for CollectionAggregator {
    fn add(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_untracked(facts, |id| self.tracks(id))?;
        if facts.is_empty() && self.state.is_created() {
            return Ok(Vec::new());
        }
        self.items
            .extend(facts.iter().map(|f| (f.id, f.value.clone())));
        let collection = self.collection();
        Ok(self.state.emit(collection, ids(facts)))
    }

    fn modify(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.tracks(id))?;
        if facts.is_empty() {
            return Ok(Vec::new());
        }
        for fact in facts {
            if let Some(entry) = self.items.iter_mut().find(|(id, _)| *id == fact.id) {
                entry.1 = fact.value.clone();
            }
        }
        let collection = self.collection();
        Ok(self.state.emit(collection, ids(facts)))
    }

    fn remove(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.tracks(id))?;
        if facts.is_empty() {
            return Ok(Vec::new());
        }
        self.items
            .retain(|(id, _)| !facts.iter().any(|f| f.id == *id));
        let collection = self.collection();
        Ok(self.state.emit(collection, ids(facts)))
    }

    fn aggregates(&self) -> Vec<Value> {
        self.state.current().cloned().into_iter().collect()
    }
}
