//! Number of matching facts.

use std::collections::HashSet;

use ruleweave_foundation::{FactId, Result, Value};

use super::{
    AggregateFact, AggregationResult, Aggregator, SingleValue, ensure_tracked, ensure_untracked,
    ids,
};
use crate::tuple::TupleView;

/// Counts the facts in the source.
///
/// Emits `Added` on the first batch, even an empty one, and `Modified` on
/// every later change.
#[derive(Clone, Debug, Default)]
pub struct CountAggregator {
    tracked: HashSet<FactId>,
    state: SingleValue,
}

impl CountAggregator {
    /// Creates an aggregator with a count of zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn count(&self) -> Value {
        Value::Int(i64::try_from(self.tracked.len()).unwrap_or(i64::MAX))
    }
}

impl Aggregator for CountAggregator {
    fn add(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_untracked(facts, |id| self.tracked.contains(&id))?;
        if facts.is_empty() && self.state.is_created() {
            return Ok(Vec::new());
        }
        self.tracked.extend(facts.iter().map(|f| f.id));
        let count = self.count();
        Ok(self.state.emit(count, ids(facts)))
    }

    fn modify(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.tracked.contains(&id))?;
        if facts.is_empty() {
            return Ok(Vec::new());
        }
        let count = self.count();
        Ok(self.state.emit(count, ids(facts)))
    }

    fn remove(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.tracked.contains(&id))?;
        if facts.is_empty() {
            return Ok(Vec::new());
        }
        for fact in facts {
            self.tracked.remove(&fact.id);
        }
        let count = self.count();
        Ok(self.state.emit(count, ids(facts)))
    }

    fn aggregates(&self) -> Vec<Value> {
        self.state.current().cloned().into_iter().collect()
    }
}
