//! Sum of an expression over matching facts.

use std::collections::BTreeMap;

use ruleweave_foundation::{Error, FactId, Result, Type, Value};

use super::{
    AggregateExpression, AggregateFact, AggregationResult, Aggregator, SingleValue,
    ensure_tracked, ensure_untracked, ids,
};
use crate::tuple::TupleView;

/// Sums a numeric selector.
///
/// The sum stays an integer while every contribution is one. `nil`
/// contributions count as zero.
#[derive(Clone, Debug)]
pub struct SumAggregator {
    selector: AggregateExpression,
    contributions: BTreeMap<FactId, Value>,
    state: SingleValue,
}

impl SumAggregator {
    /// Creates an aggregator summing `selector`.
    #[must_use]
    pub fn new(selector: AggregateExpression) -> Self {
        Self {
            selector,
            contributions: BTreeMap::new(),
            state: SingleValue::default(),
        }
    }

    fn contribution(&self, fact: &AggregateFact<'_>) -> Result<Value> {
        match self.selector.invoke(fact)? {
            Value::Nil => Ok(Value::Int(0)),
            v @ (Value::Int(_) | Value::Float(_)) => Ok(v),
            other => Err(Error::type_mismatch(Type::Float, other.value_type())),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn total(contributions: &BTreeMap<FactId, Value>) -> Result<Value> {
        let mut total = Value::Int(0);
        for value in contributions.values() {
            total = match (total, value) {
                (Value::Int(a), Value::Int(b)) => a
                    .checked_add(*b)
                    .map(Value::Int)
                    .ok_or_else(|| Error::evaluation("integer overflow in sum"))?,
                (Value::Int(a), Value::Float(b)) => Value::Float(a as f64 + b),
                (Value::Float(a), Value::Int(b)) => Value::Float(a + *b as f64),
                (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                (_, other) => return Err(Error::type_mismatch(Type::Float, other.value_type())),
            };
        }
        Ok(total)
    }

    /// Replaces the contributions once their total is known to be valid.
    fn commit(
        &mut self,
        contributions: BTreeMap<FactId, Value>,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        let total = Self::total(&contributions)?;
        self.contributions = contributions;
        Ok(self.state.emit(total, ids(facts)))
    }

    fn evaluate(&self, facts: &[AggregateFact<'_>]) -> Result<Vec<(FactId, Value)>> {
        facts
            .iter()
            .map(|f| self.contribution(f).map(|v| (f.id, v)))
            .collect()
    }
}

impl Aggregator for SumAggregator {
    fn add(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_untracked(facts, |id| self.contributions.contains_key(&id))?;
        if facts.is_empty() && self.state.is_created() {
            return Ok(Vec::new());
        }
        let mut contributions = self.contributions.clone();
        contributions.extend(self.evaluate(facts)?);
        self.commit(contributions, facts)
    }

    fn modify(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.contributions.contains_key(&id))?;
        if facts.is_empty() {
            return Ok(Vec::new());
        }
        let mut contributions = self.contributions.clone();
        contributions.extend(self.evaluate(facts)?);
        self.commit(contributions, facts)
    }

    fn remove(
        &mut self,
        _context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>> {
        ensure_tracked(facts, |id| self.contributions.contains_key(&id))?;
        if facts.is_empty() {
            return Ok(Vec::new());
        }
        let mut contributions = self.contributions.clone();
        for fact in facts {
            contributions.remove(&fact.id);
        }
        self.commit(contributions, facts)
    }

    fn aggregates(&self) -> Vec<Value> {
        self.state.current().cloned().into_iter().collect()
    }
}
