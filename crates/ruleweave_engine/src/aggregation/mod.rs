//! Incremental aggregation.
//!
//! An aggregate node keeps one [`Aggregator`] per left-hand context. The node
//! feeds it batches of facts as they are added to, modified in, or removed
//! from the aggregated source, and the aggregator answers with the changes to
//! its aggregate values. Each change becomes an assert, update or retract of
//! an aggregate fact downstream.
//!
//! Every aggregator obeys the same contract: `modify` and `remove` only
//! accept facts a previous `add` supplied, and a batch containing an untracked
//! fact fails with `AggregateFactNotFound` before any state changes. Any other
//! error also leaves the aggregator as it was before the call.

mod collection;
mod count;
mod flattening;
mod group_by;
mod registry;
mod sum;

use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::{Error, FactId, Result, Value};

use crate::binder::{FactExpression, LhsExpression};
use crate::tuple::TupleView;

pub use collection::CollectionAggregator;
pub use count::CountAggregator;
pub use flattening::FlatteningAggregator;
pub use group_by::GroupByAggregator;
pub use registry::{AggregatorFactory, AggregatorRegistry};
pub use sum::SumAggregator;

// =============================================================================
// Results
// =============================================================================

/// How an aggregate value changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregationAction {
    /// A new aggregate value exists.
    Added,
    /// An existing aggregate value changed.
    Modified,
    /// An aggregate value no longer exists.
    Removed,
}

/// One change reported by an aggregator.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregationResult {
    /// What happened.
    pub action: AggregationAction,
    /// The current value (for `Removed`, the value that went away).
    pub aggregate: Value,
    /// For `Modified`, the value it replaces.
    pub previous: Option<Value>,
    /// Facts the change came from.
    pub source: Vec<FactId>,
}

impl AggregationResult {
    /// A new aggregate value.
    #[must_use]
    pub fn added(aggregate: Value) -> Self {
        Self {
            action: AggregationAction::Added,
            aggregate,
            previous: None,
            source: Vec::new(),
        }
    }

    /// A changed aggregate value.
    #[must_use]
    pub fn modified(aggregate: Value, previous: Value) -> Self {
        Self {
            action: AggregationAction::Modified,
            aggregate,
            previous: Some(previous),
            source: Vec::new(),
        }
    }

    /// A withdrawn aggregate value.
    #[must_use]
    pub fn removed(aggregate: Value) -> Self {
        Self {
            action: AggregationAction::Removed,
            aggregate,
            previous: None,
            source: Vec::new(),
        }
    }

    /// Records the facts the change came from.
    #[must_use]
    pub fn with_source(mut self, source: impl IntoIterator<Item = FactId>) -> Self {
        self.source = source.into_iter().collect();
        self
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// A fact handed to an aggregator.
///
/// `context` is the tuple the fact extends: the left-hand context for a plain
/// pattern source, or the partial match a nested group produced.
#[derive(Clone, Copy)]
pub struct AggregateFact<'a> {
    /// Fact identity; aggregators track facts by it.
    pub id: FactId,
    /// Effective value.
    pub value: &'a Value,
    /// Positions preceding the fact.
    pub context: &'a dyn TupleView,
}

impl fmt::Debug for AggregateFact<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateFact")
            .field("id", &self.id)
            .field("value", self.value)
            .finish_non_exhaustive()
    }
}

/// A named expression an aggregator evaluates per fact.
#[derive(Clone, Debug)]
pub struct AggregateExpression {
    name: Arc<str>,
    expression: LhsExpression,
}

impl AggregateExpression {
    /// Wraps a compiled expression.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, expression: LhsExpression) -> Self {
        Self {
            name: name.into(),
            expression,
        }
    }

    /// Wraps a closure over the fact value.
    pub fn from_fn<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, LhsExpression::Fact(FactExpression::from_fn(f)))
    }

    /// Expression name, such as `selector` or `key`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates against a fact.
    ///
    /// # Errors
    /// Returns any evaluation error.
    pub fn invoke(&self, fact: &AggregateFact<'_>) -> Result<Value> {
        self.expression.invoke(fact.context, fact.value)
    }
}

/// The named expressions of one aggregate element.
#[derive(Clone, Debug, Default)]
pub struct AggregateExpressions(Vec<AggregateExpression>);

impl AggregateExpressions {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an expression.
    #[must_use]
    pub fn with(mut self, expression: AggregateExpression) -> Self {
        self.0.push(expression);
        self
    }

    /// Looks up an expression by name.
    ///
    /// # Errors
    /// Returns `Internal` if no expression has that name.
    pub fn get(&self, name: &str) -> Result<&AggregateExpression> {
        self.0
            .iter()
            .find(|e| e.name() == name)
            .ok_or_else(|| Error::internal(format!("aggregate expression {name} is missing")))
    }

    /// All expressions, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &AggregateExpression> {
        self.0.iter()
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Incrementally maintains aggregate values over a changing set of facts.
pub trait Aggregator: Send {
    /// Adds facts not seen before.
    ///
    /// # Errors
    /// Returns an error if an expression fails to evaluate or a fact is
    /// already tracked.
    fn add(
        &mut self,
        context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>>;

    /// Re-evaluates facts whose values changed.
    ///
    /// # Errors
    /// Returns `AggregateFactNotFound` if any fact was never added.
    fn modify(
        &mut self,
        context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>>;

    /// Withdraws facts.
    ///
    /// # Errors
    /// Returns `AggregateFactNotFound` if any fact was never added.
    fn remove(
        &mut self,
        context: &dyn TupleView,
        facts: &[AggregateFact<'_>],
    ) -> Result<Vec<AggregationResult>>;

    /// Current aggregate values.
    fn aggregates(&self) -> Vec<Value>;
}

/// Fails on the first fact `tracked` rejects.
pub(crate) fn ensure_tracked(
    facts: &[AggregateFact<'_>],
    tracked: impl Fn(FactId) -> bool,
) -> Result<()> {
    match facts.iter().find(|f| !tracked(f.id)) {
        Some(missing) => Err(Error::aggregate_fact_not_found(missing.id)),
        None => Ok(()),
    }
}

/// Fails on the first fact `tracked` accepts.
pub(crate) fn ensure_untracked(
    facts: &[AggregateFact<'_>],
    tracked: impl Fn(FactId) -> bool,
) -> Result<()> {
    match facts.iter().find(|f| tracked(f.id)) {
        Some(duplicate) => Err(Error::internal(format!(
            "fact {} is already aggregated",
            duplicate.id
        ))),
        None => Ok(()),
    }
}

/// Emission state of an aggregator with exactly one aggregate value.
///
/// The first emission is `Added`, every later one `Modified`.
#[derive(Clone, Debug, Default)]
pub(crate) struct SingleValue {
    current: Option<Value>,
}

impl SingleValue {
    pub(crate) fn emit(&mut self, value: Value, source: Vec<FactId>) -> Vec<AggregationResult> {
        let result = match self.current.replace(value.clone()) {
            None => AggregationResult::added(value),
            Some(previous) => AggregationResult::modified(value, previous),
        };
        vec![result.with_source(source)]
    }

    pub(crate) const fn is_created(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }
}

/// Ids of a batch, in order.
pub(crate) fn ids(facts: &[AggregateFact<'_>]) -> Vec<FactId> {
    facts.iter().map(|f| f.id).collect()
}
