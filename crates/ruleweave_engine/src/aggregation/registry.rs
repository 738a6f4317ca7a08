//! Aggregator factories, built-in and user-registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::{Error, ErrorKind, Result};
use ruleweave_model::AggregatorSpec;

use super::{
    AggregateExpressions, Aggregator, CollectionAggregator, CountAggregator,
    FlatteningAggregator, GroupByAggregator, SumAggregator,
};

/// Creates a fresh aggregator for one left-hand context.
pub type AggregatorFactory =
    Arc<dyn Fn(&AggregateExpressions) -> Result<Box<dyn Aggregator>> + Send + Sync>;

/// Maps aggregator names to factories.
#[derive(Clone, Default)]
pub struct AggregatorRegistry {
    custom: HashMap<Arc<str>, AggregatorFactory>,
}

impl fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn factory<F>(f: F) -> AggregatorFactory
where
    F: Fn(&AggregateExpressions) -> Result<Box<dyn Aggregator>> + Send + Sync + 'static,
{
    Arc::new(f)
}

impl AggregatorRegistry {
    /// Creates a registry with only the built-in aggregators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom aggregator.
    pub fn register<F>(&mut self, name: impl Into<Arc<str>>, f: F)
    where
        F: Fn(&AggregateExpressions) -> Result<Box<dyn Aggregator>> + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), factory(f));
    }

    /// Returns true if a custom aggregator is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.custom.contains_key(name)
    }

    /// The factory for an aggregator spec.
    ///
    /// # Errors
    /// Returns `UnresolvedAggregator` for an unregistered custom name.
    pub fn factory_for(&self, spec: &AggregatorSpec) -> Result<AggregatorFactory> {
        Ok(match spec {
            AggregatorSpec::Count => factory(|_| Ok(Box::new(CountAggregator::new()))),
            AggregatorSpec::Collect => factory(|_| Ok(Box::new(CollectionAggregator::new()))),
            AggregatorSpec::Sum(_) => factory(|exprs| {
                Ok(Box::new(SumAggregator::new(exprs.get("selector")?.clone())))
            }),
            AggregatorSpec::Flatten(_) => factory(|exprs| {
                Ok(Box::new(FlatteningAggregator::new(
                    exprs.get("selector")?.clone(),
                )))
            }),
            AggregatorSpec::GroupBy { .. } => factory(|exprs| {
                Ok(Box::new(GroupByAggregator::new(
                    exprs.get("key")?.clone(),
                    exprs.get("element")?.clone(),
                )))
            }),
            AggregatorSpec::Custom { name, .. } => self
                .custom
                .get(name)
                .cloned()
                .ok_or_else(|| Error::new(ErrorKind::UnresolvedAggregator(name.to_string())))?,
        })
    }
}
