//! Rete network, aggregation, agenda and sessions for ruleweave.
//!
//! This crate provides:
//! - [`FactStore`] and [`TupleArena`] - Facts and partial matches
//! - [`IndexMap`] - Declaration-to-position maps used by the binder
//! - [`binder`] - Expressions and actions compiled against tuple positions
//! - [`Aggregator`] - Incremental count, sum, collect, group-by and flatten
//! - [`Network`] - The compiled, shareable discrimination network
//! - [`Agenda`] - Activations ordered by priority, then arrival
//! - [`Session`] - Working memory and the firing loop
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ruleweave_engine::{Network, Session};
//! use ruleweave_foundation::{Record, Type, Value};
//! use ruleweave_model::{
//!     ActionBody, ActionElement, Declaration, Expr, PatternElement, RuleDefinition, RuleElement,
//! };
//!
//! let large = RuleDefinition::new("large-order")
//!     .with_element(RuleElement::Pattern(
//!         PatternElement::new(Declaration::new("o", Type::record("Order")))
//!             .with_condition(Expr::var("o").field("amount").greater_than(Expr::lit(100))),
//!     ))
//!     .with_action(ActionElement::new(ActionBody::Insert(Expr::lit("flagged"))));
//!
//! let network = Arc::new(Network::compile([large]).unwrap());
//! let mut session = Session::new(Arc::clone(&network)).unwrap();
//! session
//!     .insert(Value::Record(Record::new("Order").with("amount", 250)))
//!     .unwrap();
//! assert_eq!(session.fire().unwrap().fired, 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agenda;
pub mod aggregation;
pub mod binder;
pub mod config;
pub mod events;
pub mod fact;
pub mod index_map;
pub mod network;
pub mod rule;
pub mod session;
pub mod tuple;

pub use agenda::{Activation, ActivationKey, Agenda, AgendaFilter};
pub use aggregation::{
    AggregateExpression, AggregateExpressions, AggregateFact, AggregationAction,
    AggregationResult, Aggregator, AggregatorFactory, AggregatorRegistry,
};
pub use binder::{DependencyRegistry, DependencyResolver, NoDependencies, ResolutionContext};
pub use config::{DEFAULT_MAX_FIRES, SessionConfig};
pub use events::{ActivationChange, Event, EventListener, EventLog, EventRecord, FactChange};
pub use fact::{Fact, FactKind, FactOrigin, FactStore};
pub use index_map::IndexMap;
pub use network::{Network, NetworkBuilder, NetworkStats, NodeId, Quantifier};
pub use rule::{CompiledRule, FactBinding, RuleId};
pub use session::{FireSummary, Session};
pub use tuple::{ArenaTuple, EmptyTuple, Snapshot, TupleArena, TupleId, TupleView};
