//! The discrimination network.
//!
//! Nodes live in an arena indexed by [`NodeId`]. The alpha side starts at the
//! root, splits by fact type and filters single facts; it ends in alpha
//! memories. The beta side starts at a dummy node holding the empty tuple and
//! extends tuples one element at a time:
//!
//! ```text
//!   Root ─ Type ─ Selection* ─ AlphaMemory ──────────┐ right
//!                                                      ▼
//!   Dummy ─────────────────────────────────────────► Join ─► ... ─► Terminal
//!                                               left
//! ```
//!
//! Beta nodes pass tuples to their successors through the left input. Alpha
//! memories and adapters pass facts to theirs through the right input.
//!
//! A [`Network`] holds only structure. It is immutable once built and is
//! shared between sessions; every memory lives in the session.

mod builder;
mod memory;
mod propagate;

use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::Type;

use crate::aggregation::{AggregateExpressions, AggregatorFactory};
use crate::binder::{FactExpression, LhsExpression, TupleExpression};
use crate::rule::{CompiledRule, RuleId};

pub use builder::NetworkBuilder;
pub(crate) use memory::WorkingMemory;
pub(crate) use propagate::Propagator;

/// Index of a node within its network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Whether an existence node requires no match or at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantifier {
    /// Passes while nothing matches.
    Not,
    /// Passes while something matches.
    Exists,
}

impl Quantifier {
    /// Returns true if a left tuple with `matches` right matches passes.
    #[must_use]
    pub const fn passes(self, matches: usize) -> bool {
        match self {
            Self::Not => matches == 0,
            Self::Exists => matches > 0,
        }
    }
}

/// The aggregator an aggregate node instantiates per left tuple.
#[derive(Clone)]
pub(crate) struct AggregateSpec {
    pub(crate) name: Arc<str>,
    pub(crate) expressions: AggregateExpressions,
    pub(crate) factory: AggregatorFactory,
}

impl fmt::Debug for AggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateSpec")
            .field("name", &self.name)
            .field("expressions", &self.expressions)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    /// Entry of the alpha network.
    Root,
    /// Passes facts whose runtime type the declared type accepts.
    TypeFilter(Type),
    /// Passes facts satisfying a fact-only condition.
    Selection(FactExpression),
    /// Remembers the facts that reached it.
    AlphaMemory,
    /// Holds the empty tuple every match starts from.
    Dummy,
    /// Extends left tuples with matching right facts.
    Join {
        right: NodeId,
        conditions: Vec<LhsExpression>,
    },
    /// Forwards left tuples by the number of matching right facts.
    Existence {
        quantifier: Quantifier,
        right: NodeId,
        conditions: Vec<LhsExpression>,
    },
    /// Aggregates matching right facts per left tuple.
    Aggregate {
        right: NodeId,
        conditions: Vec<LhsExpression>,
        spec: AggregateSpec,
    },
    /// Forwards left tuples satisfying tuple conditions.
    Filter { conditions: Vec<TupleExpression> },
    /// Turns the tuples of a nested group into wrapper facts.
    Adapter,
    /// Feeds the agenda.
    Terminal { rule: RuleId },
}

impl NodeKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::TypeFilter(_) => "type",
            Self::Selection(_) => "selection",
            Self::AlphaMemory => "alpha-memory",
            Self::Dummy => "dummy",
            Self::Join { .. } => "join",
            Self::Existence {
                quantifier: Quantifier::Not,
                ..
            } => "not",
            Self::Existence {
                quantifier: Quantifier::Exists,
                ..
            } => "exists",
            Self::Aggregate { .. } => "aggregate",
            Self::Filter { .. } => "filter",
            Self::Adapter => "adapter",
            Self::Terminal { .. } => "terminal",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) successors: Vec<NodeId>,
}

// =============================================================================
// Network
// =============================================================================

/// Node counts by kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Type filters, selections and alpha memories.
    pub alpha: usize,
    /// Joins, existence, aggregate, filter and adapter nodes.
    pub beta: usize,
    /// One per rule.
    pub terminal: usize,
}

/// A compiled rule network.
///
/// Build one with [`NetworkBuilder`], wrap it in an [`Arc`] and open any
/// number of sessions on it, from any number of threads.
pub struct Network {
    nodes: Vec<Node>,
    rules: Vec<Arc<CompiledRule>>,
}

const ROOT: NodeId = NodeId(0);
const DUMMY: NodeId = NodeId(1);

impl Network {
    /// Starts building a network.
    #[must_use]
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    /// Compiles rules with the built-in aggregators.
    ///
    /// # Errors
    /// Returns the first compile error.
    pub fn compile(
        definitions: impl IntoIterator<Item = ruleweave_model::RuleDefinition>,
    ) -> ruleweave_foundation::Result<Self> {
        let mut builder = NetworkBuilder::new();
        for definition in definitions {
            builder.add_rule(definition)?;
        }
        Ok(builder.build())
    }

    /// Every rule, in the order it was added.
    #[must_use]
    pub fn rules(&self) -> &[Arc<CompiledRule>] {
        &self.rules
    }

    /// A rule by id.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> Option<&Arc<CompiledRule>> {
        self.rules.get(id.index())
    }

    /// A rule by name.
    #[must_use]
    pub fn rule_named(&self, name: &str) -> Option<&Arc<CompiledRule>> {
        self.rules.iter().find(|r| r.name() == name)
    }

    /// Number of nodes, root and dummy included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node counts by kind.
    #[must_use]
    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();
        for node in &self.nodes {
            match node.kind {
                NodeKind::Root | NodeKind::Dummy => {}
                NodeKind::TypeFilter(_) | NodeKind::Selection(_) | NodeKind::AlphaMemory => {
                    stats.alpha += 1;
                }
                NodeKind::Terminal { .. } => stats.terminal += 1,
                _ => stats.beta += 1,
            }
        }
        stats
    }

    pub(crate) const fn root(&self) -> NodeId {
        ROOT
    }

    pub(crate) const fn dummy(&self) -> NodeId {
        DUMMY
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<String> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| format!("{i}:{} -> {:?}", n.kind.label(), n.successors))
            .collect();
        f.debug_struct("Network")
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("nodes", &nodes)
            .finish()
    }
}
