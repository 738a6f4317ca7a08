//! Per-session node memories.

use std::collections::{BTreeMap, BTreeSet};

use ruleweave_foundation::{FactId, Value};

use super::{Network, NodeKind};
use crate::aggregation::Aggregator;
use crate::fact::FactStore;
use crate::tuple::{TupleArena, TupleId};

/// Tuples a join created, keyed by the (left tuple, right fact) pair.
#[derive(Debug, Default)]
pub(crate) struct JoinMemory {
    pub(crate) left: BTreeSet<TupleId>,
    pub(crate) children: BTreeMap<(TupleId, FactId), TupleId>,
}

impl JoinMemory {
    /// Children of one left tuple, in right fact order.
    pub(crate) fn children_of(&self, tuple: TupleId) -> Vec<(FactId, TupleId)> {
        self.children
            .range((tuple, FactId::new(0))..=(tuple, FactId::null()))
            .map(|(&(_, fact), &child)| (fact, child))
            .collect()
    }
}

/// Match state of one left tuple of an existence node.
#[derive(Debug, Default)]
pub(crate) struct ExistenceEntry {
    pub(crate) matches: BTreeSet<FactId>,
    pub(crate) child: Option<TupleId>,
}

/// One aggregate value a node emitted.
#[derive(Debug)]
pub(crate) struct Emitted {
    pub(crate) value: Value,
    /// Facts the value came from, as the aggregator last reported them.
    pub(crate) source: Vec<FactId>,
    pub(crate) fact: FactId,
    pub(crate) tuple: TupleId,
}

/// Aggregation state of one left tuple.
pub(crate) struct AggregateGroup {
    pub(crate) aggregator: Box<dyn Aggregator>,
    pub(crate) tracked: BTreeSet<FactId>,
    pub(crate) emitted: Vec<Emitted>,
}

impl std::fmt::Debug for AggregateGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateGroup")
            .field("tracked", &self.tracked)
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub(crate) enum NodeMemory {
    Stateless,
    Alpha(BTreeSet<FactId>),
    Join(JoinMemory),
    Existence(BTreeMap<TupleId, ExistenceEntry>),
    Aggregate(BTreeMap<TupleId, AggregateGroup>),
    Filter(BTreeSet<TupleId>),
    Adapter(BTreeMap<TupleId, FactId>),
}

impl NodeMemory {
    fn for_kind(kind: &NodeKind) -> Self {
        match kind {
            NodeKind::Root
            | NodeKind::TypeFilter(_)
            | NodeKind::Selection(_)
            | NodeKind::Dummy
            | NodeKind::Terminal { .. } => Self::Stateless,
            NodeKind::AlphaMemory => Self::Alpha(BTreeSet::new()),
            NodeKind::Join { .. } => Self::Join(JoinMemory::default()),
            NodeKind::Existence { .. } => Self::Existence(BTreeMap::new()),
            NodeKind::Aggregate { .. } => Self::Aggregate(BTreeMap::new()),
            NodeKind::Filter { .. } => Self::Filter(BTreeSet::new()),
            NodeKind::Adapter => Self::Adapter(BTreeMap::new()),
        }
    }
}

/// Everything a session owns besides its agenda.
#[derive(Debug)]
pub(crate) struct WorkingMemory {
    pub(crate) facts: FactStore,
    pub(crate) tuples: TupleArena,
    pub(crate) nodes: Vec<NodeMemory>,
}

impl WorkingMemory {
    pub(crate) fn new(network: &Network) -> Self {
        Self {
            facts: FactStore::new(),
            tuples: TupleArena::new(),
            nodes: network
                .nodes()
                .iter()
                .map(|n| NodeMemory::for_kind(&n.kind))
                .collect(),
        }
    }
}
