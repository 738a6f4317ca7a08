//! Partial matches.
//!
//! A tuple is an ordered sequence of facts built one element at a time. Each
//! tuple stores only its parent and the fact it appended, so extending is
//! constant time and every prefix of a match is shared. Negation and
//! existential elements still occupy a position; they append no fact.

use std::collections::HashMap;

use ruleweave_foundation::{Error, FactId, Result, Value};

use crate::fact::FactStore;

/// Identifies a tuple within a session's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TupleId(u64);

impl TupleId {
    /// Raw index, for logging.
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug)]
struct TupleNode {
    parent: Option<TupleId>,
    fact: Option<FactId>,
    len: usize,
}

// =============================================================================
// Tuple Arena
// =============================================================================

/// Owns every live tuple of a session.
///
/// The arena always contains the empty root tuple. Identifiers grow
/// monotonically, so ordered sets of tuple ids iterate in creation order.
#[derive(Clone, Debug)]
pub struct TupleArena {
    nodes: HashMap<TupleId, TupleNode>,
    next_id: u64,
}

impl Default for TupleArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TupleArena {
    /// Creates an arena holding only the root tuple.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            TupleId(0),
            TupleNode {
                parent: None,
                fact: None,
                len: 0,
            },
        );
        Self { nodes, next_id: 1 }
    }

    /// The empty tuple every match starts from.
    #[must_use]
    pub const fn root(&self) -> TupleId {
        TupleId(0)
    }

    /// Creates a child of `parent` with one more position.
    ///
    /// `fact` is `None` for positions held by negation and existential
    /// elements.
    pub fn extend(&mut self, parent: TupleId, fact: Option<FactId>) -> TupleId {
        let len = self.len(parent) + 1;
        let id = TupleId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            TupleNode {
                parent: Some(parent),
                fact,
                len,
            },
        );
        id
    }

    /// Drops a tuple. Callers retire children before their parents.
    pub fn retire(&mut self, id: TupleId) {
        if id != self.root() {
            self.nodes.remove(&id);
        }
    }

    /// Returns true if the tuple is live.
    #[must_use]
    pub fn contains(&self, id: TupleId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of live tuples, the root included.
    #[must_use]
    pub fn live(&self) -> usize {
        self.nodes.len()
    }

    /// Number of positions in the tuple.
    #[must_use]
    pub fn len(&self, id: TupleId) -> usize {
        self.nodes.get(&id).map_or(0, |n| n.len)
    }

    /// The tuple this one extends.
    #[must_use]
    pub fn parent(&self, id: TupleId) -> Option<TupleId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// The fact appended last, if that position holds one.
    #[must_use]
    pub fn right_fact(&self, id: TupleId) -> Option<FactId> {
        self.nodes.get(&id).and_then(|n| n.fact)
    }

    /// The fact at a zero-based position, counted from the root.
    #[must_use]
    pub fn fact_at(&self, id: TupleId, position: usize) -> Option<FactId> {
        let target = self.ancestor(id, position + 1)?;
        self.right_fact(target)
    }

    /// The ancestor (or self) with exactly `len` positions.
    #[must_use]
    pub fn ancestor(&self, id: TupleId, len: usize) -> Option<TupleId> {
        let mut current = id;
        loop {
            let node = self.nodes.get(&current)?;
            if node.len == len {
                return Some(current);
            }
            if node.len < len {
                return None;
            }
            current = node.parent?;
        }
    }

    /// Facts of every position, oldest first.
    #[must_use]
    pub fn facts(&self, id: TupleId) -> Vec<Option<FactId>> {
        let mut facts = Vec::with_capacity(self.len(id));
        let mut current = Some(id);
        while let Some(tid) = current {
            let Some(node) = self.nodes.get(&tid) else {
                break;
            };
            if node.parent.is_none() {
                break;
            }
            facts.push(node.fact);
            current = node.parent;
        }
        facts.reverse();
        facts
    }
}

// =============================================================================
// Tuple Views
// =============================================================================

/// Read access to the effective values of a tuple's positions.
pub trait TupleView {
    /// Number of positions.
    fn len(&self) -> usize;

    /// Returns true if the tuple has no positions.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Effective value at a position, `None` where no fact is bound.
    fn value_at(&self, position: usize) -> Option<Value>;
}

/// The tuple with no positions.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyTuple;

impl TupleView for EmptyTuple {
    fn len(&self) -> usize {
        0
    }

    fn value_at(&self, _position: usize) -> Option<Value> {
        None
    }
}

/// A live tuple read through the arena and the fact store.
#[derive(Clone, Copy)]
pub struct ArenaTuple<'a> {
    arena: &'a TupleArena,
    facts: &'a FactStore,
    id: TupleId,
}

impl<'a> ArenaTuple<'a> {
    /// Creates a view of `id`.
    #[must_use]
    pub const fn new(arena: &'a TupleArena, facts: &'a FactStore, id: TupleId) -> Self {
        Self { arena, facts, id }
    }
}

impl TupleView for ArenaTuple<'_> {
    fn len(&self) -> usize {
        self.arena.len(self.id)
    }

    fn value_at(&self, position: usize) -> Option<Value> {
        let fact = self.arena.fact_at(self.id, position)?;
        self.facts.resolve(self.arena, fact).ok().cloned()
    }
}

/// Values and fact ids of a tuple, captured when an activation is scheduled.
///
/// Actions run against the snapshot, so they still see the matched facts
/// after the tuple itself has been retracted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<Option<(FactId, Value)>>,
}

impl Snapshot {
    /// Captures a live tuple.
    ///
    /// # Errors
    /// Returns an error if a bound fact cannot be resolved.
    pub fn capture(arena: &TupleArena, facts: &FactStore, id: TupleId) -> Result<Self> {
        if !arena.contains(id) {
            return Err(Error::internal(format!("tuple {} is not live", id.index())));
        }
        let entries = arena
            .facts(id)
            .into_iter()
            .map(|slot| match slot {
                Some(fact) => facts
                    .resolve(arena, fact)
                    .map(|value| Some((fact, value.clone()))),
                None => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Builds a snapshot from explicit entries.
    #[must_use]
    pub fn from_entries(entries: Vec<Option<(FactId, Value)>>) -> Self {
        Self { entries }
    }

    /// The fact at a position.
    #[must_use]
    pub fn fact_at(&self, position: usize) -> Option<FactId> {
        self.entries.get(position)?.as_ref().map(|(id, _)| *id)
    }

    /// Bound fact ids, oldest first.
    pub fn fact_ids(&self) -> impl Iterator<Item = FactId> + '_ {
        self.entries.iter().flatten().map(|(id, _)| *id)
    }

    /// Returns true if the fact is bound at any position.
    #[must_use]
    pub fn binds(&self, fact: FactId) -> bool {
        self.fact_ids().any(|id| id == fact)
    }
}

impl TupleView for Snapshot {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn value_at(&self, position: usize) -> Option<Value> {
        self.entries
            .get(position)?
            .as_ref()
            .map(|(_, value)| value.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
