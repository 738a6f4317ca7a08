//! Facts and the per-session fact store.
//!
//! A fact is either a plain value inserted by the caller (or by an action,
//! or produced by an aggregator) or a *wrapper* around a partial match of a
//! nested element group. Wrappers let a combination of facts flow into the
//! right input of a negation, existential or aggregate node as if it were a
//! single fact; their effective value is the trailing fact of the wrapped
//! tuple.

use std::collections::BTreeMap;

use ruleweave_foundation::{Error, FactId, Result, Type, Value};

use crate::tuple::{TupleArena, TupleId};

// =============================================================================
// Fact
// =============================================================================

/// What a fact holds.
#[derive(Clone, Debug, PartialEq)]
pub enum FactKind {
    /// A value held directly.
    Plain(Value),
    /// A partial match of a nested group, identified by its tuple.
    Wrapper(TupleId),
}

/// Where a fact came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactOrigin {
    /// Inserted through the session or by a rule action.
    External,
    /// Created by the network (aggregate results and wrappers).
    Derived,
}

/// A fact in working memory.
#[derive(Clone, Debug, PartialEq)]
pub struct Fact {
    id: FactId,
    kind: FactKind,
    origin: FactOrigin,
}

impl Fact {
    /// The fact's identity.
    #[must_use]
    pub const fn id(&self) -> FactId {
        self.id
    }

    /// The raw content of the fact.
    #[must_use]
    pub const fn kind(&self) -> &FactKind {
        &self.kind
    }

    /// The value held directly, or `None` for a wrapper.
    #[must_use]
    pub const fn raw_value(&self) -> Option<&Value> {
        match &self.kind {
            FactKind::Plain(value) => Some(value),
            FactKind::Wrapper(_) => None,
        }
    }

    /// The wrapped tuple, or `None` for a plain fact.
    #[must_use]
    pub const fn wrapped_tuple(&self) -> Option<TupleId> {
        match self.kind {
            FactKind::Plain(_) => None,
            FactKind::Wrapper(tuple) => Some(tuple),
        }
    }

    /// Returns true if this fact wraps a tuple.
    #[must_use]
    pub const fn is_wrapper(&self) -> bool {
        matches!(self.kind, FactKind::Wrapper(_))
    }

    /// Returns true if the network created this fact.
    #[must_use]
    pub fn is_derived(&self) -> bool {
        self.origin == FactOrigin::Derived
    }
}

// =============================================================================
// Fact Store
// =============================================================================

/// Owns every fact of a session, keyed by a never-reused [`FactId`].
///
/// Identifiers are issued in increasing order, so iterating the store (or any
/// ordered set of ids) visits facts in insertion order.
#[derive(Clone, Debug)]
pub struct FactStore {
    facts: BTreeMap<FactId, Fact>,
    next_id: u64,
}

impl Default for FactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            facts: BTreeMap::new(),
            // Zero is the null id.
            next_id: 1,
        }
    }

    fn allocate(&mut self, kind: FactKind, origin: FactOrigin) -> FactId {
        let id = FactId::new(self.next_id);
        self.next_id += 1;
        self.facts.insert(id, Fact { id, kind, origin });
        id
    }

    /// Adds a plain fact.
    pub fn insert(&mut self, value: Value, origin: FactOrigin) -> FactId {
        self.allocate(FactKind::Plain(value), origin)
    }

    /// Adds a wrapper fact around a tuple.
    pub fn insert_wrapper(&mut self, tuple: TupleId) -> FactId {
        self.allocate(FactKind::Wrapper(tuple), FactOrigin::Derived)
    }

    /// Replaces the value of a plain fact, keeping its identity.
    ///
    /// # Errors
    /// Returns `FactNotFound` if the fact is absent or is a wrapper.
    pub fn set_value(&mut self, id: FactId, value: Value) -> Result<()> {
        match self.facts.get_mut(&id) {
            Some(Fact {
                kind: FactKind::Plain(current),
                ..
            }) => {
                *current = value;
                Ok(())
            }
            _ => Err(Error::fact_not_found(id)),
        }
    }

    /// Removes a fact.
    pub fn remove(&mut self, id: FactId) -> Option<Fact> {
        self.facts.remove(&id)
    }

    /// Looks up a fact.
    #[must_use]
    pub fn get(&self, id: FactId) -> Option<&Fact> {
        self.facts.get(&id)
    }

    /// Returns true if the fact is present.
    #[must_use]
    pub fn contains(&self, id: FactId) -> bool {
        self.facts.contains_key(&id)
    }

    /// Number of facts, derived ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if the store holds no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Facts inserted from outside the network, in insertion order.
    pub fn external(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values().filter(|f| !f.is_derived())
    }

    /// Resolves the effective value of a fact.
    ///
    /// Plain facts yield their own value; wrappers yield the effective value
    /// of the trailing fact of the wrapped tuple, recursively.
    ///
    /// # Errors
    /// Returns `FactNotFound` for a missing fact and `Internal` when a wrapper
    /// points at a tuple that is gone or has no trailing fact.
    pub fn resolve<'a>(&'a self, tuples: &TupleArena, id: FactId) -> Result<&'a Value> {
        let mut current = id;
        loop {
            let fact = self.get(current).ok_or_else(|| Error::fact_not_found(current))?;
            match fact.kind {
                FactKind::Plain(ref value) => return Ok(value),
                FactKind::Wrapper(tuple) => {
                    current = tuples.right_fact(tuple).ok_or_else(|| {
                        Error::internal(format!("wrapper {id} points at a tuple without a fact"))
                    })?;
                }
            }
        }
    }

    /// Resolves the effective runtime type of a fact.
    ///
    /// # Errors
    /// Same as [`FactStore::resolve`].
    pub fn resolve_type(&self, tuples: &TupleArena, id: FactId) -> Result<Type> {
        self.resolve(tuples, id).map(Value::value_type)
    }
}

// =============================================================================
// Tests
// =============================================================================
