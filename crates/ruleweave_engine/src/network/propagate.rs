//! Delta propagation.
//!
//! Every node accepts assert, update and retract deltas and reacts
//! depth-first: a delta is fully propagated through all successors before the
//! call returns. Asserts and updates visit successors in attachment order,
//! retracts in reverse, so a node consuming a nested group always sees its
//! left tuple retracted before the group's wrapper facts go away.
//!
//! Conditions that fail to evaluate are reported and count as not satisfied.
//! Aggregate expressions failing on a fact are reported the same way and the
//! fact stays out of the group. Every other error aborts propagation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ruleweave_foundation::{Error, FactId, Result, Value};
use ruleweave_model::Repeatability;
use tracing::{trace, warn};

use super::memory::{AggregateGroup, Emitted, ExistenceEntry, JoinMemory, NodeMemory};
use super::{AggregateSpec, Network, NodeId, NodeKind, Quantifier, WorkingMemory};
use crate::agenda::{ActivationKey, Agenda};
use crate::aggregation::{AggregateFact, AggregationAction, AggregationResult};
use crate::binder::{LhsExpression, TupleExpression};
use crate::events::{ActivationChange, Event, EventHub};
use crate::fact::{Fact, FactOrigin};
use crate::rule::RuleId;
use crate::tuple::{ArenaTuple, Snapshot, TupleId};

#[derive(Clone, Copy, Debug)]
enum Delta {
    Add,
    Modify,
    Remove,
}

/// Finds the emitted entry for an aggregate value.
///
/// Equal values from different sources stay apart: an entry sharing a source
/// fact with the result wins over one that only has the same value.
fn locate_emitted(emitted: &[Emitted], value: &Value, source: &[FactId]) -> Option<usize> {
    emitted
        .iter()
        .position(|e| e.value == *value && e.source.iter().any(|f| source.contains(f)))
        .or_else(|| emitted.iter().position(|e| e.value == *value))
}

fn memory_mismatch(node: NodeId) -> Error {
    Error::internal(format!(
        "node {} has no memory of the expected kind",
        node.index()
    ))
}

fn unexpected(node: NodeId, input: &str) -> Error {
    Error::internal(format!("node {} has no {input} input", node.index()))
}

/// Evaluates conditions left to right, stopping at the first one that fails.
fn all_hold<T>(conditions: &[T], mut eval: impl FnMut(&T) -> Result<Value>) -> Result<bool> {
    for condition in conditions {
        if !eval(condition)?.is_truthy() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Propagates deltas through a network over one session's memories.
pub(crate) struct Propagator<'a> {
    pub(crate) network: &'a Network,
    pub(crate) memory: &'a mut WorkingMemory,
    pub(crate) agenda: &'a mut Agenda,
    pub(crate) events: &'a mut EventHub,
    /// Activation whose actions are running.
    pub(crate) firing: Option<ActivationKey>,
}

impl<'a> Propagator<'a> {
    // =========================================================================
    // Entry points
    // =========================================================================

    /// Seeds the beta network with the empty tuple.
    pub(crate) fn seed(&mut self) -> Result<()> {
        let root = self.memory.tuples.root();
        self.assert_down(self.network.dummy(), root)
    }

    pub(crate) fn assert_fact(&mut self, fact: FactId) -> Result<()> {
        self.alpha_assert(self.network.root(), fact)
    }

    pub(crate) fn update_fact(&mut self, fact: FactId) -> Result<()> {
        self.alpha_update(self.network.root(), fact)
    }

    pub(crate) fn retract_fact(&mut self, fact: FactId) -> Result<()> {
        self.alpha_retract(self.network.root(), fact)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn successors(&self, node: NodeId) -> &'a [NodeId] {
        let network: &'a Network = self.network;
        &network.node(node).successors
    }

    fn kind(&self, node: NodeId) -> &'a NodeKind {
        let network: &'a Network = self.network;
        &network.node(node).kind
    }

    fn report(&mut self, node: NodeId, err: &Error) {
        warn!(node = node.index(), error = %err, "expression evaluation failed");
        self.events.emit_with(|| Event::ConditionFailed {
            message: err.to_string(),
        });
    }

    fn assert_down(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        for &successor in self.successors(node) {
            self.left_assert(successor, tuple)?;
        }
        Ok(())
    }

    fn update_down(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        for &successor in self.successors(node) {
            self.left_update(successor, tuple)?;
        }
        Ok(())
    }

    fn retract_down(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        for &successor in self.successors(node).iter().rev() {
            self.left_retract(successor, tuple)?;
        }
        Ok(())
    }

    /// Facts currently in the memory of a right input.
    fn right_facts(&self, right: NodeId) -> Result<Vec<FactId>> {
        match &self.memory.nodes[right.index()] {
            NodeMemory::Alpha(facts) => Ok(facts.iter().copied().collect()),
            NodeMemory::Adapter(wrappers) => Ok(wrappers.values().copied().collect()),
            _ => Err(memory_mismatch(right)),
        }
    }

    /// Decides whether `fact` extends `tuple` at a two-input node.
    ///
    /// A wrapper fact only pairs with the tuple its group started from.
    fn matches(
        &mut self,
        node: NodeId,
        conditions: &[LhsExpression],
        tuple: TupleId,
        fact: FactId,
    ) -> Result<bool> {
        let outcome = {
            let WorkingMemory { facts, tuples, .. } = &*self.memory;
            if let Some(wrapped) = facts.get(fact).and_then(Fact::wrapped_tuple) {
                if tuples.ancestor(wrapped, tuples.len(tuple)) != Some(tuple) {
                    return Ok(false);
                }
            }
            if conditions.is_empty() {
                return Ok(true);
            }
            let value = facts.resolve(tuples, fact)?;
            let view = ArenaTuple::new(tuples, facts, tuple);
            all_hold(conditions, |c| c.invoke(&view, value))
        };
        Ok(match outcome {
            Ok(holds) => holds,
            Err(err) => {
                self.report(node, &err);
                false
            }
        })
    }

    // =========================================================================
    // Memories
    // =========================================================================

    fn alpha_memory(&mut self, node: NodeId) -> Result<&mut BTreeSet<FactId>> {
        match &mut self.memory.nodes[node.index()] {
            NodeMemory::Alpha(facts) => Ok(facts),
            _ => Err(memory_mismatch(node)),
        }
    }

    fn join_memory(&mut self, node: NodeId) -> Result<&mut JoinMemory> {
        match &mut self.memory.nodes[node.index()] {
            NodeMemory::Join(memory) => Ok(memory),
            _ => Err(memory_mismatch(node)),
        }
    }

    fn existence_memory(
        &mut self,
        node: NodeId,
    ) -> Result<&mut BTreeMap<TupleId, ExistenceEntry>> {
        match &mut self.memory.nodes[node.index()] {
            NodeMemory::Existence(entries) => Ok(entries),
            _ => Err(memory_mismatch(node)),
        }
    }

    fn aggregate_memory(
        &mut self,
        node: NodeId,
    ) -> Result<&mut BTreeMap<TupleId, AggregateGroup>> {
        match &mut self.memory.nodes[node.index()] {
            NodeMemory::Aggregate(groups) => Ok(groups),
            _ => Err(memory_mismatch(node)),
        }
    }

    fn aggregate_group(&mut self, node: NodeId, tuple: TupleId) -> Result<&mut AggregateGroup> {
        self.aggregate_memory(node)?
            .get_mut(&tuple)
            .ok_or_else(|| {
                Error::internal(format!(
                    "aggregate node {} has no group for tuple {}",
                    node.index(),
                    tuple.index()
                ))
            })
    }

    fn filter_memory(&mut self, node: NodeId) -> Result<&mut BTreeSet<TupleId>> {
        match &mut self.memory.nodes[node.index()] {
            NodeMemory::Filter(passed) => Ok(passed),
            _ => Err(memory_mismatch(node)),
        }
    }

    fn adapter_memory(
        &mut self,
        node: NodeId,
    ) -> Result<&mut BTreeMap<TupleId, FactId>> {
        match &mut self.memory.nodes[node.index()] {
            NodeMemory::Adapter(wrappers) => Ok(wrappers),
            _ => Err(memory_mismatch(node)),
        }
    }

    // =========================================================================
    // Alpha network
    // =========================================================================

    /// Runs the single-fact test of a type filter or selection node.
    fn alpha_test(&mut self, node: NodeId, fact: FactId) -> Result<bool> {
        let outcome = {
            let WorkingMemory { facts, tuples, .. } = &*self.memory;
            match self.kind(node) {
                NodeKind::TypeFilter(fact_type) => {
                    return Ok(fact_type.accepts(&facts.resolve_type(tuples, fact)?));
                }
                NodeKind::Selection(condition) => {
                    condition.invoke(facts.resolve(tuples, fact)?)
                }
                _ => return Ok(true),
            }
        };
        Ok(match outcome {
            Ok(value) => value.is_truthy(),
            Err(err) => {
                self.report(node, &err);
                false
            }
        })
    }

    fn alpha_assert(&mut self, node: NodeId, fact: FactId) -> Result<()> {
        match self.kind(node) {
            NodeKind::Root => {}
            NodeKind::TypeFilter(_) | NodeKind::Selection(_) => {
                if !self.alpha_test(node, fact)? {
                    return Ok(());
                }
            }
            NodeKind::AlphaMemory => {
                trace!(node = node.index(), fact = %fact, "alpha memory assert");
                if self.alpha_memory(node)?.insert(fact) {
                    for &successor in self.successors(node) {
                        self.right_assert(successor, fact)?;
                    }
                }
                return Ok(());
            }
            _ => return Err(unexpected(node, "alpha")),
        }
        for &successor in self.successors(node) {
            self.alpha_assert(successor, fact)?;
        }
        Ok(())
    }

    /// Re-tests an updated fact. A fact that stops passing is retracted
    /// below this node; one that starts passing is asserted into the alpha
    /// memories it newly reaches.
    fn alpha_update(&mut self, node: NodeId, fact: FactId) -> Result<()> {
        match self.kind(node) {
            NodeKind::Root => {}
            NodeKind::TypeFilter(_) | NodeKind::Selection(_) => {
                if !self.alpha_test(node, fact)? {
                    for &successor in self.successors(node).iter().rev() {
                        self.alpha_retract(successor, fact)?;
                    }
                    return Ok(());
                }
            }
            NodeKind::AlphaMemory => {
                trace!(node = node.index(), fact = %fact, "alpha memory update");
                let inserted = self.alpha_memory(node)?.insert(fact);
                for &successor in self.successors(node) {
                    if inserted {
                        self.right_assert(successor, fact)?;
                    } else {
                        self.right_update(successor, fact)?;
                    }
                }
                return Ok(());
            }
            _ => return Err(unexpected(node, "alpha")),
        }
        for &successor in self.successors(node) {
            self.alpha_update(successor, fact)?;
        }
        Ok(())
    }

    fn alpha_retract(&mut self, node: NodeId, fact: FactId) -> Result<()> {
        match self.kind(node) {
            NodeKind::Root | NodeKind::TypeFilter(_) | NodeKind::Selection(_) => {}
            NodeKind::AlphaMemory => {
                if self.alpha_memory(node)?.remove(&fact) {
                    trace!(node = node.index(), fact = %fact, "alpha memory retract");
                    for &successor in self.successors(node).iter().rev() {
                        self.right_retract(successor, fact)?;
                    }
                }
                return Ok(());
            }
            _ => return Err(unexpected(node, "alpha")),
        }
        for &successor in self.successors(node).iter().rev() {
            self.alpha_retract(successor, fact)?;
        }
        Ok(())
    }

    // =========================================================================
    // Beta dispatch
    // =========================================================================

    fn left_assert(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        trace!(node = node.index(), tuple = tuple.index(), "left assert");
        match self.kind(node) {
            NodeKind::Join { right, conditions } => {
                self.join_left_assert(node, *right, conditions, tuple)
            }
            NodeKind::Existence {
                quantifier,
                right,
                conditions,
            } => self.existence_left_assert(node, *quantifier, *right, conditions, tuple),
            NodeKind::Aggregate {
                right,
                conditions,
                spec,
            } => self.aggregate_left_assert(node, *right, conditions, spec, tuple),
            NodeKind::Filter { conditions } => self.filter_left_assert(node, conditions, tuple),
            NodeKind::Adapter => self.adapter_left_assert(node, tuple),
            NodeKind::Terminal { rule } => self.terminal_assert(*rule, tuple),
            _ => Err(unexpected(node, "left")),
        }
    }

    fn left_update(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        trace!(node = node.index(), tuple = tuple.index(), "left update");
        match self.kind(node) {
            NodeKind::Join { right, conditions } => {
                self.join_left_update(node, *right, conditions, tuple)
            }
            NodeKind::Existence {
                quantifier,
                right,
                conditions,
            } => self.existence_left_update(node, *quantifier, *right, conditions, tuple),
            NodeKind::Aggregate {
                right, conditions, ..
            } => self.aggregate_left_update(node, *right, conditions, tuple),
            NodeKind::Filter { conditions } => self.filter_left_update(node, conditions, tuple),
            NodeKind::Adapter => self.adapter_left_update(node, tuple),
            NodeKind::Terminal { rule } => self.terminal_update(*rule, tuple),
            _ => Err(unexpected(node, "left")),
        }
    }

    fn left_retract(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        trace!(node = node.index(), tuple = tuple.index(), "left retract");
        match self.kind(node) {
            NodeKind::Join { .. } => self.join_left_retract(node, tuple),
            NodeKind::Existence { .. } => self.existence_left_retract(node, tuple),
            NodeKind::Aggregate { .. } => self.aggregate_left_retract(node, tuple),
            NodeKind::Filter { .. } => self.filter_left_retract(node, tuple),
            NodeKind::Adapter => self.adapter_left_retract(node, tuple),
            NodeKind::Terminal { rule } => self.terminal_retract(*rule, tuple),
            _ => Err(unexpected(node, "left")),
        }
    }

    fn right_assert(&mut self, node: NodeId, fact: FactId) -> Result<()> {
        trace!(node = node.index(), fact = %fact, "right assert");
        match self.kind(node) {
            NodeKind::Join { conditions, .. } => self.join_right_assert(node, conditions, fact),
            NodeKind::Existence {
                quantifier,
                conditions,
                ..
            } => self.existence_right_update(node, *quantifier, conditions, fact),
            NodeKind::Aggregate { conditions, .. } => {
                self.aggregate_right_update(node, conditions, fact)
            }
            _ => Err(unexpected(node, "right")),
        }
    }

    fn right_update(&mut self, node: NodeId, fact: FactId) -> Result<()> {
        trace!(node = node.index(), fact = %fact, "right update");
        match self.kind(node) {
            NodeKind::Join { conditions, .. } => self.join_right_update(node, conditions, fact),
            NodeKind::Existence {
                quantifier,
                conditions,
                ..
            } => self.existence_right_update(node, *quantifier, conditions, fact),
            NodeKind::Aggregate { conditions, .. } => {
                self.aggregate_right_update(node, conditions, fact)
            }
            _ => Err(unexpected(node, "right")),
        }
    }

    fn right_retract(&mut self, node: NodeId, fact: FactId) -> Result<()> {
        trace!(node = node.index(), fact = %fact, "right retract");
        match self.kind(node) {
            NodeKind::Join { .. } => self.join_right_retract(node, fact),
            NodeKind::Existence { quantifier, .. } => {
                self.existence_right_retract(node, *quantifier, fact)
            }
            NodeKind::Aggregate { .. } => self.aggregate_right_retract(node, fact),
            _ => Err(unexpected(node, "right")),
        }
    }

    // =========================================================================
    // Join
    // =========================================================================

    fn join_emit(&mut self, node: NodeId, tuple: TupleId, fact: FactId) -> Result<()> {
        let child = self.memory.tuples.extend(tuple, Some(fact));
        self.join_memory(node)?.children.insert((tuple, fact), child);
        self.assert_down(node, child)
    }

    fn join_withdraw(&mut self, node: NodeId, tuple: TupleId, fact: FactId) -> Result<()> {
        if let Some(child) = self.join_memory(node)?.children.remove(&(tuple, fact)) {
            self.retract_down(node, child)?;
            self.memory.tuples.retire(child);
        }
        Ok(())
    }

    /// Brings the child of one (tuple, fact) pair in line with the conditions.
    fn join_refresh(
        &mut self,
        node: NodeId,
        conditions: &[LhsExpression],
        tuple: TupleId,
        fact: FactId,
    ) -> Result<()> {
        let existing = self.join_memory(node)?.children.get(&(tuple, fact)).copied();
        match (existing, self.matches(node, conditions, tuple, fact)?) {
            (Some(child), true) => self.update_down(node, child),
            (Some(_), false) => self.join_withdraw(node, tuple, fact),
            (None, true) => self.join_emit(node, tuple, fact),
            (None, false) => Ok(()),
        }
    }

    fn join_left_assert(
        &mut self,
        node: NodeId,
        right: NodeId,
        conditions: &[LhsExpression],
        tuple: TupleId,
    ) -> Result<()> {
        self.join_memory(node)?.left.insert(tuple);
        for fact in self.right_facts(right)? {
            if self.matches(node, conditions, tuple, fact)? {
                self.join_emit(node, tuple, fact)?;
            }
        }
        Ok(())
    }

    fn join_left_update(
        &mut self,
        node: NodeId,
        right: NodeId,
        conditions: &[LhsExpression],
        tuple: TupleId,
    ) -> Result<()> {
        for fact in self.right_facts(right)? {
            self.join_refresh(node, conditions, tuple, fact)?;
        }
        Ok(())
    }

    fn join_left_retract(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        let children = {
            let memory = self.join_memory(node)?;
            memory.left.remove(&tuple);
            memory.children_of(tuple)
        };
        for (fact, _) in children.into_iter().rev() {
            self.join_withdraw(node, tuple, fact)?;
        }
        Ok(())
    }

    fn join_lefts(&mut self, node: NodeId) -> Result<Vec<TupleId>> {
        Ok(self.join_memory(node)?.left.iter().copied().collect())
    }

    fn join_right_assert(
        &mut self,
        node: NodeId,
        conditions: &[LhsExpression],
        fact: FactId,
    ) -> Result<()> {
        for tuple in self.join_lefts(node)? {
            if self.matches(node, conditions, tuple, fact)? {
                self.join_emit(node, tuple, fact)?;
            }
        }
        Ok(())
    }

    fn join_right_update(
        &mut self,
        node: NodeId,
        conditions: &[LhsExpression],
        fact: FactId,
    ) -> Result<()> {
        for tuple in self.join_lefts(node)? {
            self.join_refresh(node, conditions, tuple, fact)?;
        }
        Ok(())
    }

    fn join_right_retract(&mut self, node: NodeId, fact: FactId) -> Result<()> {
        for tuple in self.join_lefts(node)?.into_iter().rev() {
            self.join_withdraw(node, tuple, fact)?;
        }
        Ok(())
    }

    // =========================================================================
    // Not / Exists
    // =========================================================================

    /// Emits the child of a left tuple when the quantifier starts or stops
    /// passing. With `updated`, a surviving child is updated too.
    fn existence_sync(
        &mut self,
        node: NodeId,
        quantifier: Quantifier,
        tuple: TupleId,
        updated: bool,
    ) -> Result<()> {
        let Some(entry) = self.existence_memory(node)?.get(&tuple) else {
            return Ok(());
        };
        let passes = quantifier.passes(entry.matches.len());
        match (passes, entry.child) {
            (true, None) => {
                let child = self.memory.tuples.extend(tuple, None);
                if let Some(entry) = self.existence_memory(node)?.get_mut(&tuple) {
                    entry.child = Some(child);
                }
                self.assert_down(node, child)
            }
            (false, Some(child)) => {
                if let Some(entry) = self.existence_memory(node)?.get_mut(&tuple) {
                    entry.child = None;
                }
                self.retract_down(node, child)?;
                self.memory.tuples.retire(child);
                Ok(())
            }
            (true, Some(child)) if updated => self.update_down(node, child),
            _ => Ok(()),
        }
    }

    fn existence_matches(
        &mut self,
        node: NodeId,
        right: NodeId,
        conditions: &[LhsExpression],
        tuple: TupleId,
    ) -> Result<BTreeSet<FactId>> {
        let mut matches = BTreeSet::new();
        for fact in self.right_facts(right)? {
            if self.matches(node, conditions, tuple, fact)? {
                matches.insert(fact);
            }
        }
        Ok(matches)
    }

    fn existence_left_assert(
        &mut self,
        node: NodeId,
        quantifier: Quantifier,
        right: NodeId,
        conditions: &[LhsExpression],
        tuple: TupleId,
    ) -> Result<()> {
        let matches = self.existence_matches(node, right, conditions, tuple)?;
        self.existence_memory(node)?
            .insert(tuple, ExistenceEntry { matches, child: None });
        self.existence_sync(node, quantifier, tuple, false)
    }

    fn existence_left_update(
        &mut self,
        node: NodeId,
        quantifier: Quantifier,
        right: NodeId,
        conditions: &[LhsExpression],
        tuple: TupleId,
    ) -> Result<()> {
        let matches = self.existence_matches(node, right, conditions, tuple)?;
        match self.existence_memory(node)?.get_mut(&tuple) {
            Some(entry) => entry.matches = matches,
            None => return Ok(()),
        }
        self.existence_sync(node, quantifier, tuple, true)
    }

    fn existence_left_retract(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        let Some(entry) = self.existence_memory(node)?.remove(&tuple) else {
            return Ok(());
        };
        if let Some(child) = entry.child {
            self.retract_down(node, child)?;
            self.memory.tuples.retire(child);
        }
        Ok(())
    }

    /// Re-tests one right fact against every left tuple. Serves asserts too.
    fn existence_right_update(
        &mut self,
        node: NodeId,
        quantifier: Quantifier,
        conditions: &[LhsExpression],
        fact: FactId,
    ) -> Result<()> {
        let lefts: Vec<TupleId> = self.existence_memory(node)?.keys().copied().collect();
        for tuple in lefts {
            let matched = self.matches(node, conditions, tuple, fact)?;
            let changed = match self.existence_memory(node)?.get_mut(&tuple) {
                Some(entry) if matched => entry.matches.insert(fact),
                Some(entry) => entry.matches.remove(&fact),
                None => false,
            };
            if changed {
                self.existence_sync(node, quantifier, tuple, false)?;
            }
        }
        Ok(())
    }

    fn existence_right_retract(
        &mut self,
        node: NodeId,
        quantifier: Quantifier,
        fact: FactId,
    ) -> Result<()> {
        let lefts: Vec<TupleId> = self.existence_memory(node)?.keys().copied().collect();
        for tuple in lefts.into_iter().rev() {
            let removed = self
                .existence_memory(node)?
                .get_mut(&tuple)
                .is_some_and(|entry| entry.matches.remove(&fact));
            if removed {
                self.existence_sync(node, quantifier, tuple, false)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Aggregate
    // =========================================================================

    /// Hands a batch to the aggregator of one left tuple.
    fn aggregate_call(
        &mut self,
        node: NodeId,
        tuple: TupleId,
        batch: &[FactId],
        delta: Delta,
    ) -> Result<Vec<AggregationResult>> {
        let WorkingMemory {
            facts,
            tuples,
            nodes,
        } = &mut *self.memory;
        let (facts, tuples) = (&*facts, &*tuples);
        let NodeMemory::Aggregate(groups) = &mut nodes[node.index()] else {
            return Err(memory_mismatch(node));
        };
        let Some(group) = groups.get_mut(&tuple) else {
            return Ok(Vec::new());
        };

        // A wrapper's expressions see the group's tuple up to its last fact.
        let mut inputs = Vec::with_capacity(batch.len());
        for &id in batch {
            let context = match facts.get(id).and_then(Fact::wrapped_tuple) {
                Some(wrapped) => tuples.parent(wrapped).ok_or_else(|| {
                    Error::internal(format!("wrapper {id} has no enclosing tuple"))
                })?,
                None => tuple,
            };
            inputs.push((
                id,
                facts.resolve(tuples, id)?,
                ArenaTuple::new(tuples, facts, context),
            ));
        }
        let batch: Vec<AggregateFact<'_>> = inputs
            .iter()
            .map(|(id, value, context)| AggregateFact {
                id: *id,
                value,
                context,
            })
            .collect();

        let context = ArenaTuple::new(tuples, facts, tuple);
        match delta {
            Delta::Add => group.aggregator.add(&context, &batch),
            Delta::Modify => group.aggregator.modify(&context, &batch),
            Delta::Remove => group.aggregator.remove(&context, &batch),
        }
    }

    /// Turns aggregation results into derived facts and child tuples.
    ///
    /// Returns the children asserted or updated.
    fn aggregate_apply(
        &mut self,
        node: NodeId,
        tuple: TupleId,
        results: Vec<AggregationResult>,
    ) -> Result<Vec<TupleId>> {
        let mut touched = Vec::new();
        for result in results {
            trace!(node = node.index(), action = ?result.action, value = %result.aggregate, "aggregation result");
            self.events.emit_with(|| Event::Aggregation {
                action: result.action,
                value: result.aggregate.clone(),
            });
            match result.action {
                AggregationAction::Added => {
                    let fact = self
                        .memory
                        .facts
                        .insert(result.aggregate.clone(), FactOrigin::Derived);
                    let child = self.memory.tuples.extend(tuple, Some(fact));
                    self.aggregate_group(node, tuple)?.emitted.push(Emitted {
                        value: result.aggregate,
                        source: result.source,
                        fact,
                        tuple: child,
                    });
                    touched.push(child);
                    self.assert_down(node, child)?;
                }
                AggregationAction::Modified => {
                    let previous = result.previous.as_ref().unwrap_or(&result.aggregate);
                    let group = self.aggregate_group(node, tuple)?;
                    let index = locate_emitted(&group.emitted, previous, &result.source)
                        .ok_or_else(|| unknown_aggregate(node, previous))?;
                    let entry = &mut group.emitted[index];
                    entry.value = result.aggregate.clone();
                    entry.source = result.source;
                    let (fact, child) = (entry.fact, entry.tuple);
                    self.memory.facts.set_value(fact, result.aggregate)?;
                    touched.push(child);
                    self.update_down(node, child)?;
                }
                AggregationAction::Removed => {
                    let group = self.aggregate_group(node, tuple)?;
                    let index = locate_emitted(&group.emitted, &result.aggregate, &result.source)
                        .ok_or_else(|| unknown_aggregate(node, &result.aggregate))?;
                    let entry = group.emitted.remove(index);
                    self.retract_down(node, entry.tuple)?;
                    self.memory.tuples.retire(entry.tuple);
                    self.memory.facts.remove(entry.fact);
                }
            }
        }
        Ok(touched)
    }

    /// Runs one batch through the aggregator and applies its results.
    ///
    /// A fact whose expressions fail to evaluate is reported and left out of
    /// the group, like a fact failing a condition. The rest of its batch is
    /// retried fact by fact.
    fn aggregate_run(
        &mut self,
        node: NodeId,
        tuple: TupleId,
        batch: &[FactId],
        delta: Delta,
    ) -> Result<Vec<TupleId>> {
        let err = match self.aggregate_call(node, tuple, batch, delta) {
            Ok(results) => {
                self.aggregate_track(node, tuple, batch, delta)?;
                return self.aggregate_apply(node, tuple, results);
            }
            Err(err) => err,
        };
        if !err.is_evaluation_error() || matches!(delta, Delta::Remove) {
            return Err(err);
        }
        match batch {
            [] => Err(err),
            [fact] => {
                self.report(node, &err);
                if matches!(delta, Delta::Modify) {
                    self.aggregate_run(node, tuple, &[*fact], Delta::Remove)
                } else {
                    Ok(Vec::new())
                }
            }
            _ => {
                let mut touched = Vec::new();
                if matches!(delta, Delta::Add) {
                    // Lets an empty group still emit its initial value.
                    touched.extend(self.aggregate_run(node, tuple, &[], Delta::Add)?);
                }
                for fact in batch {
                    touched.extend(self.aggregate_run(node, tuple, &[*fact], delta)?);
                }
                Ok(touched)
            }
        }
    }

    /// Records which facts a group holds once the aggregator accepted them.
    fn aggregate_track(
        &mut self,
        node: NodeId,
        tuple: TupleId,
        batch: &[FactId],
        delta: Delta,
    ) -> Result<()> {
        let Some(group) = self.aggregate_memory(node)?.get_mut(&tuple) else {
            return Ok(());
        };
        match delta {
            Delta::Add => group.tracked.extend(batch.iter().copied()),
            Delta::Modify => {}
            Delta::Remove => {
                for fact in batch {
                    group.tracked.remove(fact);
                }
            }
        }
        Ok(())
    }

    fn aggregate_left_assert(
        &mut self,
        node: NodeId,
        right: NodeId,
        conditions: &[LhsExpression],
        spec: &AggregateSpec,
        tuple: TupleId,
    ) -> Result<()> {
        let aggregator = (spec.factory)(&spec.expressions)?;
        let mut batch = Vec::new();
        for fact in self.right_facts(right)? {
            if self.matches(node, conditions, tuple, fact)? {
                batch.push(fact);
            }
        }
        self.aggregate_memory(node)?.insert(
            tuple,
            AggregateGroup {
                aggregator,
                tracked: BTreeSet::new(),
                emitted: Vec::new(),
            },
        );
        // Runs even for an empty batch so aggregators can emit initial values.
        self.aggregate_run(node, tuple, &batch, Delta::Add)?;
        Ok(())
    }

    fn aggregate_left_update(
        &mut self,
        node: NodeId,
        right: NodeId,
        conditions: &[LhsExpression],
        tuple: TupleId,
    ) -> Result<()> {
        let tracked = self.aggregate_group(node, tuple)?.tracked.clone();
        let (mut added, mut modified, mut removed) = (Vec::new(), Vec::new(), Vec::new());
        for fact in self.right_facts(right)? {
            match (self.matches(node, conditions, tuple, fact)?, tracked.contains(&fact)) {
                (true, true) => modified.push(fact),
                (true, false) => added.push(fact),
                (false, true) => removed.push(fact),
                (false, false) => {}
            }
        }

        let mut touched = Vec::new();
        if !removed.is_empty() {
            touched.extend(self.aggregate_run(node, tuple, &removed, Delta::Remove)?);
        }
        if !modified.is_empty() {
            touched.extend(self.aggregate_run(node, tuple, &modified, Delta::Modify)?);
        }
        if !added.is_empty() {
            touched.extend(self.aggregate_run(node, tuple, &added, Delta::Add)?);
        }

        // The context changed under every remaining aggregate.
        let untouched: Vec<TupleId> = self
            .aggregate_group(node, tuple)?
            .emitted
            .iter()
            .map(|e| e.tuple)
            .filter(|child| !touched.contains(child))
            .collect();
        for child in untouched {
            self.update_down(node, child)?;
        }
        Ok(())
    }

    fn aggregate_left_retract(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        let Some(group) = self.aggregate_memory(node)?.remove(&tuple) else {
            return Ok(());
        };
        for entry in group.emitted.into_iter().rev() {
            self.events.emit_with(|| Event::Aggregation {
                action: AggregationAction::Removed,
                value: entry.value.clone(),
            });
            self.retract_down(node, entry.tuple)?;
            self.memory.tuples.retire(entry.tuple);
            self.memory.facts.remove(entry.fact);
        }
        Ok(())
    }

    /// Re-tests one right fact against every group. Serves asserts too.
    fn aggregate_right_update(
        &mut self,
        node: NodeId,
        conditions: &[LhsExpression],
        fact: FactId,
    ) -> Result<()> {
        let lefts: Vec<TupleId> = self.aggregate_memory(node)?.keys().copied().collect();
        for tuple in lefts {
            let matched = self.matches(node, conditions, tuple, fact)?;
            let tracked = self.aggregate_group(node, tuple)?.tracked.contains(&fact);
            let delta = match (matched, tracked) {
                (true, true) => Delta::Modify,
                (true, false) => Delta::Add,
                (false, true) => Delta::Remove,
                (false, false) => continue,
            };
            self.aggregate_run(node, tuple, &[fact], delta)?;
        }
        Ok(())
    }

    fn aggregate_right_retract(&mut self, node: NodeId, fact: FactId) -> Result<()> {
        let lefts: Vec<TupleId> = self.aggregate_memory(node)?.keys().copied().collect();
        for tuple in lefts.into_iter().rev() {
            if self.aggregate_group(node, tuple)?.tracked.contains(&fact) {
                self.aggregate_run(node, tuple, &[fact], Delta::Remove)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Filter
    // =========================================================================

    fn filter_holds(
        &mut self,
        node: NodeId,
        conditions: &[TupleExpression],
        tuple: TupleId,
    ) -> bool {
        let outcome = {
            let view = ArenaTuple::new(&self.memory.tuples, &self.memory.facts, tuple);
            all_hold(conditions, |c| c.invoke(&view))
        };
        match outcome {
            Ok(holds) => holds,
            Err(err) => {
                self.report(node, &err);
                false
            }
        }
    }

    fn filter_left_assert(
        &mut self,
        node: NodeId,
        conditions: &[TupleExpression],
        tuple: TupleId,
    ) -> Result<()> {
        if self.filter_holds(node, conditions, tuple) {
            self.filter_memory(node)?.insert(tuple);
            self.assert_down(node, tuple)?;
        }
        Ok(())
    }

    fn filter_left_update(
        &mut self,
        node: NodeId,
        conditions: &[TupleExpression],
        tuple: TupleId,
    ) -> Result<()> {
        let holds = self.filter_holds(node, conditions, tuple);
        let passed = self.filter_memory(node)?;
        match (passed.contains(&tuple), holds) {
            (true, true) => self.update_down(node, tuple),
            (false, true) => {
                passed.insert(tuple);
                self.assert_down(node, tuple)
            }
            (true, false) => {
                passed.remove(&tuple);
                self.retract_down(node, tuple)
            }
            (false, false) => Ok(()),
        }
    }

    fn filter_left_retract(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        if self.filter_memory(node)?.remove(&tuple) {
            self.retract_down(node, tuple)?;
        }
        Ok(())
    }

    // =========================================================================
    // Adapter
    // =========================================================================

    fn adapter_left_assert(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        let wrapper = self.memory.facts.insert_wrapper(tuple);
        self.adapter_memory(node)?.insert(tuple, wrapper);
        for &successor in self.successors(node) {
            self.right_assert(successor, wrapper)?;
        }
        Ok(())
    }

    fn adapter_left_update(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        let Some(wrapper) = self.adapter_memory(node)?.get(&tuple).copied() else {
            return Ok(());
        };
        for &successor in self.successors(node) {
            self.right_update(successor, wrapper)?;
        }
        Ok(())
    }

    fn adapter_left_retract(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        let Some(wrapper) = self.adapter_memory(node)?.remove(&tuple) else {
            return Ok(());
        };
        for &successor in self.successors(node).iter().rev() {
            self.right_retract(successor, wrapper)?;
        }
        self.memory.facts.remove(wrapper);
        Ok(())
    }

    // =========================================================================
    // Terminal
    // =========================================================================

    fn activation(&self, rule: RuleId, tuple: TupleId) -> Result<(ActivationKey, Snapshot)> {
        let snapshot = Snapshot::capture(&self.memory.tuples, &self.memory.facts, tuple)?;
        Ok((ActivationKey { rule, tuple }, snapshot))
    }

    fn notify(&mut self, change: ActivationChange, rule: RuleId, tuple: TupleId) {
        let network = self.network;
        if let Some(rule) = network.rule(rule) {
            self.events.emit_with(|| Event::Activation {
                change,
                rule: Arc::clone(&rule.definition().name),
                tuple,
            });
        }
    }

    fn terminal_assert(&mut self, rule: RuleId, tuple: TupleId) -> Result<()> {
        let network = self.network;
        let compiled = network
            .rule(rule)
            .ok_or_else(|| Error::internal(format!("unknown rule {}", rule.index())))?;
        let (key, snapshot) = self.activation(rule, tuple)?;
        self.agenda.add(Arc::clone(compiled), key, snapshot);
        self.notify(ActivationChange::Created, rule, tuple);
        Ok(())
    }

    /// Refreshes an activation. A non-repeatable rule does not re-queue for
    /// changes its own running actions make to the match.
    fn terminal_update(&mut self, rule: RuleId, tuple: TupleId) -> Result<()> {
        let network = self.network;
        let compiled = network
            .rule(rule)
            .ok_or_else(|| Error::internal(format!("unknown rule {}", rule.index())))?;
        let (key, snapshot) = self.activation(rule, tuple)?;
        let suppress = compiled.repeatability() == Repeatability::NonRepeatable
            && self.firing == Some(key);
        self.agenda.modify(key, snapshot, suppress);
        self.notify(ActivationChange::Updated, rule, tuple);
        Ok(())
    }

    fn terminal_retract(&mut self, rule: RuleId, tuple: TupleId) -> Result<()> {
        if self.agenda.remove(ActivationKey { rule, tuple }).is_some() {
            self.notify(ActivationChange::Deleted, rule, tuple);
        }
        Ok(())
    }
}

fn unknown_aggregate(node: NodeId, value: &Value) -> Error {
    Error::internal(format!(
        "aggregate node {} has no emitted value {value}",
        node.index()
    ))
}
