//! The agenda: activations waiting to fire.
//!
//! Activations are ordered by rule priority (higher first) and then by the
//! order they were queued. An activation updated while queued keeps its
//! place. One updated after it fired is queued again as a reactivation, and
//! one retracted after it fired is queued as a deactivation if its rule has
//! actions for that.
//!
//! Agenda filters decide whether an activation may be queued. A rejected
//! activation stays known to the agenda and is reconsidered when its match is
//! updated.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::{FactId, Value};
use ruleweave_model::ActionTrigger;
use tracing::trace;

use crate::rule::{CompiledRule, RuleId};
use crate::tuple::{Snapshot, TupleId, TupleView};

/// Identifies an activation: one rule matched by one tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActivationKey {
    /// The rule
    pub rule: RuleId,
    /// The terminal tuple
    pub tuple: TupleId,
}

type QueuePosition = (Reverse<i32>, u64);

// =============================================================================
// Activation
// =============================================================================

/// A rule match known to the agenda.
#[derive(Clone)]
pub struct Activation {
    key: ActivationKey,
    rule: Arc<CompiledRule>,
    snapshot: Snapshot,
    trigger: ActionTrigger,
    fired: bool,
    queued: Option<QueuePosition>,
}

impl Activation {
    /// Rule and tuple.
    #[must_use]
    pub const fn key(&self) -> ActivationKey {
        self.key
    }

    /// The matched rule.
    #[must_use]
    pub fn rule(&self) -> &Arc<CompiledRule> {
        &self.rule
    }

    /// Rule priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.rule.priority()
    }

    /// The matched facts and their values, as last captured.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Why the activation is queued.
    #[must_use]
    pub const fn trigger(&self) -> ActionTrigger {
        self.trigger
    }

    /// Returns true if the activation has fired at least once.
    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.fired
    }

    /// Returns true if the activation is waiting to fire.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.queued.is_some()
    }

    /// The fact bound to a visible declaration.
    #[must_use]
    pub fn fact(&self, declaration: &str) -> Option<FactId> {
        self.snapshot
            .fact_at(self.rule.position_of(declaration)?)
    }

    /// The value bound to a visible declaration.
    #[must_use]
    pub fn value(&self, declaration: &str) -> Option<Value> {
        self.snapshot
            .value_at(self.rule.position_of(declaration)?)
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("rule", &self.rule.name())
            .field("tuple", &self.key.tuple)
            .field("trigger", &self.trigger)
            .field("fired", &self.fired)
            .field("queued", &self.queued.is_some())
            .finish()
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Decides whether an activation may fire.
pub trait AgendaFilter: Send + Sync {
    /// Returns false to keep the activation from being queued.
    fn accept(&self, activation: &Activation) -> bool;
}

impl<F> AgendaFilter for F
where
    F: Fn(&Activation) -> bool + Send + Sync,
{
    fn accept(&self, activation: &Activation) -> bool {
        self(activation)
    }
}

#[derive(Clone, Default)]
struct Filters {
    global: Vec<Arc<dyn AgendaFilter>>,
    by_rule: HashMap<Arc<str>, Vec<Arc<dyn AgendaFilter>>>,
}

impl Filters {
    fn accept(&self, activation: &Activation) -> bool {
        let rule_filters = self
            .by_rule
            .get(activation.rule.name())
            .map_or(&[][..], Vec::as_slice);
        self.global
            .iter()
            .chain(rule_filters)
            .all(|filter| filter.accept(activation))
    }
}

// =============================================================================
// Agenda
// =============================================================================

enum Entry {
    Activation(ActivationKey),
    Deactivation(Box<Activation>),
}

/// Activations of one session.
#[derive(Default)]
pub struct Agenda {
    queue: BTreeMap<QueuePosition, Entry>,
    activations: HashMap<ActivationKey, Activation>,
    filters: Filters,
    next_sequence: u64,
}

impl Agenda {
    /// Creates an empty agenda.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter consulted for every activation.
    pub fn add_filter(&mut self, filter: impl AgendaFilter + 'static) {
        self.filters.global.push(Arc::new(filter));
    }

    /// Adds a filter consulted for activations of one rule.
    pub fn add_rule_filter(
        &mut self,
        rule: impl Into<Arc<str>>,
        filter: impl AgendaFilter + 'static,
    ) {
        self.filters
            .by_rule
            .entry(rule.into())
            .or_default()
            .push(Arc::new(filter));
    }

    /// Number of entries waiting to fire.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is waiting to fire.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Waiting entries in firing order.
    pub fn pending(&self) -> impl Iterator<Item = &Activation> {
        self.queue.values().filter_map(|entry| match entry {
            Entry::Activation(key) => self.activations.get(key),
            Entry::Deactivation(activation) => Some(activation.as_ref()),
        })
    }

    /// Looks up a live activation, queued or not.
    #[must_use]
    pub fn get(&self, key: &ActivationKey) -> Option<&Activation> {
        self.activations.get(key)
    }

    /// Number of live activations, queued or not.
    #[must_use]
    pub fn activation_count(&self) -> usize {
        self.activations.len()
    }

    fn next_position(&mut self, priority: i32) -> QueuePosition {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        (Reverse(priority), sequence)
    }

    fn enqueue(&mut self, key: ActivationKey) {
        let priority = match self.activations.get(&key) {
            Some(activation) if self.filters.accept(activation) => activation.priority(),
            Some(activation) => {
                trace!(rule = activation.rule.name(), "activation rejected by filter");
                return;
            }
            None => return,
        };
        let position = self.next_position(priority);
        self.queue.insert(position, Entry::Activation(key));
        if let Some(activation) = self.activations.get_mut(&key) {
            activation.queued = Some(position);
        }
    }

    /// Records a new match.
    pub fn add(&mut self, rule: Arc<CompiledRule>, key: ActivationKey, snapshot: Snapshot) {
        let activation = Activation {
            key,
            rule,
            snapshot,
            trigger: ActionTrigger::ACTIVATED,
            fired: false,
            queued: None,
        };
        if let Some(old) = self.activations.insert(key, activation) {
            if let Some(position) = old.queued {
                self.queue.remove(&position);
            }
        }
        self.enqueue(key);
    }

    /// Replaces the snapshot of an updated match.
    ///
    /// A queued activation keeps its place while the filters still accept
    /// it, and is unqueued otherwise. An unqueued one is queued again unless
    /// `suppress` is set. Returns true if the activation is queued afterwards.
    pub fn modify(&mut self, key: ActivationKey, snapshot: Snapshot, suppress: bool) -> bool {
        let Some(activation) = self.activations.get_mut(&key) else {
            return false;
        };
        activation.snapshot = snapshot;
        if let Some(position) = activation.queued {
            if self.filters.accept(activation) {
                return true;
            }
            trace!(rule = activation.rule.name(), "queued activation rejected by filter");
            self.queue.remove(&position);
            activation.queued = None;
            return false;
        }
        if suppress {
            return false;
        }
        activation.trigger = if activation.fired {
            ActionTrigger::REACTIVATED
        } else {
            ActionTrigger::ACTIVATED
        };
        self.enqueue(key);
        self.activations
            .get(&key)
            .is_some_and(Activation::is_queued)
    }

    /// Forgets a match that went away.
    ///
    /// If it had fired and its rule reacts to deactivation, a deactivation
    /// entry is queued in its place.
    pub fn remove(&mut self, key: ActivationKey) -> Option<Activation> {
        let mut activation = self.activations.remove(&key)?;
        if let Some(position) = activation.queued.take() {
            self.queue.remove(&position);
        }
        if activation.fired && activation.rule.has_deactivation_actions() {
            let mut deactivation = activation.clone();
            deactivation.trigger = ActionTrigger::DEACTIVATED;
            let position = self.next_position(deactivation.priority());
            deactivation.queued = Some(position);
            self.queue
                .insert(position, Entry::Deactivation(Box::new(deactivation)));
        }
        Some(activation)
    }

    /// Takes the next entry to fire and marks it fired.
    pub fn pop(&mut self) -> Option<Activation> {
        while let Some((_, entry)) = self.queue.pop_first() {
            match entry {
                Entry::Activation(key) => {
                    let Some(activation) = self.activations.get_mut(&key) else {
                        continue;
                    };
                    activation.queued = None;
                    activation.fired = true;
                    return Some(activation.clone());
                }
                Entry::Deactivation(mut activation) => {
                    activation.queued = None;
                    return Some(*activation);
                }
            }
        }
        None
    }
}

impl fmt::Debug for Agenda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agenda")
            .field("pending", &self.pending().collect::<Vec<_>>())
            .field("activations", &self.activations.len())
            .finish_non_exhaustive()
    }
}
