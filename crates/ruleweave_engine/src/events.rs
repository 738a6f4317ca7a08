//! Session events: listeners and a bounded in-memory log.
//!
//! Every fact operation, agenda change, firing, aggregation result and
//! failed condition is described by an [`Event`]. Events go to registered
//! [`EventListener`]s and, if the session records them, to its [`EventLog`].

use std::collections::VecDeque;
use std::sync::Arc;

use ruleweave_foundation::{FactId, Value};
use ruleweave_model::ActionTrigger;

use crate::aggregation::AggregationAction;
use crate::rule::FactBinding;
use crate::tuple::TupleId;

// =============================================================================
// Events
// =============================================================================

/// What happened to a fact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactChange {
    /// Inserted into working memory.
    Inserted,
    /// Value replaced.
    Updated,
    /// Removed from working memory.
    Retracted,
}

/// What happened to an activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationChange {
    /// A new match reached a terminal node.
    Created,
    /// A match was updated in place.
    Updated,
    /// A match went away.
    Deleted,
}

/// A session event.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A fact was inserted, updated or retracted.
    Fact {
        /// What happened
        change: FactChange,
        /// The fact
        fact: FactId,
        /// Its value after the change (before it, for a retraction)
        value: Value,
    },
    /// An activation was created, updated or deleted.
    Activation {
        /// What happened
        change: ActivationChange,
        /// Rule name
        rule: Arc<str>,
        /// Matched tuple
        tuple: TupleId,
    },
    /// A rule's actions ran.
    RuleFired {
        /// Rule name
        rule: Arc<str>,
        /// Why it fired
        trigger: ActionTrigger,
        /// Matched facts in declaration order
        facts: Vec<FactBinding>,
    },
    /// An aggregate node emitted a result.
    Aggregation {
        /// Kind of change
        action: AggregationAction,
        /// Aggregate value
        value: Value,
    },
    /// A condition failed to evaluate and was treated as not satisfied.
    ConditionFailed {
        /// The evaluation error
        message: String,
    },
}

impl Event {
    /// Hands the event to the matching listener callback.
    pub fn dispatch(&self, listener: &mut dyn EventListener) {
        match self {
            Self::Fact {
                change,
                fact,
                value,
            } => listener.on_fact(*change, *fact, value),
            Self::Activation {
                change,
                rule,
                tuple,
            } => listener.on_activation(*change, rule, *tuple),
            Self::RuleFired {
                rule,
                trigger,
                facts,
            } => listener.on_rule_fired(rule, *trigger, facts),
            Self::Aggregation { action, value } => listener.on_aggregation(*action, value),
            Self::ConditionFailed { message } => listener.on_condition_failed(message),
        }
    }
}

/// Receives session events. Every callback defaults to doing nothing.
pub trait EventListener: Send {
    /// A fact changed.
    fn on_fact(&mut self, _change: FactChange, _fact: FactId, _value: &Value) {}

    /// An activation changed.
    fn on_activation(&mut self, _change: ActivationChange, _rule: &str, _tuple: TupleId) {}

    /// A rule fired.
    fn on_rule_fired(&mut self, _rule: &str, _trigger: ActionTrigger, _facts: &[FactBinding]) {}

    /// An aggregate result was emitted.
    fn on_aggregation(&mut self, _action: AggregationAction, _value: &Value) {}

    /// A condition failed to evaluate.
    fn on_condition_failed(&mut self, _message: &str) {}
}

// =============================================================================
// Event Log
// =============================================================================

/// An event with its sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    /// Sequence number, increasing over the session's lifetime
    pub id: u64,
    /// The event
    pub event: Event,
}

/// A ring buffer of the most recent events.
///
/// Holds at most `max_size` records and discards the oldest when full. A
/// log with `max_size` 0 records nothing.
#[derive(Clone, Debug)]
pub struct EventLog {
    records: VecDeque<EventRecord>,
    max_size: usize,
    next_id: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EventLog {
    /// Creates a log holding at most `max_size` records.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            next_id: 0,
        }
    }

    /// Returns true if the log keeps anything.
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.max_size > 0
    }

    /// Appends an event, returning its sequence number.
    pub fn push(&mut self, event: Event) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.max_size == 0 {
            return id;
        }
        self.records.push_back(EventRecord { id, event });
        while self.records.len() > self.max_size {
            self.records.pop_front();
        }
        id
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// Events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.records.iter().map(|r| &r.event)
    }

    /// The most recent `n` records, oldest first.
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<&EventRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).collect()
    }

    /// Drops every record. Sequence numbers keep increasing.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

// =============================================================================
// Event Hub
// =============================================================================

/// Fans events out to listeners and the log.
#[derive(Default)]
pub(crate) struct EventHub {
    log: EventLog,
    listeners: Vec<Box<dyn EventListener>>,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            log: EventLog::new(capacity),
            listeners: Vec::new(),
        }
    }

    /// Returns true if an emitted event would be observed.
    pub(crate) fn is_observed(&self) -> bool {
        self.log.is_recording() || !self.listeners.is_empty()
    }

    pub(crate) fn emit(&mut self, event: Event) {
        for listener in &mut self.listeners {
            event.dispatch(listener.as_mut());
        }
        self.log.push(event);
    }

    /// Emits the event built by `f`, building it only if someone is watching.
    pub(crate) fn emit_with(&mut self, f: impl FnOnce() -> Event) {
        if self.is_observed() {
            self.emit(f());
        }
    }

    pub(crate) fn subscribe(&mut self, listener: Box<dyn EventListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn log(&self) -> &EventLog {
        &self.log
    }

    pub(crate) fn log_mut(&mut self) -> &mut EventLog {
        &mut self.log
    }
}
