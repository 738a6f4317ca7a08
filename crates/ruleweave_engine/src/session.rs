//! Sessions: working memory over a shared network.
//!
//! A [`Session`] owns every piece of mutable state: the fact store, the tuple
//! arena, the memories of every node and the agenda. Fact operations
//! propagate synchronously, so the agenda is up to date as soon as they
//! return. [`Session::fire`] then runs activations until the agenda is empty,
//! an action halts, or the kill switch trips.

use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::{Error, ErrorKind, FactId, Result, SemanticLimit, Value};
use ruleweave_model::{ActionContext, ActionTrigger};
use tracing::{debug, warn};

use crate::agenda::{Activation, ActivationKey, Agenda, AgendaFilter};
use crate::binder::{DependencyResolver, NoDependencies, ResolutionContext};
use crate::config::SessionConfig;
use crate::events::{Event, EventHub, EventListener, EventLog, FactChange};
use crate::fact::FactOrigin;
use crate::network::{Network, Propagator, WorkingMemory};
use crate::rule::CompiledRule;
use crate::tuple::Snapshot;

/// Outcome of one firing loop.
#[derive(Debug, Default)]
pub struct FireSummary {
    /// Activations whose actions completed.
    pub fired: usize,
    /// Activations skipped because a dependency could not be resolved.
    pub failures: Vec<Error>,
    /// True if an action asked the loop to stop.
    pub halted: bool,
}

/// A working memory bound to a network.
pub struct Session {
    network: Arc<Network>,
    memory: WorkingMemory,
    agenda: Agenda,
    events: EventHub,
    config: SessionConfig,
    resolver: Arc<dyn DependencyResolver>,
    firing: Option<ActivationKey>,
    halted: bool,
}

impl Session {
    /// Opens a session with the default configuration.
    ///
    /// # Errors
    /// Returns an error if an aggregate at the start of a rule fails to
    /// produce its initial value.
    pub fn new(network: Arc<Network>) -> Result<Self> {
        Self::with_config(network, SessionConfig::default())
    }

    /// Opens a session.
    ///
    /// # Errors
    /// Same as [`Session::new`].
    pub fn with_config(network: Arc<Network>, config: SessionConfig) -> Result<Self> {
        let mut session = Self {
            memory: WorkingMemory::new(&network),
            network,
            agenda: Agenda::new(),
            events: EventHub::new(config.event_capacity),
            config,
            resolver: Arc::new(NoDependencies),
            firing: None,
            halted: false,
        };
        session.propagator().seed()?;
        Ok(session)
    }

    /// Builder method to set the dependency resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl DependencyResolver + 'static) -> Self {
        self.set_resolver(resolver);
        self
    }

    /// Replaces the dependency resolver.
    pub fn set_resolver(&mut self, resolver: impl DependencyResolver + 'static) {
        self.resolver = Arc::new(resolver);
    }

    /// Registers an event listener.
    pub fn add_listener(&mut self, listener: impl EventListener + 'static) {
        self.events.subscribe(Box::new(listener));
    }

    /// Adds an agenda filter consulted for every activation.
    pub fn add_filter(&mut self, filter: impl AgendaFilter + 'static) {
        self.agenda.add_filter(filter);
    }

    /// Adds an agenda filter consulted for activations of one rule.
    pub fn add_rule_filter(&mut self, rule: impl Into<Arc<str>>, filter: impl AgendaFilter + 'static) {
        self.agenda.add_rule_filter(rule, filter);
    }

    /// The network this session runs.
    #[must_use]
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// The session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Recorded events.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        self.events.log()
    }

    /// Drops recorded events.
    pub fn clear_events(&mut self) {
        self.events.log_mut().clear();
    }

    fn propagator(&mut self) -> Propagator<'_> {
        Propagator {
            network: &self.network,
            memory: &mut self.memory,
            agenda: &mut self.agenda,
            events: &mut self.events,
            firing: self.firing,
        }
    }

    // =========================================================================
    // Facts
    // =========================================================================

    /// Inserts a fact and propagates it.
    ///
    /// # Errors
    /// Returns an error if propagation fails.
    pub fn insert(&mut self, value: Value) -> Result<FactId> {
        let id = self.memory.facts.insert(value, FactOrigin::External);
        debug!(fact = %id, "insert");
        self.propagator().assert_fact(id)?;
        self.emit_fact(FactChange::Inserted, id);
        Ok(id)
    }

    /// Inserts facts one after the other.
    ///
    /// # Errors
    /// Stops at the first propagation failure; facts inserted before it stay.
    pub fn insert_all(&mut self, values: impl IntoIterator<Item = Value>) -> Result<Vec<FactId>> {
        values.into_iter().map(|value| self.insert(value)).collect()
    }

    /// Replaces the value of a fact, keeping its identity.
    ///
    /// # Errors
    /// Returns `FactNotFound` if the fact was not inserted through the session
    /// or is gone, or an error if propagation fails.
    pub fn update(&mut self, id: FactId, value: Value) -> Result<()> {
        self.ensure_external(id)?;
        debug!(fact = %id, "update");
        self.memory.facts.set_value(id, value)?;
        self.propagator().update_fact(id)?;
        self.emit_fact(FactChange::Updated, id);
        Ok(())
    }

    /// Removes a fact and everything derived from it.
    ///
    /// # Errors
    /// Returns `FactNotFound` if the fact was not inserted through the session
    /// or is gone, or an error if propagation fails.
    pub fn retract(&mut self, id: FactId) -> Result<()> {
        self.ensure_external(id)?;
        debug!(fact = %id, "retract");
        self.propagator().retract_fact(id)?;
        self.emit_fact(FactChange::Retracted, id);
        self.memory.facts.remove(id);
        Ok(())
    }

    /// Value of a fact, including facts produced by aggregates.
    #[must_use]
    pub fn get(&self, id: FactId) -> Option<&Value> {
        self.memory.facts.get(id)?.raw_value()
    }

    /// Returns true if the fact is in working memory.
    #[must_use]
    pub fn contains(&self, id: FactId) -> bool {
        self.memory.facts.contains(id)
    }

    /// Facts inserted through the session or by actions, oldest first.
    pub fn facts(&self) -> impl Iterator<Item = (FactId, &Value)> {
        self.memory
            .facts
            .external()
            .filter_map(|fact| Some((fact.id(), fact.raw_value()?)))
    }

    /// Number of facts inserted through the session or by actions.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.memory.facts.external().count()
    }

    fn ensure_external(&self, id: FactId) -> Result<()> {
        match self.memory.facts.get(id) {
            Some(fact) if !fact.is_derived() => Ok(()),
            _ => Err(Error::fact_not_found(id)),
        }
    }

    fn emit_fact(&mut self, change: FactChange, id: FactId) {
        if !self.events.is_observed() {
            return;
        }
        if let Some(value) = self.get(id).cloned() {
            self.events.emit(Event::Fact {
                change,
                fact: id,
                value,
            });
        }
    }

    // =========================================================================
    // Agenda
    // =========================================================================

    /// Number of entries waiting to fire.
    #[must_use]
    pub fn agenda_len(&self) -> usize {
        self.agenda.len()
    }

    /// Waiting entries in firing order.
    pub fn activations(&self) -> impl Iterator<Item = &Activation> {
        self.agenda.pending()
    }

    /// Fires activations until the agenda is empty or an action halts.
    ///
    /// # Errors
    /// Returns `LimitExceeded` once `max_fires` activations have fired and
    /// more are waiting, and `ActionFailed` when an action fails. Effects of
    /// activations fired before the error stay.
    pub fn fire(&mut self) -> Result<FireSummary> {
        self.run(self.config.max_fires, true)
    }

    /// Fires at most `max` activations.
    ///
    /// # Errors
    /// Returns `ActionFailed` when an action fails.
    pub fn fire_limit(&mut self, max: usize) -> Result<FireSummary> {
        self.run(max, false)
    }

    fn run(&mut self, limit: usize, strict: bool) -> Result<FireSummary> {
        let mut summary = FireSummary::default();
        let mut attempts = 0;
        let mut last_rule: Option<Arc<str>> = None;
        self.halted = false;
        loop {
            if self.halted {
                summary.halted = true;
                break;
            }
            if self.agenda.is_empty() {
                break;
            }
            if attempts == limit {
                if !strict {
                    break;
                }
                warn!(limit, "kill switch triggered");
                return Err(Error::limit_exceeded(SemanticLimit::MaxActivations {
                    limit: u32::try_from(limit).unwrap_or(u32::MAX),
                    context: last_rule.map(|rule| format!("last fired rule {rule}")),
                }));
            }
            let Some(activation) = self.agenda.pop() else {
                break;
            };
            attempts += 1;
            let rule = Arc::clone(activation.rule());
            last_rule = Some(Arc::clone(&rule.definition().name));
            match self.fire_activation(&rule, &activation) {
                Ok(()) => summary.fired += 1,
                Err(err) if matches!(err.kind, ErrorKind::DependencyResolution { .. }) => {
                    warn!(rule = rule.name(), error = %err, "activation skipped");
                    summary.failures.push(err);
                }
                Err(err) => {
                    return Err(Error::new(ErrorKind::ActionFailed {
                        rule: rule.name().to_string(),
                        message: err.to_string(),
                    })
                    .in_rule(rule.name()));
                }
            }
        }
        debug!(fired = summary.fired, halted = summary.halted, "fire finished");
        Ok(summary)
    }

    fn fire_activation(&mut self, rule: &CompiledRule, activation: &Activation) -> Result<()> {
        let trigger = activation.trigger();
        debug!(rule = rule.name(), trigger = ?trigger, "firing");
        self.firing = (!trigger.contains(ActionTrigger::DEACTIVATED)).then_some(activation.key());
        let outcome = self.run_actions(rule, activation.snapshot(), trigger);
        self.firing = None;
        outcome?;
        self.events.emit_with(|| Event::RuleFired {
            rule: Arc::clone(&rule.definition().name),
            trigger,
            facts: rule.bindings(activation.snapshot()),
        });
        Ok(())
    }

    fn run_actions(
        &mut self,
        rule: &CompiledRule,
        snapshot: &Snapshot,
        trigger: ActionTrigger,
    ) -> Result<()> {
        let resolver = Arc::clone(&self.resolver);
        let resolution = ResolutionContext {
            rule: Arc::clone(&rule.definition().name),
        };
        for action in rule
            .actions()
            .iter()
            .filter(|action| action.trigger().contains(trigger))
        {
            let mut context = FiringContext {
                session: &mut *self,
                rule,
                snapshot,
                trigger,
            };
            action.invoke(&mut context, snapshot, resolver.as_ref(), &resolution)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("facts", &self.memory.facts.len())
            .field("tuples", &self.memory.tuples.live())
            .field("agenda", &self.agenda)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Firing Context
// =============================================================================

/// What an action sees of the session while it runs.
struct FiringContext<'s> {
    session: &'s mut Session,
    rule: &'s CompiledRule,
    snapshot: &'s Snapshot,
    trigger: ActionTrigger,
}

impl ActionContext for FiringContext<'_> {
    fn rule_name(&self) -> &str {
        self.rule.name()
    }

    fn trigger(&self) -> ActionTrigger {
        self.trigger
    }

    fn fact(&self, declaration: &str) -> Option<FactId> {
        self.snapshot.fact_at(self.rule.position_of(declaration)?)
    }

    fn insert(&mut self, value: Value) -> Result<FactId> {
        self.session.insert(value)
    }

    fn update(&mut self, fact: FactId, value: Value) -> Result<()> {
        self.session.update(fact, value)
    }

    fn retract(&mut self, fact: FactId) -> Result<()> {
        self.session.retract(fact)
    }

    fn halt(&mut self) {
        self.session.halted = true;
    }
}
