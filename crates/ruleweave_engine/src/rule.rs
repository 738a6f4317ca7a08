//! Compiled rules.
//!
//! A compiled rule is what the network keeps of a [`RuleDefinition`] once its
//! left-hand side has been turned into nodes: the ordering attributes the
//! agenda needs, the compiled actions, and the map from declarations to the
//! positions of the terminal tuple.

use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::{FactId, Value};
use ruleweave_model::{
    ActionTrigger, Declaration, DependencyDeclaration, Repeatability, RuleDefinition,
};

use crate::binder::CompiledAction;
use crate::index_map::IndexMap;
use crate::tuple::{Snapshot, TupleView};

/// Index of a rule within its network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(usize);

impl RuleId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A declaration bound in a match, with its fact and value.
#[derive(Clone, Debug, PartialEq)]
pub struct FactBinding {
    /// Declaration name
    pub declaration: Arc<str>,
    /// Bound fact
    pub fact: FactId,
    /// Value at the time the activation was captured
    pub value: Value,
}

// =============================================================================
// Compiled Rule
// =============================================================================

/// A rule attached to a network. Immutable once built.
#[derive(Clone)]
pub struct CompiledRule {
    id: RuleId,
    definition: Arc<RuleDefinition>,
    declarations: Vec<Declaration>,
    actions: Vec<CompiledAction>,
    fact_map: IndexMap,
}

impl CompiledRule {
    pub(crate) fn new(
        id: RuleId,
        definition: RuleDefinition,
        actions: Vec<CompiledAction>,
        fact_map: IndexMap,
    ) -> Self {
        let declarations = definition.declarations();
        Self {
            id,
            definition: Arc::new(definition),
            declarations,
            actions,
            fact_map,
        }
    }

    /// The rule's index in its network.
    #[must_use]
    pub const fn id(&self) -> RuleId {
        self.id
    }

    /// Rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The definition the rule was compiled from.
    #[must_use]
    pub fn definition(&self) -> &Arc<RuleDefinition> {
        &self.definition
    }

    /// Priority; higher fires first.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.definition.priority
    }

    /// Re-activation policy.
    #[must_use]
    pub fn repeatability(&self) -> Repeatability {
        self.definition.repeatability
    }

    /// Every declaration of the rule, left to right.
    #[must_use]
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Compiled actions, in definition order.
    #[must_use]
    pub fn actions(&self) -> &[CompiledAction] {
        &self.actions
    }

    /// Dependencies the actions may resolve.
    #[must_use]
    pub fn dependencies(&self) -> &[DependencyDeclaration] {
        &self.definition.dependencies
    }

    /// Map from declaration index to terminal tuple position.
    #[must_use]
    pub fn fact_map(&self) -> &IndexMap {
        &self.fact_map
    }

    /// Terminal tuple position of a declaration, if it is visible.
    #[must_use]
    pub fn position_of(&self, declaration: &str) -> Option<usize> {
        let index = self
            .declarations
            .iter()
            .position(|d| &*d.name == declaration)?;
        self.fact_map.get(index)
    }

    /// Returns true if any action runs when a fired match goes away.
    #[must_use]
    pub fn has_deactivation_actions(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.trigger().contains(ActionTrigger::DEACTIVATED))
    }

    /// Visible bindings of a snapshot, in declaration order.
    #[must_use]
    pub fn bindings(&self, snapshot: &Snapshot) -> Vec<FactBinding> {
        self.declarations
            .iter()
            .enumerate()
            .filter_map(|(index, declaration)| {
                let position = self.fact_map.get(index)?;
                Some(FactBinding {
                    declaration: Arc::clone(&declaration.name),
                    fact: snapshot.fact_at(position)?,
                    value: snapshot.value_at(position)?,
                })
            })
            .collect()
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("repeatability", &self.repeatability())
            .field("declarations", &self.declarations)
            .field("actions", &self.actions)
            .field("fact_map", &self.fact_map)
            .finish()
    }
}
