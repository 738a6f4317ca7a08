//! Complete rule definitions.

use std::collections::HashSet;
use std::sync::Arc;

use ruleweave_foundation::{Error, ErrorKind, Result};

use crate::declaration::{Declaration, DependencyDeclaration};
use crate::element::{ActionElement, RuleElement};

/// Whether a rule may re-activate for a match it already fired on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Repeatability {
    /// Updates to the matched facts always re-activate the rule.
    #[default]
    Repeatable,
    /// Updates made by the rule's own actions on its current match do not
    /// re-activate it; updates from anywhere else still do.
    NonRepeatable,
}

/// A fully resolved rule, as handed to the engine for compilation.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleDefinition {
    /// Rule name
    pub name: Arc<str>,
    /// Free-form description
    pub description: String,
    /// Priority (higher fires first), default 0
    pub priority: i32,
    /// Re-activation policy
    pub repeatability: Repeatability,
    /// Left-hand side, in order
    pub lhs: Vec<RuleElement>,
    /// Right-hand side, in order
    pub actions: Vec<ActionElement>,
    /// External services actions may use
    pub dependencies: Vec<DependencyDeclaration>,
}

impl RuleDefinition {
    /// Creates an empty rule with the given name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            priority: 0,
            repeatability: Repeatability::default(),
            lhs: Vec::new(),
            actions: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the repeatability.
    #[must_use]
    pub fn with_repeatability(mut self, repeatability: Repeatability) -> Self {
        self.repeatability = repeatability;
        self
    }

    /// Appends a left-hand side element.
    #[must_use]
    pub fn with_element(mut self, element: RuleElement) -> Self {
        self.lhs.push(element);
        self
    }

    /// Appends an action.
    #[must_use]
    pub fn with_action(mut self, action: ActionElement) -> Self {
        self.actions.push(action);
        self
    }

    /// Declares a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: DependencyDeclaration) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Every declaration of the rule, nested ones included, left to right.
    #[must_use]
    pub fn declarations(&self) -> Vec<Declaration> {
        self.lhs.iter().flat_map(RuleElement::declarations).collect()
    }

    /// Checks that declaration and dependency names are unique.
    ///
    /// # Errors
    /// Returns `DuplicateDeclaration` naming the first repeated name.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let names = self
            .declarations()
            .into_iter()
            .map(|d| d.name)
            .chain(self.dependencies.iter().map(|d| Arc::clone(&d.name)));
        for name in names {
            if !seen.insert(Arc::clone(&name)) {
                return Err(Error::new(ErrorKind::DuplicateDeclaration(name.to_string()))
                    .in_rule(&self.name));
            }
        }
        Ok(())
    }
}
