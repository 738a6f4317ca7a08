//! Pattern variable and dependency declarations.

use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::Type;

/// A named, typed pattern variable.
///
/// Declarations are ordered left to right as the rule's patterns appear, and
/// that order is the basis of every index map the engine builds.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Declaration {
    /// Variable name, unique within a rule.
    pub name: Arc<str>,
    /// Type of the facts this variable binds to.
    pub fact_type: Type,
}

impl Declaration {
    /// Creates a declaration.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, fact_type: Type) -> Self {
        Self {
            name: name.into(),
            fact_type,
        }
    }
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.fact_type)
    }
}

/// A named external service an action may use.
///
/// Dependencies are resolved when the rule fires and are never stored in
/// working memory.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DependencyDeclaration {
    /// Name the action refers to.
    pub name: Arc<str>,
    /// Service type name, handed to the resolver.
    pub type_name: Arc<str>,
}

impl DependencyDeclaration {
    /// Creates a dependency declaration.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, type_name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}
