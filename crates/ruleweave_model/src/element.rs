//! Left-hand side elements and right-hand side actions of a rule.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::{FactId, Result, Value};

use crate::ast::Expr;
use crate::declaration::Declaration;

// =============================================================================
// Left-hand side
// =============================================================================

/// Matches facts of the declaration's type that satisfy every condition.
///
/// Conditions may reference this declaration and any declaration bound
/// earlier in the rule.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternElement {
    /// The variable this pattern binds.
    pub declaration: Declaration,
    /// Conditions, evaluated left to right.
    pub conditions: Vec<Expr>,
}

impl PatternElement {
    /// Creates an unconstrained pattern.
    #[must_use]
    pub fn new(declaration: Declaration) -> Self {
        Self {
            declaration,
            conditions: Vec::new(),
        }
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// What a negation, existential or aggregate ranges over.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementSource {
    /// Facts matched by a single pattern.
    Pattern(PatternElement),
    /// Combinations matched by a nested sequence of elements. The last element
    /// must bind a declaration; its fact is the visible value of each combination.
    Group(Vec<RuleElement>),
}

impl ElementSource {
    /// Declarations bound inside this source, in order.
    #[must_use]
    pub fn declarations(&self) -> Vec<Declaration> {
        match self {
            Self::Pattern(p) => vec![p.declaration.clone()],
            Self::Group(elements) => elements.iter().flat_map(RuleElement::declarations).collect(),
        }
    }
}

/// Built-in and custom aggregators.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregatorSpec {
    /// Number of matching facts.
    Count,
    /// Sum of an expression over matching facts.
    Sum(Expr),
    /// List of matching fact values, in match order.
    Collect,
    /// One group per distinct key; each group lists its elements.
    GroupBy {
        /// Grouping key expression.
        key: Expr,
        /// Element expression.
        element: Expr,
    },
    /// One aggregate per element of a list-valued expression.
    Flatten(Expr),
    /// Aggregator registered under a name with the engine.
    Custom {
        /// Registry name.
        name: Arc<str>,
        /// Named expressions handed to the aggregator.
        expressions: Vec<(Arc<str>, Expr)>,
    },
}

impl AggregatorSpec {
    /// Returns the named expressions this aggregator evaluates per fact.
    #[must_use]
    pub fn expressions(&self) -> Vec<(Arc<str>, &Expr)> {
        match self {
            Self::Count | Self::Collect => Vec::new(),
            Self::Sum(e) => vec![("selector".into(), e)],
            Self::Flatten(e) => vec![("selector".into(), e)],
            Self::GroupBy { key, element } => {
                vec![("key".into(), key), ("element".into(), element)]
            }
            Self::Custom { expressions, .. } => expressions
                .iter()
                .map(|(name, e)| (Arc::clone(name), e))
                .collect(),
        }
    }
}

/// Aggregates a source per left-hand context and binds each aggregate value.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateElement {
    /// Declaration bound to each aggregate value.
    pub result: Declaration,
    /// Facts being aggregated.
    pub source: ElementSource,
    /// How to aggregate.
    pub aggregator: AggregatorSpec,
    /// Conditions on the aggregate value.
    pub conditions: Vec<Expr>,
}

impl AggregateElement {
    /// Creates an aggregate element without result conditions.
    #[must_use]
    pub fn new(result: Declaration, source: ElementSource, aggregator: AggregatorSpec) -> Self {
        Self {
            result,
            source,
            aggregator,
            conditions: Vec::new(),
        }
    }

    /// Adds a condition on the aggregate value.
    #[must_use]
    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// One element of a rule's left-hand side.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleElement {
    /// Bind a fact.
    Pattern(PatternElement),
    /// Require that nothing matches.
    Not(ElementSource),
    /// Require that something matches, without binding it.
    Exists(ElementSource),
    /// Bind aggregate values.
    Aggregate(AggregateElement),
}

impl RuleElement {
    /// Declarations bound by this element, nested ones included, in order.
    #[must_use]
    pub fn declarations(&self) -> Vec<Declaration> {
        match self {
            Self::Pattern(p) => vec![p.declaration.clone()],
            Self::Not(source) | Self::Exists(source) => source.declarations(),
            Self::Aggregate(a) => {
                let mut decls = a.source.declarations();
                decls.push(a.result.clone());
                decls
            }
        }
    }

    /// The declaration this element makes visible to later elements and actions.
    #[must_use]
    pub fn visible_declaration(&self) -> Option<&Declaration> {
        match self {
            Self::Pattern(p) => Some(&p.declaration),
            Self::Aggregate(a) => Some(&a.result),
            Self::Not(_) | Self::Exists(_) => None,
        }
    }
}

// =============================================================================
// Right-hand side
// =============================================================================

/// A resolved external service.
pub type Dependency = Arc<dyn Any + Send + Sync>;

/// Working-memory access granted to actions while a rule fires.
pub trait ActionContext {
    /// Name of the rule being fired.
    fn rule_name(&self) -> &str;

    /// The trigger that caused this firing.
    fn trigger(&self) -> ActionTrigger;

    /// The fact bound to a visible declaration of the match.
    fn fact(&self, declaration: &str) -> Option<FactId>;

    /// Inserts a new fact.
    ///
    /// # Errors
    /// Returns an error if propagation fails.
    fn insert(&mut self, value: Value) -> Result<FactId>;

    /// Replaces the value of an existing fact, keeping its identity.
    ///
    /// # Errors
    /// Returns an error if the fact is not in working memory.
    fn update(&mut self, fact: FactId, value: Value) -> Result<()>;

    /// Removes a fact from working memory.
    ///
    /// # Errors
    /// Returns an error if the fact is not in working memory.
    fn retract(&mut self, fact: FactId) -> Result<()>;

    /// Stops the firing loop after the current activation.
    fn halt(&mut self);
}

/// User callback invoked by [`ActionBody::Invoke`].
///
/// Receives the evaluated arguments and the resolved dependencies, both in
/// declaration order.
#[derive(Clone)]
pub struct ActionFn(pub Arc<ActionCallback>);

/// Signature of an action callback.
pub type ActionCallback =
    dyn Fn(&mut dyn ActionContext, &[Value], &[Dependency]) -> Result<()> + Send + Sync;

impl ActionFn {
    /// Wraps a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut dyn ActionContext, &[Value], &[Dependency]) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for ActionFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<action fn>")
    }
}

impl PartialEq for ActionFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Which activation events run an action. Combine with `|`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionTrigger(u8);

impl ActionTrigger {
    /// A new match was found.
    pub const ACTIVATED: Self = Self(1);
    /// A match that already fired was updated.
    pub const REACTIVATED: Self = Self(2);
    /// A match that already fired went away.
    pub const DEACTIVATED: Self = Self(4);

    /// Returns true if every flag of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for ActionTrigger {
    fn default() -> Self {
        Self::ACTIVATED | Self::REACTIVATED
    }
}

impl std::ops::BitOr for ActionTrigger {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ActionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::ACTIVATED, "Activated"),
            (Self::REACTIVATED, "Reactivated"),
            (Self::DEACTIVATED, "Deactivated"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// What an action does.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionBody {
    /// Insert the value of an expression as a new fact.
    Insert(Expr),
    /// Replace the value of the fact bound to `target`.
    Update {
        /// Declaration whose fact is updated.
        target: Arc<str>,
        /// New value.
        value: Expr,
    },
    /// Retract the fact bound to a declaration.
    Retract(Arc<str>),
    /// Call a user function.
    Invoke {
        /// The callback.
        function: ActionFn,
        /// Argument expressions.
        args: Vec<Expr>,
        /// Names of declared dependencies to resolve and pass.
        dependencies: Vec<Arc<str>>,
    },
}

/// An action with the triggers it runs on.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionElement {
    /// When the action runs.
    pub trigger: ActionTrigger,
    /// What it does.
    pub body: ActionBody,
}

impl ActionElement {
    /// Creates an action running on activation and reactivation.
    #[must_use]
    pub fn new(body: ActionBody) -> Self {
        Self {
            trigger: ActionTrigger::default(),
            body,
        }
    }

    /// Sets the trigger.
    #[must_use]
    pub fn on(mut self, trigger: ActionTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Declarations referenced by this action, in first-occurrence order.
    #[must_use]
    pub fn imports(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = Vec::new();
        let mut push = |name: Arc<str>| {
            if !names.contains(&name) {
                names.push(name);
            }
        };
        match &self.body {
            ActionBody::Insert(e) => e.imports().into_iter().for_each(&mut push),
            ActionBody::Update { target, value } => {
                push(Arc::clone(target));
                value.imports().into_iter().for_each(&mut push);
            }
            ActionBody::Retract(target) => push(Arc::clone(target)),
            ActionBody::Invoke { args, .. } => {
                args.iter().flat_map(Expr::imports).for_each(&mut push);
            }
        }
        names
    }

    /// Dependency names this action uses.
    #[must_use]
    pub fn dependencies(&self) -> &[Arc<str>] {
        match &self.body {
            ActionBody::Invoke { dependencies, .. } => dependencies,
            _ => &[],
        }
    }
}
