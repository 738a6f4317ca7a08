//! Error types for ruleweave.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::fact_id::FactId;
use crate::types::Type;

/// The main error type for ruleweave operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Attaches the rule name as context, keeping any existing frames.
    #[must_use]
    pub fn in_rule(mut self, rule: &str) -> Self {
        let context = self.context.take().unwrap_or_default().with_rule(rule);
        self.context = Some(context);
        self
    }

    /// Pushes a frame onto the context stack.
    #[must_use]
    pub fn in_frame(mut self, frame: impl Into<String>) -> Self {
        let context = self.context.take().unwrap_or_default().with_frame(frame);
        self.context = Some(context);
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates an unresolved declaration error.
    #[must_use]
    pub fn unresolved_declaration(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedDeclaration(name.into()))
    }

    /// Creates an unresolved dependency error.
    #[must_use]
    pub fn unresolved_dependency(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedDependency(name.into()))
    }

    /// Creates a fact not found error.
    #[must_use]
    pub fn fact_not_found(id: FactId) -> Self {
        Self::new(ErrorKind::FactNotFound(id))
    }

    /// Creates an aggregation error for a fact the accumulator never added.
    #[must_use]
    pub fn aggregate_fact_not_found(id: FactId) -> Self {
        Self::new(ErrorKind::AggregateFactNotFound(id))
    }

    /// Creates an expression evaluation error.
    #[must_use]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Evaluation(message.into()))
    }

    /// Creates a semantic limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: SemanticLimit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Creates an invalid rule error.
    #[must_use]
    pub fn invalid_rule(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRule(message.into()))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true for errors raised while compiling rules.
    #[must_use]
    pub const fn is_compile_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::UnresolvedDeclaration(_)
                | ErrorKind::UnresolvedDependency(_)
                | ErrorKind::UnresolvedAggregator(_)
                | ErrorKind::DuplicateDeclaration(_)
                | ErrorKind::InvalidRule(_)
                | ErrorKind::TypeMismatch { .. }
        )
    }

    /// Returns true for errors a user expression raises on a particular value.
    #[must_use]
    pub const fn is_evaluation_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Evaluation(_) | ErrorKind::TypeMismatch { .. }
        )
    }
}

/// Categorized error kinds.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// An expression references a declaration that is not in scope.
    #[error("unresolved declaration: {0}")]
    UnresolvedDeclaration(String),

    /// An action references a dependency the rule does not declare.
    #[error("unresolved dependency: {0}")]
    UnresolvedDependency(String),

    /// A custom aggregator name has no registered factory.
    #[error("unresolved aggregator: {0}")]
    UnresolvedAggregator(String),

    /// Two declarations in one rule share a name.
    #[error("duplicate declaration: {0}")]
    DuplicateDeclaration(String),

    /// A rule is structurally malformed.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// Type mismatch during compilation or evaluation.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// Fact is not in working memory.
    #[error("fact not found: {0}")]
    FactNotFound(FactId),

    /// Modify or remove of a fact the aggregator never added.
    #[error("fact {0} is not tracked by the aggregator")]
    AggregateFactNotFound(FactId),

    /// A rule action returned an error.
    #[error("action of rule {rule} failed: {message}")]
    ActionFailed {
        /// The rule whose action failed.
        rule: String,
        /// The action's error message.
        message: String,
    },

    /// A declared dependency could not be resolved at firing time.
    #[error("dependency {dependency} of rule {rule} could not be resolved: {message}")]
    DependencyResolution {
        /// The rule being fired.
        rule: String,
        /// The dependency name.
        dependency: String,
        /// The resolver's message.
        message: String,
    },

    /// Expression evaluation failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Semantic limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(SemanticLimit),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic limits (kill switches) that can be exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticLimit {
    /// Maximum rule firings per fire call exceeded.
    MaxActivations {
        /// The configured limit.
        limit: u32,
        /// Additional context about which rule(s) caused the issue.
        context: Option<String>,
    },
}

impl fmt::Display for SemanticLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxActivations { limit, context } => {
                write!(f, "max activations ({limit}) exceeded")?;
                if let Some(ctx) = context {
                    write!(f, ": {ctx}")?;
                }
                Ok(())
            }
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Rule being compiled or fired.
    pub rule: Option<String>,
    /// Stack of network elements or actions involved.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rule name.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "in rule {rule}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  at {frame}")?;
            }
        }
        Ok(())
    }
}
