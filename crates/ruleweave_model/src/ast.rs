//! Expression AST for conditions, aggregate expressions and action arguments.
//!
//! Expressions reference pattern variables by declaration name. The engine's
//! binder turns an expression into a closure over tuple positions, so the AST
//! itself never looks anything up at evaluation time.

use std::sync::Arc;

use ruleweave_foundation::{NativeFn, Value};

/// An expression node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A constant value.
    Literal(Value),
    /// Reference to a declaration's fact value.
    Var(Arc<str>),
    /// Record field access.
    Field(Box<Expr>, Arc<str>),
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// List construction.
    List(Vec<Expr>),
    /// Call of a native function.
    Call(NativeFn, Vec<Expr>),
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation (truthiness based).
    Not,
    /// Numeric negation.
    Neg,
    /// Length of a list or string.
    Len,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    /// Structural equality.
    Eq,
    /// Structural inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Addition (numbers) or concatenation (strings, lists).
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Short-circuit conjunction.
    And,
    /// Short-circuit disjunction.
    Or,
    /// List membership: `left` contains `right`.
    Contains,
}

impl Expr {
    /// Creates a literal.
    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates a declaration reference.
    #[must_use]
    pub fn var(name: impl Into<Arc<str>>) -> Self {
        Self::Var(name.into())
    }

    /// Creates a native call.
    #[must_use]
    pub fn call(func: NativeFn, args: Vec<Expr>) -> Self {
        Self::Call(func, args)
    }

    /// Accesses a field of this expression's value.
    #[must_use]
    pub fn field(self, name: impl Into<Arc<str>>) -> Self {
        Self::Field(Box::new(self), name.into())
    }

    /// Builds `self op rhs`.
    #[must_use]
    pub fn binary(self, op: BinaryOp, rhs: Expr) -> Self {
        Self::Binary(op, Box::new(self), Box::new(rhs))
    }

    /// Builds `self == rhs`.
    #[must_use]
    pub fn equals(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Eq, rhs)
    }

    /// Builds `self != rhs`.
    #[must_use]
    pub fn not_equals(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Ne, rhs)
    }

    /// Builds `self < rhs`.
    #[must_use]
    pub fn less_than(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Lt, rhs)
    }

    /// Builds `self <= rhs`.
    #[must_use]
    pub fn at_most(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Le, rhs)
    }

    /// Builds `self > rhs`.
    #[must_use]
    pub fn greater_than(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Gt, rhs)
    }

    /// Builds `self >= rhs`.
    #[must_use]
    pub fn at_least(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Ge, rhs)
    }

    /// Builds `self + rhs`.
    #[must_use]
    pub fn plus(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Add, rhs)
    }

    /// Builds `self * rhs`.
    #[must_use]
    pub fn times(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Mul, rhs)
    }

    /// Builds `self && rhs`.
    #[must_use]
    pub fn and(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::And, rhs)
    }

    /// Builds `!self`.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Unary(UnaryOp::Not, Box::new(self))
    }

    /// Returns the declaration names this expression references, in order of
    /// first occurrence and without duplicates.
    #[must_use]
    pub fn imports(&self) -> Vec<Arc<str>> {
        let mut names = Vec::new();
        self.collect_imports(&mut names);
        names
    }

    fn collect_imports(&self, names: &mut Vec<Arc<str>>) {
        match self {
            Self::Literal(_) => {}
            Self::Var(name) => {
                if !names.iter().any(|n| n == name) {
                    names.push(Arc::clone(name));
                }
            }
            Self::Field(inner, _) | Self::Unary(_, inner) => inner.collect_imports(names),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_imports(names);
                rhs.collect_imports(names);
            }
            Self::List(items) | Self::Call(_, items) => {
                for item in items {
                    item.collect_imports(names);
                }
            }
        }
    }
}
