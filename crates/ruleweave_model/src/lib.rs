//! Resolved rule definitions for ruleweave.
//!
//! This crate is the contract between whatever authors rules and the engine
//! that compiles them:
//! - [`Expr`] - Expression AST referencing declarations by name
//! - [`Declaration`] - Named, typed pattern variables
//! - [`RuleElement`] - Patterns, negations, existentials and aggregates
//! - [`ActionElement`] - Right-hand side actions with triggers
//! - [`RuleDefinition`] - A complete, validated rule

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ast;
pub mod declaration;
pub mod element;
pub mod rule;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use declaration::{Declaration, DependencyDeclaration};
pub use element::{
    ActionBody, ActionCallback, ActionContext, ActionElement, ActionFn, ActionTrigger, AggregateElement,
    AggregatorSpec, Dependency, ElementSource, PatternElement, RuleElement,
};
pub use rule::{Repeatability, RuleDefinition};
