//! Expression binding.
//!
//! The binder turns an expression that names declarations into a closure over
//! the runtime shape it will be evaluated against:
//!
//! - [`FactExpression`] - only the fact under test (alpha conditions)
//! - [`TupleExpression`] - only a tuple (aggregate result filters, actions)
//! - [`TupleFactExpression`] - a tuple plus a trailing fact (join conditions,
//!   aggregate expressions)
//!
//! Parameter positions are computed with an [`IndexMap`] once, at compile
//! time. [`compile_lhs`] picks the fact-only shape whenever the expression
//! references nothing but the trailing declaration, which skips the tuple
//! walk entirely.

pub mod action;
pub mod eval;

use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::{Error, ErrorContext, Result, Value};
use ruleweave_model::{Declaration, Expr};

use crate::index_map::IndexMap;
use crate::tuple::TupleView;

pub use action::{
    ActionInvoker, CompiledAction, DependencyRegistry, DependencyResolver, DependentAction,
    NoDependencies, ResolutionContext, SimpleAction, compile_action,
};
pub use eval::{Args, Evaluator};

/// Where a parameter of a tuple+fact expression comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// A tuple position.
    Tuple(usize),
    /// The trailing fact.
    Fact,
}

// =============================================================================
// Argument Sources
// =============================================================================

struct FactArgs<'a>(&'a Value);

impl Args for FactArgs<'_> {
    fn arg(&self, _index: usize) -> Result<Value> {
        Ok(self.0.clone())
    }
}

pub(crate) struct TupleArgs<'a> {
    pub(crate) tuple: &'a dyn TupleView,
    pub(crate) slots: &'a [usize],
}

fn unbound(position: usize) -> Error {
    Error::internal(format!("no fact bound at tuple position {position}"))
}

impl Args for TupleArgs<'_> {
    fn arg(&self, index: usize) -> Result<Value> {
        let position = self.slots[index];
        self.tuple
            .value_at(position)
            .ok_or_else(|| unbound(position))
    }
}

struct TupleFactArgs<'a> {
    tuple: &'a dyn TupleView,
    fact: &'a Value,
    slots: &'a [Slot],
}

impl Args for TupleFactArgs<'_> {
    fn arg(&self, index: usize) -> Result<Value> {
        match self.slots[index] {
            Slot::Fact => Ok(self.fact.clone()),
            Slot::Tuple(position) => self
                .tuple
                .value_at(position)
                .ok_or_else(|| unbound(position)),
        }
    }
}

// =============================================================================
// Expression Shapes
// =============================================================================

/// An expression over the fact under test only.
#[derive(Clone)]
pub struct FactExpression {
    eval: Evaluator,
}

impl FactExpression {
    /// Wraps a closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            eval: eval::evaluator(move |args| f(&args.arg(0)?)),
        }
    }

    /// Evaluates against a fact value.
    ///
    /// # Errors
    /// Returns any evaluation error.
    pub fn invoke(&self, fact: &Value) -> Result<Value> {
        (self.eval)(&FactArgs(fact))
    }
}

impl fmt::Debug for FactExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FactExpression")
    }
}

/// An expression over tuple positions.
#[derive(Clone)]
pub struct TupleExpression {
    eval: Evaluator,
    slots: Arc<[usize]>,
}

impl TupleExpression {
    /// Evaluates against a tuple.
    ///
    /// # Errors
    /// Returns any evaluation error.
    pub fn invoke(&self, tuple: &dyn TupleView) -> Result<Value> {
        (self.eval)(&TupleArgs {
            tuple,
            slots: &self.slots,
        })
    }

    /// Tuple position of each parameter.
    #[must_use]
    pub fn slots(&self) -> &[usize] {
        &self.slots
    }
}

impl fmt::Debug for TupleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleExpression")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

/// An expression over tuple positions and a trailing fact.
#[derive(Clone)]
pub struct TupleFactExpression {
    eval: Evaluator,
    slots: Arc<[Slot]>,
}

impl TupleFactExpression {
    /// Evaluates against a tuple and the fact that would extend it.
    ///
    /// # Errors
    /// Returns any evaluation error.
    pub fn invoke(&self, tuple: &dyn TupleView, fact: &Value) -> Result<Value> {
        (self.eval)(&TupleFactArgs {
            tuple,
            fact,
            slots: &self.slots,
        })
    }

    /// Source of each parameter.
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

impl fmt::Debug for TupleFactExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleFactExpression")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

/// A left-hand side expression in whichever shape the binder chose.
#[derive(Clone, Debug)]
pub enum LhsExpression {
    /// References only the trailing fact.
    Fact(FactExpression),
    /// References tuple positions too.
    TupleFact(TupleFactExpression),
}

impl LhsExpression {
    /// Evaluates against a tuple and trailing fact.
    ///
    /// # Errors
    /// Returns any evaluation error.
    pub fn invoke(&self, tuple: &dyn TupleView, fact: &Value) -> Result<Value> {
        match self {
            Self::Fact(e) => e.invoke(fact),
            Self::TupleFact(e) => e.invoke(tuple, fact),
        }
    }

    /// Returns true if the fast fact-only shape was chosen.
    #[must_use]
    pub const fn is_fact_only(&self) -> bool {
        matches!(self, Self::Fact(_))
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// Names of bound positions; `None` marks positions with no declaration.
fn position_names(positions: &[Option<Declaration>]) -> Vec<Option<Arc<str>>> {
    positions
        .iter()
        .map(|p| p.as_ref().map(|d| Arc::clone(&d.name)))
        .collect()
}

fn params_for(imports: &[Arc<str>], candidates: &[&Declaration]) -> Result<Vec<Declaration>> {
    imports
        .iter()
        .map(|name| {
            candidates
                .iter()
                .find(|d| d.name == *name)
                .map(|d| (*d).clone())
                .ok_or_else(|| Error::unresolved_declaration(name.to_string()))
        })
        .collect()
}

fn not_visible(name: &str) -> Error {
    Error::unresolved_declaration(name)
        .with_context(ErrorContext::new().with_frame(format!("{name} is not bound to a position")))
}

/// Compiles an expression over the fact under test.
///
/// # Errors
/// Returns `UnresolvedDeclaration` if the expression names anything but
/// `declaration`.
pub fn compile_fact(expr: &Expr, declaration: &Declaration) -> Result<FactExpression> {
    let imports = expr.imports();
    if let Some(other) = imports.iter().find(|n| **n != declaration.name) {
        return Err(Error::unresolved_declaration(other.to_string()));
    }
    let params = params_for(&imports, &[declaration])?;
    Ok(FactExpression {
        eval: eval::build(expr, &params)?,
    })
}

/// Compiles an expression over tuple positions.
///
/// # Errors
/// Returns `UnresolvedDeclaration` for a name with no bound position.
pub fn compile_tuple(expr: &Expr, positions: &[Option<Declaration>]) -> Result<TupleExpression> {
    let imports = expr.imports();
    let names = position_names(positions);
    let wanted: Vec<Option<Arc<str>>> = imports.iter().cloned().map(Some).collect();
    let map = IndexMap::create(&wanted, &names);
    if let Some(missing) = map.first_unmapped() {
        return Err(not_visible(&imports[missing]));
    }
    let candidates: Vec<&Declaration> = positions.iter().flatten().collect();
    let params = params_for(&imports, &candidates)?;
    let slots: Arc<[usize]> = map.iter().flatten().collect();
    Ok(TupleExpression {
        eval: eval::build(expr, &params)?,
        slots,
    })
}

/// Compiles an expression over tuple positions plus a trailing fact.
///
/// # Errors
/// Returns `UnresolvedDeclaration` for a name that is neither a bound
/// position nor the trailing declaration.
pub fn compile_tuple_fact(
    expr: &Expr,
    positions: &[Option<Declaration>],
    fact: &Declaration,
) -> Result<TupleFactExpression> {
    let imports = expr.imports();
    let mut names = position_names(positions);
    names.push(Some(Arc::clone(&fact.name)));
    let wanted: Vec<Option<Arc<str>>> = imports.iter().cloned().map(Some).collect();
    let map = IndexMap::create(&wanted, &names);
    if let Some(missing) = map.first_unmapped() {
        return Err(not_visible(&imports[missing]));
    }
    let mut candidates: Vec<&Declaration> = positions.iter().flatten().collect();
    candidates.push(fact);
    let params = params_for(&imports, &candidates)?;
    let slots: Arc<[Slot]> = map
        .iter()
        .flatten()
        .map(|i| {
            if i == positions.len() {
                Slot::Fact
            } else {
                Slot::Tuple(i)
            }
        })
        .collect();
    Ok(TupleFactExpression {
        eval: eval::build(expr, &params)?,
        slots,
    })
}

/// Compiles a left-hand side expression, choosing the fact-only shape when
/// the expression references exactly the trailing declaration.
///
/// # Errors
/// Same as [`compile_tuple_fact`].
pub fn compile_lhs(
    expr: &Expr,
    positions: &[Option<Declaration>],
    fact: &Declaration,
) -> Result<LhsExpression> {
    let imports = expr.imports();
    if imports.len() == 1 && imports[0] == fact.name {
        return compile_fact(expr, fact).map(LhsExpression::Fact);
    }
    compile_tuple_fact(expr, positions, fact).map(LhsExpression::TupleFact)
}

// =============================================================================
// Tests
// =============================================================================
