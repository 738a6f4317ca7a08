//! Closure construction for expression trees.
//!
//! Each AST node becomes a boxed closure over an [`Args`] source. Variables
//! are resolved to parameter indices once, at build time.

#![allow(clippy::match_same_arms)]

use std::cmp::Ordering;
use std::sync::Arc;

use ruleweave_foundation::{Error, Result, Type, Value};
use ruleweave_model::{BinaryOp, Declaration, Expr, UnaryOp};

/// Argument source for a compiled expression.
///
/// Arguments are fetched lazily, so an expression that short-circuits never
/// resolves the facts it skips.
pub trait Args {
    /// The value of parameter `index`.
    ///
    /// # Errors
    /// Returns an error if the parameter cannot be resolved.
    fn arg(&self, index: usize) -> Result<Value>;
}

/// A compiled expression.
pub type Evaluator = Arc<dyn Fn(&dyn Args) -> Result<Value> + Send + Sync>;

/// Wraps a closure as an [`Evaluator`].
pub fn evaluator<F>(f: F) -> Evaluator
where
    F: Fn(&dyn Args) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Compiles `expr` against an ordered parameter list.
///
/// # Errors
/// Returns `UnresolvedDeclaration` for a variable that is not a parameter and
/// `TypeMismatch` for field access on a declaration of a non-record type.
pub fn build(expr: &Expr, params: &[Declaration]) -> Result<Evaluator> {
    match expr {
        Expr::Literal(value) => {
            let value = value.clone();
            Ok(evaluator(move |_| Ok(value.clone())))
        }
        Expr::Var(name) => {
            let index = params
                .iter()
                .position(|p| p.name == *name)
                .ok_or_else(|| Error::unresolved_declaration(name.to_string()))?;
            Ok(evaluator(move |args| args.arg(index)))
        }
        Expr::Field(inner, field) => {
            if let Expr::Var(name) = inner.as_ref() {
                if let Some(param) = params.iter().find(|p| p.name == *name) {
                    check_record(&param.fact_type)?;
                }
            }
            let inner = build(inner, params)?;
            let field = Arc::clone(field);
            Ok(evaluator(move |args| field_of(inner(args)?, &field)))
        }
        Expr::Unary(op, inner) => {
            let op = *op;
            let inner = build(inner, params)?;
            Ok(evaluator(move |args| unary(op, inner(args)?)))
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let (lhs, rhs) = (build(lhs, params)?, build(rhs, params)?);
            Ok(evaluator(move |args| {
                Ok(Value::Bool(lhs(args)?.is_truthy() && rhs(args)?.is_truthy()))
            }))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let (lhs, rhs) = (build(lhs, params)?, build(rhs, params)?);
            Ok(evaluator(move |args| {
                Ok(Value::Bool(lhs(args)?.is_truthy() || rhs(args)?.is_truthy()))
            }))
        }
        Expr::Binary(op, lhs, rhs) => {
            let op = *op;
            let (lhs, rhs) = (build(lhs, params)?, build(rhs, params)?);
            Ok(evaluator(move |args| binary(op, lhs(args)?, rhs(args)?)))
        }
        Expr::List(items) => {
            let items = items
                .iter()
                .map(|item| build(item, params))
                .collect::<Result<Vec<_>>>()?;
            Ok(evaluator(move |args| {
                items
                    .iter()
                    .map(|item| item(args))
                    .collect::<Result<im::Vector<_>>>()
                    .map(Value::List)
            }))
        }
        Expr::Call(function, items) => {
            let function = *function;
            let items = items
                .iter()
                .map(|item| build(item, params))
                .collect::<Result<Vec<_>>>()?;
            Ok(evaluator(move |args| {
                let values = items
                    .iter()
                    .map(|item| item(args))
                    .collect::<Result<Vec<_>>>()?;
                (function.func)(&values)
            }))
        }
    }
}

fn check_record(fact_type: &Type) -> Result<()> {
    match fact_type {
        Type::Record(_) | Type::Any | Type::Nil => Ok(()),
        other => Err(Error::type_mismatch(
            Type::record("record"),
            other.clone(),
        )),
    }
}

// =============================================================================
// Operators
// =============================================================================

fn field_of(value: Value, field: &str) -> Result<Value> {
    match value {
        Value::Record(record) => Ok(record.get(field).cloned().unwrap_or(Value::Nil)),
        Value::Nil => Ok(Value::Nil),
        other => Err(Error::evaluation(format!(
            "cannot read field {field} of {}",
            other.value_type()
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(x)) => x
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Error::evaluation("integer overflow")),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Len, Value::List(items)) => len_value(items.len()),
        (UnaryOp::Len, Value::String(s)) => len_value(s.chars().count()),
        (UnaryOp::Neg, other) => Err(Error::type_mismatch(Type::Int, other.value_type())),
        (UnaryOp::Len, other) => Err(Error::type_mismatch(Type::List, other.value_type())),
    }
}

fn len_value(len: usize) -> Result<Value> {
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|_| Error::evaluation("length out of range"))
}

/// Equality with numeric promotion: `1 == 1.0`.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

#[allow(clippy::cast_precision_loss)]
fn arithmetic(
    a: Value,
    b: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => int_op(*x, *y)
            .map(Value::Int)
            .ok_or_else(|| Error::evaluation("integer overflow")),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(float_op(*x, *y))),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(float_op(*x as f64, *y))),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(float_op(*x, *y as f64))),
        (Value::Int(_) | Value::Float(_), _) => {
            Err(Error::type_mismatch(Type::Float, b.value_type()))
        }
        _ => Err(Error::type_mismatch(Type::Float, a.value_type())),
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Int(0) => true,
        Value::Float(f) => *f == 0.0,
        _ => false,
    }
}

fn binary(op: BinaryOp, a: Value, b: Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loosely_equal(&a, &b))),
        BinaryOp::Ne => Ok(Value::Bool(!loosely_equal(&a, &b))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = a.partial_cmp(&b).ok_or_else(|| {
                Error::evaluation(format!(
                    "cannot compare {} with {}",
                    a.value_type(),
                    b.value_type()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (a, b) {
            (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{x}{y}").into())),
            (Value::List(mut x), Value::List(y)) => {
                x.append(y);
                Ok(Value::List(x))
            }
            (a, b) => arithmetic(a, b, i64::checked_add, |x, y| x + y),
        },
        BinaryOp::Sub => arithmetic(a, b, i64::checked_sub, |x, y| x - y),
        BinaryOp::Mul => arithmetic(a, b, i64::checked_mul, |x, y| x * y),
        BinaryOp::Div => {
            if is_zero(&b) {
                return Err(Error::evaluation("division by zero"));
            }
            arithmetic(a, b, i64::checked_div, |x, y| x / y)
        }
        BinaryOp::Contains => match (a, b) {
            (Value::List(items), needle) => {
                Ok(Value::Bool(items.iter().any(|item| loosely_equal(item, &needle))))
            }
            (Value::String(haystack), Value::String(needle)) => {
                Ok(Value::Bool(haystack.contains(&*needle)))
            }
            (Value::Nil, _) => Ok(Value::Bool(false)),
            (other, _) => Err(Error::type_mismatch(Type::List, other.value_type())),
        },
        BinaryOp::And => Ok(Value::Bool(a.is_truthy() && b.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(a.is_truthy() || b.is_truthy())),
    }
}
