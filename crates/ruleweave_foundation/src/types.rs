//! Runtime type descriptors.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Runtime type of a value.
///
/// Every fact carries the type of its value; pattern type filters use
/// [`Type::accepts`] to decide whether a fact enters a pattern.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// The nil type (only value: nil).
    Nil,
    /// Boolean type.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// String type.
    String,
    /// Persistent list of any values.
    List,
    /// Named record type.
    Record(Arc<str>),
    /// Any type (accepts any value).
    Any,
}

impl Type {
    /// Creates a record type with the given name.
    #[must_use]
    pub fn record(name: impl Into<Arc<str>>) -> Self {
        Self::Record(name.into())
    }

    /// Returns true if this type is `Any`.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns the record name if this is a record type.
    #[must_use]
    pub fn record_name(&self) -> Option<&str> {
        match self {
            Self::Record(name) => Some(name),
            _ => None,
        }
    }

    /// Checks if a value type is accepted by this type.
    ///
    /// - `Any` accepts all types
    /// - `Float` accepts `Int` (numeric promotion)
    /// - Records match by name
    /// - Everything else must match exactly
    #[must_use]
    pub fn accepts(&self, value_type: &Type) -> bool {
        match (self, value_type) {
            (Self::Any, _)
            | (Self::Nil, Self::Nil)
            | (Self::Bool, Self::Bool)
            | (Self::Int | Self::Float, Self::Int)
            | (Self::Float, Self::Float)
            | (Self::String, Self::String)
            | (Self::List, Self::List) => true,
            (Self::Record(expected), Self::Record(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::List => write!(f, "list"),
            Self::Record(name) => write!(f, "{name}"),
            Self::Any => write!(f, "any"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
