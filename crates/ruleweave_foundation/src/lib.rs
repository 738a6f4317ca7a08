//! Core values, types, fact identifiers and errors for ruleweave.
//!
//! This crate provides:
//! - [`Value`] - The dynamic value type held by facts
//! - [`Record`] - Typed records, the usual shape of a fact
//! - [`FactId`] - Opaque fact handles issued by the fact store
//! - [`Type`] - Runtime type descriptors used by pattern type filters
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod fact_id;
pub mod types;
pub mod value;

pub use error::{Error, ErrorContext, ErrorKind, SemanticLimit};
pub use fact_id::FactId;
pub use types::Type;
pub use value::{NativeFn, Record, Value};

/// Result type alias using the ruleweave error type.
pub type Result<T> = std::result::Result<T, Error>;
