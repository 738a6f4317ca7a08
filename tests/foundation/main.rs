//! Integration tests for Layer 0: Foundation
//!
//! Tests for core types: Value, Record, Type, FactId and Error.

mod errors;
mod facts;
mod values;
