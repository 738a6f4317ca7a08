//! Ruleweave - Incremental forward-chaining production rule engine
//!
//! This crate re-exports all layers of the ruleweave system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: ruleweave_engine     - Rete network, aggregation, agenda, sessions
//! Layer 1: ruleweave_model      - Rule definitions, expressions, elements
//! Layer 0: ruleweave_foundation - Core types (Value, FactId, Type, Error)
//! ```

pub use ruleweave_engine as engine;
pub use ruleweave_foundation as foundation;
pub use ruleweave_model as model;
