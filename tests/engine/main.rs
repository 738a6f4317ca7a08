//! Integration tests for Layer 2: Engine
//!
//! Tests for joins, negation, aggregation, the agenda, dependencies, events,
//! and sessions sharing one network across threads.

mod agenda;
mod aggregation;
mod common;
mod concurrency;
mod dependencies;
mod events;
mod joins;
mod negation;
