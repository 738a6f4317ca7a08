//! Integration tests for Value, Record and Type
//!
//! Tests construction, truthiness, equality, ordering and type acceptance.

use ruleweave_foundation::{Record, Type, Value};
use std::collections::HashSet;
use std::sync::Arc;

// =============================================================================
// Value Construction
// =============================================================================

#[test]
fn value_from_conversions() {
    assert_eq!(Value::from(true), Value::Bool(true));
    assert_eq!(Value::from(7_i64), Value::Int(7));
    assert_eq!(Value::from(7_i32), Value::Int(7));
    assert_eq!(Value::from(1.5), Value::Float(1.5));
    assert_eq!(Value::from("hi"), Value::String(Arc::from("hi")));
    assert_eq!(Value::from(String::from("hi")).as_str(), Some("hi"));
}

#[test]
fn value_list_from_vec() {
    let list = Value::from(vec![1, 2, 3]);
    assert_eq!(list.as_list().map(|items| items.len()), Some(3));
    assert_eq!(list.value_type(), Type::List);
}

#[test]
fn value_list_from_iterator() {
    let list: Value = (1..=3).map(Value::from).collect();
    assert_eq!(list, Value::from(vec![1, 2, 3]));
}

// =============================================================================
// Truthiness
// =============================================================================

#[test]
fn only_nil_and_false_are_falsy() {
    assert!(!Value::Nil.is_truthy());
    assert!(!Value::Bool(false).is_truthy());
    assert!(Value::Bool(true).is_truthy());
    assert!(Value::Int(0).is_truthy());
    assert!(Value::from("").is_truthy());
    assert!(Value::from(Vec::<Value>::new()).is_truthy());
}

// =============================================================================
// Records
// =============================================================================

#[test]
fn record_fields() {
    let order = Record::new("Order").with("id", 1).with("amount", 2.5);
    assert_eq!(order.type_name(), "Order");
    assert_eq!(order.get("id"), Some(&Value::Int(1)));
    assert_eq!(order.get("missing"), None);
    let names: Vec<&str> = order.fields().map(|(k, _)| &**k).collect();
    assert_eq!(names, vec!["amount", "id"]);
}

#[test]
fn record_value_field_access() {
    let value = Value::Record(Record::new("Order").with("id", 1));
    assert_eq!(value.field("id"), Some(&Value::Int(1)));
    assert_eq!(Value::Int(1).field("id"), None);
    assert_eq!(value.value_type(), Type::record("Order"));
}

#[test]
fn records_compare_structurally() {
    let a = Record::new("Order").with("id", 1);
    let b = Record::new("Order").with("id", 1);
    let c = Record::new("Invoice").with("id", 1);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

// =============================================================================
// Equality, Hashing and Ordering
// =============================================================================

#[test]
fn int_and_float_are_distinct_values() {
    assert_ne!(Value::Int(1), Value::Float(1.0));
}

#[test]
fn values_hash_consistently() {
    let mut set = HashSet::new();
    set.insert(Value::Int(1));
    set.insert(Value::Int(1));
    set.insert(Value::from("a"));
    set.insert(Value::Record(Record::new("Order").with("id", 1)));
    set.insert(Value::Record(Record::new("Order").with("id", 1)));
    assert_eq!(set.len(), 3);
}

#[test]
fn numeric_ordering_crosses_types() {
    assert!(Value::Int(1) < Value::Float(1.5));
    assert!(Value::Float(2.5) > Value::Int(2));
    assert!(Value::from("a") < Value::from("b"));
    assert_eq!(Value::Int(1).partial_cmp(&Value::from("a")), None);
}

#[test]
fn display_formats() {
    assert_eq!(Value::Nil.to_string(), "nil");
    assert_eq!(Value::from("text").to_string(), "text");
    assert_eq!(Value::from(vec![1, 2]).to_string(), "[1 2]");
}

// =============================================================================
// Types
// =============================================================================

#[test]
fn type_acceptance() {
    assert!(Type::Any.accepts(&Type::record("Order")));
    assert!(Type::Float.accepts(&Type::Int));
    assert!(!Type::Int.accepts(&Type::Float));
    assert!(Type::record("Order").accepts(&Type::record("Order")));
    assert!(!Type::record("Order").accepts(&Type::record("Customer")));
    assert!(!Type::record("Order").accepts(&Type::Any));
}

#[test]
fn type_display() {
    assert_eq!(Type::Int.to_string(), "int");
    assert_eq!(Type::record("Order").to_string(), "Order");
    assert_eq!(Type::record("Order").record_name(), Some("Order"));
    assert_eq!(Type::Int.record_name(), None);
}
