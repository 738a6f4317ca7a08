//! Integration tests for FactId
//!
//! Tests ordering, the null sentinel and display.

use ruleweave_foundation::FactId;
use std::collections::BTreeSet;

#[test]
fn fact_ids_order_by_issue() {
    let ids: BTreeSet<FactId> = [3, 1, 2].into_iter().map(FactId::new).collect();
    let order: Vec<u64> = ids.into_iter().map(FactId::index).collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn null_sentinel() {
    assert!(FactId::null().is_null());
    assert!(!FactId::new(0).is_null());
    assert!(FactId::new(u64::MAX - 1) < FactId::null());
}

#[test]
fn fact_id_display() {
    assert_eq!(FactId::new(42).to_string(), "#42");
    assert_eq!(FactId::null().to_string(), "#null");
    assert_eq!(format!("{:?}", FactId::new(7)), "FactId(7)");
}
