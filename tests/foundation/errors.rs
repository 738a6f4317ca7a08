//! Integration tests for Error types
//!
//! Tests error construction, display, context, and error kinds.

use ruleweave_foundation::{Error, ErrorContext, ErrorKind, FactId, SemanticLimit, Type};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn error_unresolved_declaration() {
    let err = Error::unresolved_declaration("order");
    assert!(matches!(err.kind, ErrorKind::UnresolvedDeclaration(ref name) if name == "order"));
    assert_eq!(err.to_string(), "unresolved declaration: order");
}

#[test]
fn error_fact_not_found() {
    let err = Error::fact_not_found(FactId::new(9));
    assert!(matches!(err.kind, ErrorKind::FactNotFound(id) if id == FactId::new(9)));
    assert!(err.to_string().contains("#9"));
}

#[test]
fn error_aggregate_fact_not_found() {
    let err = Error::aggregate_fact_not_found(FactId::new(4));
    assert!(matches!(err.kind, ErrorKind::AggregateFactNotFound(_)));
    assert!(err.to_string().contains("#4"));
}

#[test]
fn error_type_mismatch_display() {
    let err = Error::type_mismatch(Type::Int, Type::String);
    assert_eq!(err.to_string(), "type mismatch: expected int, got string");
}

#[test]
fn error_limit_exceeded() {
    let err = Error::limit_exceeded(SemanticLimit::MaxActivations {
        limit: 10,
        context: Some("last fired rule loop".to_string()),
    });
    let msg = err.to_string();
    assert!(msg.contains("max activations (10) exceeded"));
    assert!(msg.contains("last fired rule loop"));
}

// =============================================================================
// Error Categories
// =============================================================================

#[test]
fn compile_errors() {
    assert!(Error::unresolved_declaration("a").is_compile_error());
    assert!(Error::unresolved_dependency("svc").is_compile_error());
    assert!(Error::invalid_rule("empty group").is_compile_error());
    assert!(Error::new(ErrorKind::DuplicateDeclaration("a".into())).is_compile_error());
    assert!(Error::new(ErrorKind::UnresolvedAggregator("median".into())).is_compile_error());
}

#[test]
fn runtime_errors() {
    assert!(!Error::evaluation("division by zero").is_compile_error());
    assert!(!Error::fact_not_found(FactId::new(1)).is_compile_error());
    assert!(!Error::internal("dangling tuple").is_compile_error());
}

// =============================================================================
// Error Context
// =============================================================================

#[test]
fn error_with_rule_and_frames() {
    let err = Error::unresolved_declaration("x")
        .in_frame("condition #1")
        .in_frame("element #0")
        .in_rule("discount");
    let ctx = err.context.expect("context");
    assert_eq!(ctx.rule.as_deref(), Some("discount"));
    assert_eq!(ctx.stack, vec!["condition #1", "element #0"]);
    let shown = ctx.to_string();
    assert!(shown.starts_with("in rule discount"));
    assert!(shown.contains("  at element #0"));
}

#[test]
fn explicit_context() {
    let err = Error::evaluation("boom").with_context(ErrorContext::new().with_rule("r"));
    assert_eq!(err.context.and_then(|c| c.rule), Some("r".to_string()));
}
