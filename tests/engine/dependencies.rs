//! Tests for services resolved into actions at firing time.

use std::sync::{Arc, Mutex};

use ruleweave_engine::{DependencyRegistry, Network};
use ruleweave_foundation::{ErrorKind, Value};
use ruleweave_model::{
    ActionBody, ActionElement, ActionFn, DependencyDeclaration, Expr, RuleDefinition, RuleElement,
};

use crate::common::{Recorder, item, pattern, session};

/// A rule greeting each item through the `Greeter` service.
fn greeting_rule(log: &Arc<Mutex<Vec<String>>>) -> RuleDefinition {
    let log = Arc::clone(log);
    RuleDefinition::new("greet")
        .with_dependency(DependencyDeclaration::new("greeter", "Greeter"))
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(ActionElement::new(ActionBody::Invoke {
            function: ActionFn::new(move |_, args, services| {
                let greeting = services[0].downcast_ref::<String>().unwrap();
                let Value::String(name) = &args[0] else {
                    panic!("expected a name, got {:?}", args[0]);
                };
                log.lock().unwrap().push(format!("{greeting} {name}"));
                Ok(())
            }),
            args: vec![Expr::var("i").field("name")],
            dependencies: vec!["greeter".into()],
        }))
}

#[test]
fn registered_service_reaches_the_action() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = DependencyRegistry::new().with_service("Greeter", String::from("hello"));
    let mut session = session(vec![greeting_rule(&log)]).with_resolver(registry);
    session.insert(item("apple", 1)).unwrap();

    let summary = session.fire().unwrap();
    assert_eq!(summary.fired, 1);
    assert!(summary.failures.is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["hello apple".to_string()]);
}

#[test]
fn unresolved_service_is_recorded_and_firing_continues() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder::new();
    let plain = RuleDefinition::new("plain")
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(recorder.firing());
    let mut session = session(vec![greeting_rule(&log), plain]);
    session
        .insert_all([item("apple", 1), item("pear", 1)])
        .unwrap();

    let summary = session.fire().unwrap();
    assert_eq!(summary.fired, 2);
    assert_eq!(summary.failures.len(), 2);
    assert!(summary.failures.iter().all(|err| matches!(
        &err.kind,
        ErrorKind::DependencyResolution { rule, dependency, .. }
            if rule == "greet" && dependency == "greeter"
    )));
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(recorder.take().len(), 2);
}

#[test]
fn undeclared_dependency_fails_to_compile() {
    let rule = RuleDefinition::new("greet")
        .with_element(RuleElement::Pattern(pattern("i", "Item")))
        .with_action(ActionElement::new(ActionBody::Invoke {
            function: ActionFn::new(|_, _, _| Ok(())),
            args: Vec::new(),
            dependencies: vec!["greeter".into()],
        }));
    let err = Network::compile([rule]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnresolvedDependency(ref name) if name == "greeter"));
}
