//! Shared fixtures for engine integration tests.

use std::sync::{Arc, Mutex};

use ruleweave_engine::{Network, Session};
use ruleweave_foundation::{Record, Type, Value};
use ruleweave_model::{
    ActionBody, ActionElement, ActionFn, Declaration, Expr, PatternElement, RuleDefinition,
};

pub fn customer(name: &str) -> Value {
    Value::Record(Record::new("Customer").with("name", name))
}

pub fn order(id: i64, customer: &str, amount: i64) -> Value {
    Value::Record(
        Record::new("Order")
            .with("id", id)
            .with("customer", customer)
            .with("amount", amount),
    )
}

pub fn item(name: &str, qty: i64) -> Value {
    Value::Record(Record::new("Item").with("name", name).with("qty", qty))
}

pub fn pattern(name: &str, ty: &str) -> PatternElement {
    PatternElement::new(Declaration::new(name, Type::record(ty)))
}

/// `o.customer == c.name`
pub fn same_customer() -> Expr {
    Expr::var("o")
        .field("customer")
        .equals(Expr::var("c").field("name"))
}

pub fn session(rules: Vec<RuleDefinition>) -> Session {
    Session::new(Arc::new(Network::compile(rules).unwrap())).unwrap()
}

/// Collects the evaluated arguments of every action it builds.
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// An action recording `args` each time it runs.
    pub fn action(&self, args: Vec<Expr>) -> ActionElement {
        let log = Arc::clone(&self.log);
        ActionElement::new(ActionBody::Invoke {
            function: ActionFn::new(move |_, values, _| {
                log.lock().unwrap().push(values.to_vec());
                Ok(())
            }),
            args,
            dependencies: Vec::new(),
        })
    }

    /// An action recording the rule name and trigger each time it runs.
    pub fn firing(&self) -> ActionElement {
        let log = Arc::clone(&self.log);
        ActionElement::new(ActionBody::Invoke {
            function: ActionFn::new(move |context, _, _| {
                log.lock().unwrap().push(vec![
                    Value::from(context.rule_name()),
                    Value::from(format!("{:?}", context.trigger())),
                ]);
                Ok(())
            }),
            args: Vec::new(),
            dependencies: Vec::new(),
        })
    }

    /// Everything recorded so far, clearing the log.
    pub fn take(&self) -> Vec<Vec<Value>> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

/// Shorthand for a recorded row.
pub fn row(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    values.into_iter().collect()
}
