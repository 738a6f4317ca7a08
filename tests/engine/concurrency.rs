//! Tests for sessions sharing one compiled network across threads.

use std::sync::Arc;
use std::thread;

use ruleweave_engine::{Network, Session};
use ruleweave_model::{ActionBody, ActionElement, Expr, RuleDefinition, RuleElement};

use crate::common::{customer, order, pattern, same_customer};

#[test]
fn network_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Network>();
}

#[test]
fn sessions_on_one_network_stay_independent() {
    let rule = RuleDefinition::new("customer-order")
        .with_element(RuleElement::Pattern(pattern("c", "Customer")))
        .with_element(RuleElement::Pattern(
            pattern("o", "Order").with_condition(same_customer()),
        ))
        .with_action(ActionElement::new(ActionBody::Insert(Expr::var("o").field("id"))));
    let network = Arc::new(Network::compile([rule]).unwrap());

    let handles: Vec<_> = (1..=4_i64)
        .map(|n| {
            let network = Arc::clone(&network);
            thread::spawn(move || {
                let mut session = Session::new(network).unwrap();
                session.insert(customer("alice")).unwrap();
                for id in 0..n {
                    session.insert(order(id, "alice", 10)).unwrap();
                }
                let fired = session.fire().unwrap().fired;
                (n, fired, session.fact_count())
            })
        })
        .collect();

    for handle in handles {
        let (n, fired, facts) = handle.join().unwrap();
        let n = usize::try_from(n).unwrap();
        assert_eq!(fired, n);
        // Customer, orders, and one inserted id per firing.
        assert_eq!(facts, 1 + 2 * n);
    }
}
