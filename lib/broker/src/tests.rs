use crate::{Broker, BrokerError, Scope};
use std::sync::Arc;

trait Greeter: Send + Sync {
    fn greet(&self) -> &'static str;
}

struct Hello;
impl Greeter for Hello {
    fn greet(&self) -> &'static str {
        "hello"
    }
}

struct Bonjour;
impl Greeter for Bonjour {
    fn greet(&self) -> &'static str {
        "bonjour"
    }
}

#[test]
fn register_and_get_roundtrip() {
    let broker = Broker::new();
    broker.register_interface::<dyn Greeter>("greeter", Scope::Global, Arc::new(Hello), "mod-a");

    let handle = broker.get_interface::<dyn Greeter>("greeter", Scope::Global).unwrap();
    assert_eq!(handle.greet(), "hello");
}

#[test]
fn arena_scope_falls_back_to_global() {
    let broker = Broker::new();
    broker.register_interface::<dyn Greeter>("greeter", Scope::Global, Arc::new(Hello), "mod-a");

    let handle = broker
        .get_interface::<dyn Greeter>("greeter", Scope::Arena(7))
        .unwrap();
    assert_eq!(handle.greet(), "hello");
}

#[test]
fn arena_scope_registration_shadows_global() {
    let broker = Broker::new();
    broker.register_interface::<dyn Greeter>("greeter", Scope::Global, Arc::new(Hello), "mod-a");
    broker.register_interface::<dyn Greeter>("greeter", Scope::Arena(7), Arc::new(Bonjour), "mod-b");

    assert_eq!(
        broker
            .get_interface::<dyn Greeter>("greeter", Scope::Arena(7))
            .unwrap()
            .greet(),
        "bonjour"
    );
    assert_eq!(
        broker
            .get_interface::<dyn Greeter>("greeter", Scope::Global)
            .unwrap()
            .greet(),
        "hello"
    );
}

#[test]
fn unregister_fails_while_refcount_positive() {
    let broker = Broker::new();
    let token = broker.register_interface::<dyn Greeter>("greeter", Scope::Global, Arc::new(Hello), "mod-a");

    let handle = broker.get_interface::<dyn Greeter>("greeter", Scope::Global).unwrap();

    assert_eq!(
        broker.unregister_interface("greeter", token),
        Err(BrokerError::InUse)
    );

    drop(handle);

    assert_eq!(broker.unregister_interface("greeter", token), Ok(()));
    assert!(broker.get_interface::<dyn Greeter>("greeter", Scope::Global).is_none());
}

#[test]
fn unregister_stale_token_not_found() {
    let broker = Broker::new();
    let token = broker.register_interface::<dyn Greeter>("greeter", Scope::Global, Arc::new(Hello), "mod-a");
    // Superseding registration invalidates the earlier token.
    broker.register_interface::<dyn Greeter>("greeter", Scope::Global, Arc::new(Bonjour), "mod-b");

    assert_eq!(
        broker.unregister_interface("greeter", token),
        Err(BrokerError::NotFound)
    );
}

#[test]
fn override_chain_keeps_previous_implementation_reachable() {
    let broker = Broker::new();
    broker.register_interface::<dyn Greeter>("greeter", Scope::Global, Arc::new(Hello), "mod-a");

    // mod-b captures the previous impl before overriding, as the auth chain does.
    let previous = broker.get_interface::<dyn Greeter>("greeter", Scope::Global).unwrap();
    broker.register_interface::<dyn Greeter>("greeter", Scope::Global, Arc::new(Bonjour), "mod-b");

    assert_eq!(previous.greet(), "hello");
    assert_eq!(
        broker
            .get_interface::<dyn Greeter>("greeter", Scope::Global)
            .unwrap()
            .greet(),
        "bonjour"
    );
}

#[test]
fn advisor_snapshot_is_isolated_from_later_registrations() {
    let broker = Broker::new();
    broker.register_advisor::<dyn Greeter>("can-greet", Scope::Global, Arc::new(Hello));

    let snapshot = broker.get_advisors::<dyn Greeter>("can-greet", Scope::Global);
    assert_eq!(snapshot.len(), 1);

    broker.register_advisor::<dyn Greeter>("can-greet", Scope::Global, Arc::new(Bonjour));

    // The snapshot taken before the second registration is unaffected.
    assert_eq!(snapshot.len(), 1);
    assert_eq!(broker.get_advisors::<dyn Greeter>("can-greet", Scope::Global).len(), 2);
}

#[test]
fn advisor_unregister_removes_from_future_snapshots_only() {
    let broker = Broker::new();
    let token = broker.register_advisor::<dyn Greeter>("can-greet", Scope::Global, Arc::new(Hello));
    let before = broker.get_advisors::<dyn Greeter>("can-greet", Scope::Global);

    broker.unregister_advisor("can-greet", token);

    assert_eq!(before.len(), 1);
    assert_eq!(broker.get_advisors::<dyn Greeter>("can-greet", Scope::Global).len(), 0);
}

#[test]
fn callbacks_fire_in_registration_order() {
    let broker = Broker::new();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let order_a = order.clone();
    broker.register_callback::<dyn Fn() + Send + Sync>(
        "connect",
        Arc::new(move || order_a.lock().unwrap().push("a")),
    );
    let order_b = order.clone();
    broker.register_callback::<dyn Fn() + Send + Sync>(
        "connect",
        Arc::new(move || order_b.lock().unwrap().push("b")),
    );

    for cb in broker.callbacks::<dyn Fn() + Send + Sync>("connect") {
        cb();
    }

    assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
}
