//! Shared helpers for integration tests.

use std::sync::Arc;

use autotrack_core::testing::TestStore;
use autotrack_core::{Listener, StoreHandle, SubscribeOptions, Unsubscribe, Value, listener};
use autotrack_proxy::{PathFinder, ProxyCache, Tracked, get_or_create_proxy};
use parking_lot::Mutex;

/// Build a path from string segments.
pub fn p(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

/// Paths of the minimal entries, in emission order.
pub fn minimal(finder: &PathFinder) -> Vec<Vec<String>> {
    finder.minimal_paths().into_iter().map(|e| e.path).collect()
}

/// Wallet-like state: accounts, a price table with a `convert` action, and
/// a `select` action on the root.
pub fn wallet_state(rate: f64) -> Value {
    Value::object([
        (
            "accounts",
            Value::object([
                (
                    "main",
                    Value::object([
                        ("address", Value::from("0xmain")),
                        ("balance", Value::from(100)),
                    ]),
                ),
                (
                    "savings",
                    Value::object([
                        ("address", Value::from("0xsave")),
                        ("balance", Value::from(250)),
                    ]),
                ),
            ]),
        ),
        ("selected", Value::from("main")),
        (
            "prices",
            Value::object([
                ("rate", Value::from(rate)),
                (
                    "convert",
                    Value::function(|this, args| {
                        let rate = this.get("rate").as_f64().unwrap_or(0.0);
                        let amount = args.first().and_then(Value::as_f64).unwrap_or(0.0);
                        Value::from(rate * amount)
                    }),
                ),
            ]),
        ),
        ("tags", Value::set([Value::from("defi"), Value::from("nft")])),
        (
            "select",
            Value::function(|_, _| Value::Undefined),
        ),
    ])
}

pub fn wallet_store(name: &str) -> Arc<TestStore> {
    TestStore::new(name, wallet_state(2.0))
}

/// Root proxy of `store` feeding `finder`.
pub fn root(store: &StoreHandle, cache: &ProxyCache, finder: &PathFinder) -> Tracked {
    get_or_create_proxy(store, cache, &finder.tracker())
}

/// `(next, prev)` pairs seen by a listener.
pub type CallLog = Arc<Mutex<Vec<(Value, Value)>>>;

pub fn recording_listener() -> (Listener, CallLog) {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (listener(move |next, prev| sink.lock().push((next.clone(), prev.clone()))), log)
}

/// Subscribe `on_change` to every minimal entry of `finder`, the way a
/// derived value wires itself up.
pub fn subscribe_all(finder: &PathFinder, on_change: &Listener) -> Vec<Unsubscribe> {
    let mut handles = Vec::new();
    finder.build_proxy_subscriptions(
        |store, selector| {
            handles.push(store.subscribe_with_selector(selector, Arc::clone(on_change), SubscribeOptions::default()));
        },
        false,
    );
    handles
}
