//! End-to-end tracking: reads through proxies, trie minimization, and the
//! resulting subscriptions firing on real store changes.

use std::sync::Arc;

use autotrack_core::testing::TestStore;
use autotrack_core::{StoreHandle, Value};
use autotrack_proxy::{ProxyCache, create_path_finder};
use autotrack_tests::helpers::*;

#[test]
fn sibling_reads_collapse_to_one_subscription() {
    let store: StoreHandle = wallet_store("wallet");
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    let main = root(&store, &cache, &finder).get("accounts").get("main");
    main.get("address").value();
    main.get("balance").value();

    assert_eq!(minimal(&finder), vec![p(&["accounts", "main"])]);
}

#[test]
fn single_read_subscribes_at_the_leaf() {
    let store: StoreHandle = wallet_store("wallet");
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    root(&store, &cache, &finder).get("accounts").get("main").get("balance").value();

    assert_eq!(minimal(&finder), vec![p(&["accounts", "main", "balance"])]);
}

#[test]
fn invocation_and_plain_read_get_separate_entries() {
    let store: StoreHandle = wallet_store("wallet");
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    let prices = root(&store, &cache, &finder).get("prices");
    assert_eq!(prices.get("rate").value(), Value::from(2.0));
    let converted = prices.get("convert").call(&[Value::from(1), Value::from(2)]).value();
    assert_eq!(converted, Value::from(2.0));

    let entries = finder.minimal_paths();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].path, p(&["prices", "convert"]));
    assert_eq!(entries[0].invocation.as_ref().map(|i| i.arg_count()), Some(2));
    assert_eq!(entries[1].path, p(&["prices", "rate"]));
    assert!(entries[1].invocation.is_none());
}

#[test]
fn invocation_subscription_recomputes_on_live_parent() {
    let store = wallet_store("wallet");
    let handle: StoreHandle = store.clone();
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    root(&handle, &cache, &finder)
        .get("prices")
        .get("convert")
        .call(&[Value::from(10)]);

    let (on_change, calls) = recording_listener();
    let _subs = subscribe_all(&finder, &on_change);

    store.update(|s| s.with("prices", s.get("prices").with("rate", Value::from(3.0))));
    assert_eq!(*calls.lock(), vec![(Value::from(30.0), Value::from(20.0))]);
}

#[test]
fn iterating_a_subobject_tracks_it_whole() {
    let store: StoreHandle = wallet_store("wallet");
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    let accounts = root(&store, &cache, &finder).get("accounts");
    let count = accounts.as_proxy().map_or(0, |proxy| proxy.iter().count());
    assert_eq!(count, 2);
    // Reads after iteration resolve without tracking.
    accounts.get("main").get("balance").value();

    assert_eq!(minimal(&finder), vec![p(&["accounts"])]);
}

#[test]
fn inherited_method_subscribes_to_its_receiver() {
    let store: StoreHandle = wallet_store("wallet");
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    let has_defi = root(&store, &cache, &finder)
        .get("tags")
        .get("has")
        .call(&[Value::from("defi")])
        .value();
    assert_eq!(has_defi, Value::Bool(true));
    assert_eq!(minimal(&finder), vec![p(&["tags"])]);
}

#[test]
fn unrelated_changes_do_not_notify() {
    let store = wallet_store("wallet");
    let handle: StoreHandle = store.clone();
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    root(&handle, &cache, &finder).get("selected").value();
    let (on_change, calls) = recording_listener();
    let _subs = subscribe_all(&finder, &on_change);

    store.update(|s| s.with("prices", s.get("prices").with("rate", Value::from(5.0))));
    assert!(calls.lock().is_empty());

    store.set("selected", Value::from("savings"));
    assert_eq!(*calls.lock(), vec![(Value::from("savings"), Value::from("main"))]);
}

#[test]
fn several_stores_keep_independent_tries() {
    let wallet: StoreHandle = wallet_store("wallet");
    let settings: StoreHandle = TestStore::new("settings", Value::object([("currency", Value::from("usd"))]));
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    root(&wallet, &cache, &finder).get("selected").value();
    root(&settings, &cache, &finder).get("currency").value();

    let entries = finder.minimal_paths();
    assert_eq!(entries.len(), 2);
    assert!(Arc::ptr_eq(&entries[0].store, &wallet));
    assert!(Arc::ptr_eq(&entries[1].store, &settings));
    assert_eq!(cache.len(), 2);
}

#[test]
fn repeated_evaluations_do_not_grow_subscriptions() {
    let store: StoreHandle = wallet_store("wallet");
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    for _ in 0..3 {
        let main = root(&store, &cache, &finder).get("accounts").get("main");
        main.get("balance").value();
    }
    let nodes = finder.node_count();
    root(&store, &cache, &finder).get("accounts").get("main").get("balance").value();

    assert_eq!(finder.node_count(), nodes);
    assert_eq!(finder.build_proxy_subscriptions(|_, _| {}, true), 1);
}

#[test]
fn primitive_store_subscribes_to_whole_state() {
    let store = TestStore::new("counter", Value::from(1));
    let handle: StoreHandle = store.clone();
    let finder = create_path_finder();
    let cache = ProxyCache::new();

    assert_eq!(root(&handle, &cache, &finder).value(), Value::from(1));
    let (on_change, calls) = recording_listener();
    let _subs = subscribe_all(&finder, &on_change);

    store.set_state(Value::from(2));
    assert_eq!(*calls.lock(), vec![(Value::from(2), Value::from(1))]);
    assert_eq!(handle.get_state(), Value::from(2));
}
