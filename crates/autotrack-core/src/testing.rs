//! In-memory store for tests (feature `testing`).
//!
//! [`TestStore`] implements the [`Store`] contract with synchronous
//! notification: `set_state` notifies listeners before returning. A store
//! built with [`TestStore::persisted`] writes every change through to a
//! [`MemoryStorage`] and exposes the hydration lifecycle via [`PersistApi`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::codec::{default_deserialize_state, default_serialize_state, merge_persisted_state, omit_store_methods};
use crate::error::CodecError;
use crate::store::{
    HydrationListener, Listener, PersistApi, PersistOptions, Selector, Store, SubscribeOptions, Unsubscribe,
};
use crate::value::{Value, same_value};

// ----------------------------------------------------------------------
// Storage
// ----------------------------------------------------------------------

/// String key/value storage standing in for a device store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: String) {
        self.entries.write().insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ----------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------

#[derive(Clone)]
enum Subscriber {
    Listener(Listener),
    Selector {
        selector: Selector,
        listener: Listener,
        options: SubscribeOptions,
        /// Last slice delivered (or observed at subscribe time).
        slice: Arc<Mutex<Value>>,
    },
}

type SubscriberList = Arc<RwLock<Vec<(u64, Subscriber)>>>;

/// Synchronous in-memory store.
pub struct TestStore {
    name: String,
    state: RwLock<Value>,
    subscribers: SubscriberList,
    next_id: AtomicU64,
    persist: Option<Arc<TestPersist>>,
}

impl TestStore {
    /// Create an unpersisted store.
    pub fn new(name: impl Into<String>, initial: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: RwLock::new(initial),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            persist: None,
        })
    }

    /// Create a store persisted to `storage` under `options.name`, and
    /// hydrate it from any payload already present.
    pub fn persisted(
        initial: Value,
        storage: Arc<MemoryStorage>,
        options: PersistOptions,
    ) -> Result<Arc<Self>, CodecError> {
        let name = options.name.clone();
        let store = Arc::new_cyclic(|weak: &Weak<TestStore>| Self {
            name,
            state: RwLock::new(initial),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            persist: Some(Arc::new(TestPersist::new(weak.clone(), storage, options))),
        });
        if let Some(persist) = &store.persist {
            persist.rehydrate()?;
        }
        Ok(store)
    }

    /// Replace the state and notify subscribers when it changed identity.
    pub fn set_state(&self, next: Value) {
        let prev = std::mem::replace(&mut *self.state.write(), next.clone());
        if same_value(&prev, &next) {
            return;
        }
        self.notify(&next, &prev);
        if let Some(persist) = &self.persist {
            persist.write_through(&next);
        }
    }

    /// Set one top-level key.
    pub fn set(&self, key: &str, value: Value) {
        let next = self.get_state().with(key, value);
        self.set_state(next);
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let next = f(&self.get_state());
        self.set_state(next);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn notify(&self, next: &Value, prev: &Value) {
        // Snapshot so listeners may subscribe or unsubscribe re-entrantly.
        let subscribers: Vec<Subscriber> = self.subscribers.read().iter().map(|(_, s)| s.clone()).collect();

        for subscriber in subscribers {
            match subscriber {
                Subscriber::Listener(listener) => listener(next, prev),
                Subscriber::Selector {
                    selector,
                    listener,
                    options,
                    slice,
                } => {
                    let next_slice = selector(next);
                    let prev_slice = {
                        let mut current = slice.lock();
                        if options.is_equal(&current, &next_slice) {
                            continue;
                        }
                        std::mem::replace(&mut *current, next_slice.clone())
                    };
                    listener(&next_slice, &prev_slice);
                }
            }
        }
    }

    fn add_subscriber(&self, subscriber: Subscriber) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, subscriber));

        let subscribers = Arc::downgrade(&self.subscribers);
        Unsubscribe::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.write().retain(|(existing, _)| *existing != id);
            }
        })
    }
}

impl Store for TestStore {
    fn get_state(&self) -> Value {
        self.state.read().clone()
    }

    fn subscribe(&self, listener: Listener) -> Unsubscribe {
        self.add_subscriber(Subscriber::Listener(listener))
    }

    fn subscribe_with_selector(&self, selector: Selector, listener: Listener, options: SubscribeOptions) -> Unsubscribe {
        let initial = selector(&self.get_state());
        let fire_immediately = options.fire_immediately;
        let unsubscribe = self.add_subscriber(Subscriber::Selector {
            selector,
            listener: Arc::clone(&listener),
            options,
            slice: Arc::new(Mutex::new(initial.clone())),
        });
        if fire_immediately {
            listener(&initial, &initial);
        }
        unsubscribe
    }

    fn persist(&self) -> Option<Arc<dyn PersistApi>> {
        self.persist.clone().map(|p| p as Arc<dyn PersistApi>)
    }

    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

// ----------------------------------------------------------------------
// Persistence
// ----------------------------------------------------------------------

type HydrationListeners = Arc<RwLock<Vec<(u64, HydrationListener)>>>;

/// Hydration lifecycle for a persisted [`TestStore`].
pub struct TestPersist {
    store: Weak<TestStore>,
    storage: Arc<MemoryStorage>,
    options: RwLock<PersistOptions>,
    hydrated: AtomicBool,
    hydrating: AtomicBool,
    on_hydrate: HydrationListeners,
    on_finish: HydrationListeners,
    next_id: AtomicU64,
}

impl TestPersist {
    fn new(store: Weak<TestStore>, storage: Arc<MemoryStorage>, options: PersistOptions) -> Self {
        Self {
            store,
            storage,
            options: RwLock::new(options),
            hydrated: AtomicBool::new(false),
            hydrating: AtomicBool::new(false),
            on_hydrate: Arc::new(RwLock::new(Vec::new())),
            on_finish: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn write_through(&self, state: &Value) {
        if self.hydrating.load(Ordering::Acquire) {
            return;
        }
        let options = self.options.read().clone();
        let partial = omit_store_methods(state);
        match default_serialize_state(&partial, options.version, options.map_set_handling) {
            Ok(text) => self.storage.set(&options.name, text),
            Err(err) => debug!(store = %options.name, error = %err, "skipped write-through"),
        }
    }

    fn register(&self, list: &HydrationListeners, listener: HydrationListener) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        list.write().push((id, listener));
        let list = Arc::downgrade(list);
        Unsubscribe::new(move || {
            if let Some(list) = list.upgrade() {
                list.write().retain(|(existing, _)| *existing != id);
            }
        })
    }

    fn fire(list: &HydrationListeners, state: &Value) {
        let listeners: Vec<HydrationListener> = list.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(state);
        }
    }
}

impl PersistApi for TestPersist {
    fn clear_storage(&self) {
        let name = self.options.read().name.clone();
        self.storage.remove(&name);
    }

    fn get_options(&self) -> PersistOptions {
        self.options.read().clone()
    }

    fn has_hydrated(&self) -> bool {
        self.hydrated.load(Ordering::Acquire)
    }

    fn on_finish_hydration(&self, listener: HydrationListener) -> Unsubscribe {
        self.register(&self.on_finish, listener)
    }

    fn on_hydrate(&self, listener: HydrationListener) -> Unsubscribe {
        self.register(&self.on_hydrate, listener)
    }

    fn rehydrate(&self) -> Result<(), CodecError> {
        let Some(store) = self.store.upgrade() else {
            return Ok(());
        };
        let options = self.options.read().clone();

        self.hydrated.store(false, Ordering::Release);
        Self::fire(&self.on_hydrate, &store.get_state());

        if let Some(text) = self.storage.get(&options.name) {
            let persisted = default_deserialize_state(&text, options.map_set_handling)?;
            let merged = merge_persisted_state(&store.get_state(), &persisted.state);
            self.hydrating.store(true, Ordering::Release);
            store.set_state(merged);
            self.hydrating.store(false, Ordering::Release);
        }

        self.hydrated.store(true, Ordering::Release);
        Self::fire(&self.on_finish, &store.get_state());
        Ok(())
    }

    fn set_options(&self, options: PersistOptions) {
        *self.options.write() = options;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{listener, selector};
    use std::sync::atomic::AtomicUsize;

    fn counter_state(n: i64) -> Value {
        Value::object([("count", Value::from(n)), ("label", Value::from("counter"))])
    }

    #[test]
    fn listener_sees_next_and_prev() {
        let store = TestStore::new("counter", counter_state(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _unsub = store.subscribe(listener(move |next, prev| {
            s.lock().push((next.get("count"), prev.get("count")));
        }));

        store.set("count", Value::from(1));
        assert_eq!(*seen.lock(), vec![(Value::from(1), Value::from(0))]);
    }

    #[test]
    fn selector_subscription_skips_equal_slices() {
        let store = TestStore::new("counter", counter_state(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let _unsub = store.subscribe_with_selector(
            selector(|s| s.get("count")),
            listener(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            SubscribeOptions::default(),
        );

        store.set("label", Value::from("renamed"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        store.set("count", Value::from(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fire_immediately_delivers_current_slice() {
        let store = TestStore::new("counter", counter_state(3));
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let _unsub = store.subscribe_with_selector(
            selector(|s| s.get("count")),
            listener(move |next, prev| *s.lock() = Some((next.clone(), prev.clone()))),
            SubscribeOptions {
                fire_immediately: true,
                ..SubscribeOptions::default()
            },
        );
        assert_eq!(*seen.lock(), Some((Value::from(3), Value::from(3))));
    }

    #[test]
    fn unsubscribe_removes_subscriber() {
        let store = TestStore::new("counter", counter_state(0));
        let unsub = store.subscribe(listener(|_, _| {}));
        assert_eq!(store.subscriber_count(), 1);
        unsub.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn setting_identical_state_is_silent() {
        let store = TestStore::new("counter", counter_state(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let _unsub = store.subscribe(listener(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        store.set_state(store.get_state());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn persisted_store_writes_through_and_rehydrates() {
        let storage = MemoryStorage::new();
        let store = TestStore::persisted(counter_state(0), Arc::clone(&storage), PersistOptions::named("counter")).unwrap();
        assert!(store.persist().unwrap().has_hydrated());

        store.set("count", Value::from(9));
        assert_eq!(storage.len(), 1);

        let revived = TestStore::persisted(counter_state(0), Arc::clone(&storage), PersistOptions::named("counter")).unwrap();
        assert_eq!(revived.get_state().get("count"), Value::from(9));
    }

    #[test]
    fn hydration_listeners_fire_in_order() {
        let storage = MemoryStorage::new();
        let store = TestStore::persisted(counter_state(0), storage, PersistOptions::named("counter")).unwrap();
        let persist = store.persist().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));

        let e1 = Arc::clone(&events);
        let _a = persist.on_hydrate(Arc::new(move |_: &Value| e1.lock().push("start")));
        let e2 = Arc::clone(&events);
        let _b = persist.on_finish_hydration(Arc::new(move |_: &Value| e2.lock().push("finish")));

        persist.rehydrate().unwrap();
        assert_eq!(*events.lock(), vec!["start", "finish"]);
    }

    #[test]
    fn corrupt_payload_fails_hydration() {
        let storage = MemoryStorage::new();
        storage.set("counter", "{broken".to_string());
        let result = TestStore::persisted(counter_state(0), storage, PersistOptions::named("counter"));
        assert!(matches!(result, Err(CodecError::Deserialize(_))));
    }

    #[test]
    fn clear_storage_removes_payload() {
        let storage = MemoryStorage::new();
        let store = TestStore::persisted(counter_state(0), Arc::clone(&storage), PersistOptions::named("counter")).unwrap();
        store.set("count", Value::from(1));
        store.persist().unwrap().clear_storage();
        assert!(storage.is_empty());
    }
}
