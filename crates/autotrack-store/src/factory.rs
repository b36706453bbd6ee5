//! Store factory utilities.
//!
//! A factory store is one logical store whose concrete backing instance can
//! be replaced at runtime (for example when the active account changes).
//! [`StoreFactoryUtils`] keeps a record of every subscription made through
//! [`portable_subscribe`](StoreFactoryUtils::portable_subscribe) so that
//! [`rebind_subscriptions`](StoreFactoryUtils::rebind_subscriptions) can move
//! them all from the old instance to the new one, and exposes a
//! [`PersistApi`] that always forwards to the live instance.
//!
//! [`FactoryStore`] wires both together behind the [`Store`] trait.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use autotrack_core::{
    CodecError, HydrationListener, Listener, PersistApi, PersistOptions, Selector, Store, StoreHandle, SubscribeArgs,
    SubscribeOptions, Unsubscribe, Value, same_value, store_key, store_name,
};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// Returns the backing store that is live right now.
pub type GetStore = Arc<dyn Fn() -> StoreHandle + Send + Sync>;

// ----------------------------------------------------------------------
// Subscription bookkeeping
// ----------------------------------------------------------------------

struct SubscriptionRecord {
    args: SubscribeArgs,
    /// Cancels the subscription on whichever instance currently holds it.
    live: Option<Unsubscribe>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    records: BTreeMap<u64, SubscriptionRecord>,
}

/// A listener call deferred until the bookkeeping lock is released.
struct Notification {
    listener: Listener,
    next: Value,
    prev: Value,
}

/// Subscription and persistence helpers for a swappable store.
#[derive(Clone)]
pub struct StoreFactoryUtils {
    get_store: GetStore,
    registry: Arc<Mutex<Registry>>,
    persist: Arc<FactoryPersist>,
}

pub fn create_store_factory_utils<F>(get_store: F) -> StoreFactoryUtils
where
    F: Fn() -> StoreHandle + Send + Sync + 'static,
{
    let get_store: GetStore = Arc::new(get_store);
    StoreFactoryUtils {
        persist: Arc::new(FactoryPersist {
            get_store: Arc::clone(&get_store),
        }),
        get_store,
        registry: Arc::new(Mutex::new(Registry::default())),
    }
}

impl StoreFactoryUtils {
    /// Persistence surface forwarding to the live instance.
    pub fn persist(&self) -> Arc<dyn PersistApi> {
        self.persist.clone()
    }

    /// The live backing store.
    pub fn live_store(&self) -> StoreHandle {
        (self.get_store)()
    }

    /// Number of portable subscriptions still active.
    pub fn subscription_count(&self) -> usize {
        self.registry.lock().records.len()
    }

    /// Subscribe to the live instance and remember the subscription so it
    /// follows later rebinds.
    pub fn portable_subscribe(&self, args: SubscribeArgs) -> Unsubscribe {
        let live = (self.get_store)().subscribe_args(args.clone());

        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.records.insert(id, SubscriptionRecord { args, live: Some(live) });
            id
        };

        let registry = Arc::downgrade(&self.registry);
        Unsubscribe::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let removed = registry.lock().records.remove(&id);
            if let Some(SubscriptionRecord { live: Some(live), .. }) = removed {
                live.unsubscribe();
            }
        })
    }

    /// Move every portable subscription from `old` to `new`, then notify
    /// listeners whose observed value differs between the two.
    ///
    /// Listener panics propagate to the caller.
    pub fn rebind_subscriptions(&self, old: &StoreHandle, new: &StoreHandle) {
        let pending = self.reattach(old, new);
        notify(pending);
    }

    /// Detach from `old` and attach to `new` under the bookkeeping lock.
    /// Returns the notifications the swap calls for.
    fn reattach(&self, old: &StoreHandle, new: &StoreHandle) -> Vec<Notification> {
        let mut registry = self.registry.lock();
        let old_state = old.get_state();
        let new_state = new.get_state();
        let mut pending = Vec::new();

        for record in registry.records.values_mut() {
            if let Some(live) = record.live.take() {
                live.unsubscribe();
            }

            match &record.args {
                SubscribeArgs::Listener(listener) => {
                    record.live = Some(new.subscribe(Arc::clone(listener)));
                    if !same_value(&new_state, &old_state) {
                        pending.push(Notification {
                            listener: Arc::clone(listener),
                            next: new_state.clone(),
                            prev: old_state.clone(),
                        });
                    }
                }
                SubscribeArgs::Selector {
                    selector,
                    listener,
                    options,
                } => {
                    let prev = selector(&old_state);
                    let next = selector(&new_state);
                    // The catch-up notification below replaces an immediate fire.
                    let reattach_options = SubscribeOptions {
                        fire_immediately: false,
                        ..options.clone()
                    };
                    record.live = Some(new.subscribe_with_selector(
                        Arc::clone(selector),
                        Arc::clone(listener),
                        reattach_options,
                    ));
                    if !options.is_equal(&next, &prev) {
                        pending.push(Notification {
                            listener: Arc::clone(listener),
                            next,
                            prev,
                        });
                    }
                }
            }
        }

        debug!(
            from = %store_name(old.as_ref()),
            to = %store_name(new.as_ref()),
            subscriptions = registry.records.len(),
            notifications = pending.len(),
            "rebound subscriptions"
        );
        pending
    }
}

fn notify(pending: Vec<Notification>) {
    for Notification { listener, next, prev } in pending {
        listener(&next, &prev);
    }
}

impl fmt::Debug for StoreFactoryUtils {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreFactoryUtils")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

// ----------------------------------------------------------------------
// Persistence passthrough
// ----------------------------------------------------------------------

/// [`PersistApi`] that forwards to the live instance, with inert defaults
/// when that instance is not persisted.
pub struct FactoryPersist {
    get_store: GetStore,
}

impl FactoryPersist {
    fn live(&self) -> Option<Arc<dyn PersistApi>> {
        (self.get_store)().persist()
    }
}

impl PersistApi for FactoryPersist {
    fn clear_storage(&self) {
        if let Some(persist) = self.live() {
            persist.clear_storage();
        }
    }

    fn get_options(&self) -> PersistOptions {
        self.live().map(|p| p.get_options()).unwrap_or_default()
    }

    fn has_hydrated(&self) -> bool {
        self.live().is_some_and(|p| p.has_hydrated())
    }

    fn on_finish_hydration(&self, listener: HydrationListener) -> Unsubscribe {
        match self.live() {
            Some(persist) => persist.on_finish_hydration(listener),
            None => Unsubscribe::noop(),
        }
    }

    fn on_hydrate(&self, listener: HydrationListener) -> Unsubscribe {
        match self.live() {
            Some(persist) => persist.on_hydrate(listener),
            None => Unsubscribe::noop(),
        }
    }

    fn rehydrate(&self) -> Result<(), CodecError> {
        match self.live() {
            Some(persist) => persist.rehydrate(),
            None => Ok(()),
        }
    }

    fn set_options(&self, options: PersistOptions) {
        if let Some(persist) = self.live() {
            persist.set_options(options);
        }
    }
}

// ----------------------------------------------------------------------
// Factory store
// ----------------------------------------------------------------------

/// A [`Store`] whose backing instance can be swapped with
/// [`set_backing`](FactoryStore::set_backing).
pub struct FactoryStore {
    name: Option<String>,
    backing: Arc<RwLock<StoreHandle>>,
    utils: StoreFactoryUtils,
    /// Held for writing across a swap so no subscription lands on the
    /// outgoing instance after its records were moved.
    swap: RwLock<()>,
}

impl FactoryStore {
    pub fn new(initial: StoreHandle) -> Arc<Self> {
        Self::build(None, initial)
    }

    pub fn named(name: impl Into<String>, initial: StoreHandle) -> Arc<Self> {
        Self::build(Some(name.into()), initial)
    }

    fn build(name: Option<String>, initial: StoreHandle) -> Arc<Self> {
        let backing = Arc::new(RwLock::new(initial));
        let live = Arc::clone(&backing);
        let utils = create_store_factory_utils(move || Arc::clone(&*live.read()));
        Arc::new(Self {
            name,
            backing,
            utils,
            swap: RwLock::new(()),
        })
    }

    pub fn backing(&self) -> StoreHandle {
        Arc::clone(&*self.backing.read())
    }

    pub fn utils(&self) -> &StoreFactoryUtils {
        &self.utils
    }

    /// Swap the backing instance and move every subscription onto it.
    /// Listeners whose value changed are notified before this returns.
    pub fn set_backing(&self, next: StoreHandle) {
        let pending = {
            let _swap = self.swap.write();
            let old = std::mem::replace(&mut *self.backing.write(), Arc::clone(&next));
            if store_key(&old) == store_key(&next) {
                return;
            }
            self.utils.reattach(&old, &next)
        };
        notify(pending);
    }
}

impl Store for FactoryStore {
    fn get_state(&self) -> Value {
        self.backing().get_state()
    }

    fn subscribe(&self, listener: Listener) -> Unsubscribe {
        self.subscribe_args(SubscribeArgs::Listener(listener))
    }

    fn subscribe_with_selector(&self, selector: Selector, listener: Listener, options: SubscribeOptions) -> Unsubscribe {
        self.subscribe_args(SubscribeArgs::Selector {
            selector,
            listener,
            options,
        })
    }

    fn subscribe_args(&self, args: SubscribeArgs) -> Unsubscribe {
        // The immediate fire runs after the swap guard is released so the
        // listener may swap the backing instance itself.
        let (args, immediate) = match args {
            SubscribeArgs::Selector {
                selector,
                listener,
                options,
            } if options.fire_immediately => {
                let immediate = (Arc::clone(&selector), Arc::clone(&listener));
                let options = SubscribeOptions {
                    fire_immediately: false,
                    ..options
                };
                (SubscribeArgs::Selector { selector, listener, options }, Some(immediate))
            }
            args => (args, None),
        };

        let (unsubscribe, fire) = {
            let _swap = self.swap.read_recursive();
            let unsubscribe = self.utils.portable_subscribe(args);
            let fire = immediate.map(|(selector, listener)| {
                let slice = selector(&self.backing().get_state());
                Notification {
                    listener,
                    next: slice.clone(),
                    prev: slice,
                }
            });
            (unsubscribe, fire)
        };
        notify(fire.into_iter().collect());
        unsubscribe
    }

    fn persist(&self) -> Option<Arc<dyn PersistApi>> {
        Some(self.utils.persist())
    }

    fn name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.backing().name())
    }
}

impl fmt::Debug for FactoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryStore")
            .field("name", &self.name)
            .field("backing", &store_name(self.backing().as_ref()))
            .field("subscriptions", &self.utils.subscription_count())
            .finish()
    }
}
