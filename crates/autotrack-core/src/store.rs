//! The minimal store contract consumed by the runtime.
//!
//! A store is any state container exposing a current snapshot, listener and
//! selector subscriptions, and optionally a persistence lifecycle. The
//! runtime never owns store lifetime; it only holds [`StoreHandle`]s.

use std::fmt;
use std::sync::Arc;

use crate::error::CodecError;
use crate::value::{Value, same_value};

/// Derives a slice from a state snapshot. Must be pure and synchronous.
pub type Selector = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Receives `(next, prev)` when the observed value changes.
pub type Listener = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Decides whether two slices are equal (no notification when `true`).
pub type EqualityFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Receives the state when a hydration phase starts or finishes.
pub type HydrationListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Shared handle to a store. Identity is the handle's pointer.
pub type StoreHandle = Arc<dyn Store>;

/// Wrap a closure as a [`Selector`].
pub fn selector<F>(f: F) -> Selector
where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Value, &Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as an [`EqualityFn`].
pub fn equality_fn<F>(f: F) -> EqualityFn
where
    F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Stable identity key for a store handle.
pub fn store_key(store: &StoreHandle) -> usize {
    Arc::as_ptr(store) as *const () as usize
}

/// Human-readable store name for diagnostics: the persistence name when the
/// store is persisted, else [`Store::name`], else `"anonymous"`.
pub fn store_name(store: &dyn Store) -> String {
    store
        .persist()
        .map(|p| p.get_options().name)
        .filter(|name| !name.is_empty())
        .or_else(|| store.name())
        .unwrap_or_else(|| "anonymous".to_string())
}

// ----------------------------------------------------------------------
// Subscriptions
// ----------------------------------------------------------------------

/// Options for a selector subscription.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Slice comparison; [`same_value`] when `None`.
    pub equality_fn: Option<EqualityFn>,
    /// Call the listener with `(slice, slice)` right after subscribing.
    pub fire_immediately: bool,
}

impl SubscribeOptions {
    pub fn with_equality_fn(equality_fn: EqualityFn) -> Self {
        Self {
            equality_fn: Some(equality_fn),
            fire_immediately: false,
        }
    }

    /// Compare two slices with the configured equality function.
    pub fn is_equal(&self, a: &Value, b: &Value) -> bool {
        match &self.equality_fn {
            Some(eq) => eq(a, b),
            None => same_value(a, b),
        }
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("custom_equality", &self.equality_fn.is_some())
            .field("fire_immediately", &self.fire_immediately)
            .finish()
    }
}

/// The two subscription forms a store accepts, as one value.
#[derive(Clone)]
pub enum SubscribeArgs {
    /// `subscribe(listener)`: called with whole-state `(next, prev)`.
    Listener(Listener),
    /// `subscribe(selector, listener, options)`: called with slices.
    Selector {
        selector: Selector,
        listener: Listener,
        options: SubscribeOptions,
    },
}

impl SubscribeArgs {
    pub fn listener(&self) -> &Listener {
        match self {
            SubscribeArgs::Listener(listener) => listener,
            SubscribeArgs::Selector { listener, .. } => listener,
        }
    }
}

impl fmt::Debug for SubscribeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeArgs::Listener(_) => f.write_str("SubscribeArgs::Listener"),
            SubscribeArgs::Selector { options, .. } => f
                .debug_struct("SubscribeArgs::Selector")
                .field("options", options)
                .finish(),
        }
    }
}

/// One-shot cancellation handle returned by every subscribe call.
///
/// Dropping the handle does *not* unsubscribe; call [`Unsubscribe::unsubscribe`].
#[must_use = "dropping an Unsubscribe leaves the subscription active"]
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Some(Box::new(f)))
    }

    /// A handle with nothing to cancel.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unsubscribe").field(&self.0.is_some()).finish()
    }
}

// ----------------------------------------------------------------------
// Persistence lifecycle
// ----------------------------------------------------------------------

/// Persistence settings exposed through [`PersistApi::get_options`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOptions {
    /// Storage key; also used as the store's diagnostic name.
    pub name: String,
    /// Version written into every persisted envelope.
    pub version: u32,
    /// Encode `Map`/`Set` values with the tagging replacer and reviver.
    pub map_set_handling: bool,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: 0,
            map_set_handling: true,
        }
    }
}

impl PersistOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Hydration lifecycle of a persisted store.
pub trait PersistApi: Send + Sync {
    /// Delete the persisted payload.
    fn clear_storage(&self);

    fn get_options(&self) -> PersistOptions;

    /// Whether the last rehydration has finished.
    fn has_hydrated(&self) -> bool;

    /// Register a listener for the end of each rehydration.
    fn on_finish_hydration(&self, listener: HydrationListener) -> Unsubscribe;

    /// Register a listener for the start of each rehydration.
    fn on_hydrate(&self, listener: HydrationListener) -> Unsubscribe;

    /// Reload state from storage. A corrupt payload is an error, not an empty store.
    fn rehydrate(&self) -> Result<(), CodecError>;

    fn set_options(&self, options: PersistOptions);
}

// ----------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------

/// A state container.
pub trait Store: Send + Sync {
    /// Current state snapshot.
    fn get_state(&self) -> Value;

    /// Subscribe to whole-state changes.
    fn subscribe(&self, listener: Listener) -> Unsubscribe;

    /// Subscribe to changes of `selector(state)` under `options.equality_fn`.
    fn subscribe_with_selector(
        &self,
        selector: Selector,
        listener: Listener,
        options: SubscribeOptions,
    ) -> Unsubscribe;

    /// Dispatch either subscription form.
    ///
    /// Default implementation forwards to [`subscribe`](Self::subscribe) or
    /// [`subscribe_with_selector`](Self::subscribe_with_selector).
    fn subscribe_args(&self, args: SubscribeArgs) -> Unsubscribe {
        match args {
            SubscribeArgs::Listener(listener) => self.subscribe(listener),
            SubscribeArgs::Selector {
                selector,
                listener,
                options,
            } => self.subscribe_with_selector(selector, listener, options),
        }
    }

    /// Persistence lifecycle, when the store is persisted.
    fn persist(&self) -> Option<Arc<dyn PersistApi>> {
        None
    }

    fn name(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_options_use_same_value() {
        let opts = SubscribeOptions::default();
        let obj = Value::object([("n", Value::from(1))]);
        assert!(opts.is_equal(&obj, &obj.clone()));
        assert!(!opts.is_equal(&obj, &Value::object([("n", Value::from(1))])));
    }

    #[test]
    fn custom_equality_is_used() {
        let opts = SubscribeOptions::with_equality_fn(equality_fn(|a, b| a == b));
        assert!(opts.is_equal(
            &Value::object([("n", Value::from(1))]),
            &Value::object([("n", Value::from(1))])
        ));
    }

    #[test]
    fn unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = Unsubscribe::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Unsubscribe::noop().unsubscribe();
    }

    #[test]
    fn subscribe_args_expose_listener() {
        let l = listener(|_, _| {});
        let args = SubscribeArgs::Selector {
            selector: selector(|s| s.get("n")),
            listener: Arc::clone(&l),
            options: SubscribeOptions::default(),
        };
        assert!(Arc::ptr_eq(args.listener(), &l));
    }

    #[test]
    fn persist_options_default_enables_map_set() {
        let opts = PersistOptions::named("wallets");
        assert_eq!(opts.name, "wallets");
        assert_eq!(opts.version, 0);
        assert!(opts.map_set_handling);
    }
}
