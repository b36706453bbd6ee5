//! # autotrack-core
//! Foundation types for the auto-tracking derived-store runtime.
//!
//! # Modules
//!
//! - [`value`] — dynamic `Value` model with identity and deep equality
//! - [`store`] — the minimal store contract the runtime consumes
//! - [`codec`] — JSON persistence codec with `Map`/`Set` support
//! - [`error`] — error enums
//! - [`config`] — `TrackingConfig` defaults and env loading
//! - [`logging`] — tracing subscriber setup
//! - `testing` — in-memory `TestStore` (feature `testing`)

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenient access
pub use codec::{
    PersistedState, default_deserialize_state, default_serialize_state, merge_persisted_state,
    omit_store_methods,
};
pub use config::TrackingConfig;
pub use error::{AutotrackError, CodecError, ConfigError, StoreError};
pub use store::{
    EqualityFn, HydrationListener, Listener, PersistApi, PersistOptions, Selector, Store,
    StoreHandle, SubscribeArgs, SubscribeOptions, Unsubscribe, equality_fn, listener, selector,
    store_key, store_name,
};
pub use value::{Method, Object, Value, same_value, same_value_zero};
