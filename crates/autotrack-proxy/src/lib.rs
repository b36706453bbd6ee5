//! # autotrack-proxy
//! Automatic dependency tracking for derived store values.
//!
//! Read store state through a [`TrackingProxy`]; every read lands in a
//! [`PathFinder`] trie, which collapses into the minimal set of selector
//! subscriptions that keep the derived value correct.
//!
//! # Modules
//!
//! - [`proxy`] — tracking proxy and per-store proxy cache
//! - [`path_finder`] — path trie and minimal path derivation
//! - [`selector`] — selectors and diagnostics for path entries

pub mod path_finder;
pub mod proxy;
pub mod selector;

pub use path_finder::{PathEntry, PathFinder, TrieNode, create_path_finder};
pub use proxy::{
    ProxyCache, TrackPath, Tracked, TrackedInvocation, TrackedMethod, TrackingProxy, get_or_create_proxy,
};
pub use selector::{
    build_invocation_selector, build_path_selector, build_selector, describe_path_entry, get_value_at_path,
};
