//! Integration test suite for autotrack.
//!
//! Tests in this crate drive the proxy, path trie, factory stores, and
//! persistence codec together against in-memory stores.

pub mod helpers;
