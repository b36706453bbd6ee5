//! # autotrack-store
//! Store-level utilities for the autotrack runtime.
//!
//! # Modules
//!
//! - [`factory`] — swappable factory stores and subscription rebinding
//! - [`actions`] — store action extraction

pub mod actions;
pub mod factory;

pub use actions::{BundledMethods, StoreActions, create_store_actions};
pub use factory::{FactoryPersist, FactoryStore, GetStore, StoreFactoryUtils, create_store_factory_utils};
