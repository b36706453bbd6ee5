//! Store action extraction.

use std::collections::BTreeMap;
use std::fmt;

use autotrack_core::{Method, Object, Store, StoreError, Value};

/// Extra methods merged into a [`StoreActions`] set.
pub type BundledMethods = BTreeMap<String, Method>;

/// The function-valued members of a store's state, bound to the state they
/// were extracted from.
#[derive(Clone)]
pub struct StoreActions {
    this: Value,
    actions: BTreeMap<String, Method>,
}

/// Extract the actions of `store` from a single `get_state()` read.
///
/// Only own function properties of the top-level state object are taken.
/// `bundled` methods are merged in; a bundled name that shadows a state
/// action is rejected.
pub fn create_store_actions<S>(store: &S, bundled: Option<BundledMethods>) -> Result<StoreActions, StoreError>
where
    S: Store + ?Sized,
{
    let state = store.get_state();
    let Some(props) = state.as_object() else {
        return Err(StoreError::NotAnObject(state.kind().to_string()));
    };

    let mut actions: BTreeMap<String, Method> = props
        .iter()
        .filter_map(|(name, value)| value.as_function().map(|m| (name.clone(), m.clone())))
        .collect();

    for (name, method) in bundled.unwrap_or_default() {
        if actions.contains_key(&name) {
            return Err(StoreError::ActionCollision(name));
        }
        actions.insert(name, method);
    }

    Ok(StoreActions { this: state, actions })
}

impl StoreActions {
    /// Call `name` with `args`; `None` when there is no such action.
    pub fn call(&self, name: &str, args: &[Value]) -> Option<Value> {
        self.actions.get(name).map(|m| m.call(&self.this, args))
    }

    pub fn get(&self, name: &str) -> Option<&Method> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Action names in key order.
    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The actions as a plain object value.
    pub fn to_value(&self) -> Value {
        let props: Object = self
            .actions
            .iter()
            .map(|(name, m)| (name.clone(), Value::Function(m.clone())))
            .collect();
        Value::Object(props.into())
    }
}

impl fmt::Debug for StoreActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreActions").field("names", &self.names()).finish()
    }
}
