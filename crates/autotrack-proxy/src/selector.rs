//! Selectors built from minimized path entries.

use std::sync::Arc;

use autotrack_core::{Selector, Value, store_name};

use crate::path_finder::PathEntry;
use crate::proxy::TrackedInvocation;

/// Walk `state` along `path`. Stops early and returns the current value as
/// soon as it is not an array, object, map, or set.
pub fn get_value_at_path(state: &Value, path: &[String]) -> Value {
    let mut current = state.clone();
    for segment in path {
        if !current.is_object_like() {
            return current;
        }
        current = current.get(segment);
    }
    current
}

pub fn build_path_selector(path: Vec<String>) -> Selector {
    Arc::new(move |state| get_value_at_path(state, &path))
}

/// Selector that re-invokes `invocation` on the live parent of `path`.
///
/// Yields `Undefined` when the parent no longer has a callable under the
/// recorded name.
pub fn build_invocation_selector(path: Vec<String>, invocation: TrackedInvocation) -> Selector {
    let parent_path: Vec<String> = path[..path.len().saturating_sub(1)].to_vec();
    let TrackedInvocation { method, args } = invocation;
    let args = args.unwrap_or_default();

    Arc::new(move |state| {
        let parent = get_value_at_path(state, &parent_path);
        match parent.get(&method) {
            Value::Function(f) => f.call(&parent, &args),
            _ => Value::Undefined,
        }
    })
}

pub fn build_selector(entry: &PathEntry) -> Selector {
    match &entry.invocation {
        Some(invocation) => build_invocation_selector(entry.path.clone(), invocation.clone()),
        None => build_path_selector(entry.path.clone()),
    }
}

/// Render an entry as `$(store).a.b`, with an `(n_args)` suffix for
/// invocations called with arguments.
pub fn describe_path_entry(entry: &PathEntry) -> String {
    let mut out = format!("$({})", store_name(entry.store.as_ref()));
    if !entry.path.is_empty() {
        out.push('.');
        out.push_str(&entry.path.join("."));
    }
    if let Some(invocation) = &entry.invocation {
        match invocation.arg_count() {
            0 => {}
            1 => out.push_str("(1_arg)"),
            n => out.push_str(&format!("({n}_args)")),
        }
    }
    out
}
