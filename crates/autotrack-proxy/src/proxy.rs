//! Tracking proxy.
//!
//! A [`TrackingProxy`] wraps one node of a store snapshot and reports every
//! read made through it to a [`TrackPath`] callback before resolving the read
//! against the real value. Each accessor method plays the role of one
//! interception trap:
//!
//! | method | tracks | bails out |
//! |---|---|---|
//! | [`get`](TrackingProxy::get) | `path + key` (or `path` for inherited methods) | no |
//! | [`iter`](TrackingProxy::iter) | `path` as leaf | yes |
//! | [`keys`](TrackingProxy::keys) | `path` as leaf | yes |
//! | [`get_own_property`](TrackingProxy::get_own_property) | `path` as leaf | yes |
//! | [`has`](TrackingProxy::has) | `path` as leaf | no |
//! | [`to_value`](TrackingProxy::to_value) | `path` as leaf | yes |
//!
//! Once a node has bailed out, later `get`s and `iter`s on it resolve
//! directly against the real value without tracking.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use autotrack_core::{Method, StoreHandle, Value, store_key, store_name};
use dashmap::DashMap;
use parking_lot::Mutex;

/// Property key that never resolves and is never tracked.
pub const PROTO_KEY: &str = "__proto__";

/// Records that `path` was touched on `store`.
///
/// Arguments: store, path, leaf flag, and the invocation when the access was
/// a call of a store action.
pub type TrackPath = Arc<dyn Fn(&StoreHandle, &[String], bool, Option<TrackedInvocation>) + Send + Sync>;

/// A call of a store action observed through a proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedInvocation {
    /// Name of the action on the parent object.
    pub method: String,
    /// Call arguments; `None` when called without arguments.
    pub args: Option<Vec<Value>>,
}

impl TrackedInvocation {
    pub fn new(method: impl Into<String>, args: &[Value]) -> Self {
        Self {
            method: method.into(),
            args: (!args.is_empty()).then(|| args.to_vec()),
        }
    }

    pub fn arg_count(&self) -> usize {
        self.args.as_ref().map_or(0, Vec::len)
    }
}

// ----------------------------------------------------------------------
// Cache
// ----------------------------------------------------------------------

struct CachedProxy {
    // Pins the store so its key cannot be reused while the entry lives.
    _store: StoreHandle,
    root: Tracked,
}

/// One root proxy per store identity.
///
/// The cache owns its proxies, and each proxy holds its store, so entries
/// live until removed or the cache is dropped.
#[derive(Default)]
pub struct ProxyCache {
    entries: DashMap<usize, CachedProxy>,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, store: &StoreHandle) -> bool {
        self.entries.contains_key(&store_key(store))
    }

    /// Drop the proxy for `store`. The next lookup snapshots the store again.
    pub fn remove(&self, store: &StoreHandle) -> bool {
        self.entries.remove(&store_key(store)).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl fmt::Debug for ProxyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCache").field("len", &self.entries.len()).finish()
    }
}

/// Return the cached root proxy for `store`, creating it from the current
/// snapshot on first use.
///
/// A primitive or nullish snapshot is tracked as a leaf at the empty path
/// and returned as [`Tracked::Value`].
pub fn get_or_create_proxy(store: &StoreHandle, cache: &ProxyCache, track_path: &TrackPath) -> Tracked {
    let key = store_key(store);
    if let Some(cached) = cache.entries.get(&key) {
        return cached.root.clone();
    }

    let snapshot = store.get_state();
    let root = if snapshot.is_object_like() {
        Tracked::Proxy(TrackingProxy::root(Arc::clone(store), Arc::clone(track_path), snapshot))
    } else {
        track_path(store, &[], true, None);
        Tracked::Value(snapshot)
    };

    cache
        .entries
        .entry(key)
        .or_insert_with(|| CachedProxy {
            _store: Arc::clone(store),
            root,
        })
        .root
        .clone()
}

// ----------------------------------------------------------------------
// Proxy
// ----------------------------------------------------------------------

/// State shared by a root proxy and all of its sub-proxies.
struct ProxyContext {
    store: StoreHandle,
    track_path: TrackPath,
    /// Keeps every node identity below valid for the context's lifetime.
    _root: Value,
    bailed: Mutex<HashSet<usize>>,
    /// First path each sub-object was reached through.
    sub_paths: Mutex<HashMap<usize, Arc<[String]>>>,
}

impl ProxyContext {
    fn track(&self, path: &[String], is_leaf: bool, invocation: Option<TrackedInvocation>) {
        (self.track_path)(&self.store, path, is_leaf, invocation);
    }

    fn is_bailed(&self, target: &Value) -> bool {
        target.identity().is_some_and(|id| self.bailed.lock().contains(&id))
    }

    fn bail_out(&self, target: &Value) {
        if let Some(id) = target.identity() {
            self.bailed.lock().insert(id);
        }
    }
}

/// Tracked view of one object-like node of a store snapshot.
#[derive(Clone)]
pub struct TrackingProxy {
    ctx: Arc<ProxyContext>,
    target: Value,
    path: Arc<[String]>,
}

impl TrackingProxy {
    fn root(store: StoreHandle, track_path: TrackPath, snapshot: Value) -> Self {
        let ctx = ProxyContext {
            store,
            track_path,
            _root: snapshot.clone(),
            bailed: Mutex::new(HashSet::new()),
            sub_paths: Mutex::new(HashMap::new()),
        };
        Self {
            ctx: Arc::new(ctx),
            target: snapshot,
            path: Arc::from(Vec::new()),
        }
    }

    fn child(&self, target: Value, path: Vec<String>) -> Self {
        let path = match target.identity() {
            Some(id) => Arc::clone(self.ctx.sub_paths.lock().entry(id).or_insert_with(|| Arc::from(path))),
            None => Arc::from(path),
        };
        Self {
            ctx: Arc::clone(&self.ctx),
            target,
            path,
        }
    }

    fn child_path(&self, key: &str) -> Vec<String> {
        let mut path = self.path.to_vec();
        path.push(key.to_string());
        path
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn store(&self) -> &StoreHandle {
        &self.ctx.store
    }

    pub fn is_bailed_out(&self) -> bool {
        self.ctx.is_bailed(&self.target)
    }

    /// Property read.
    pub fn get(&self, key: &str) -> Tracked {
        if self.ctx.is_bailed(&self.target) {
            return Tracked::resolve(&self.target, key);
        }
        if key == PROTO_KEY {
            return Tracked::Value(Value::Undefined);
        }

        let child = self.target.get(key);

        if let Value::Function(method) = child {
            if self.target.has_own(key) {
                return Tracked::Method(TrackedMethod {
                    this: self.target.clone(),
                    method,
                    recorder: Some(Arc::new(Recorder {
                        ctx: Arc::clone(&self.ctx),
                        path: self.child_path(key),
                        name: key.to_string(),
                    })),
                });
            }
            // Inherited built-in: the whole current value is in use.
            self.ctx.track(&self.path, true, None);
            return Tracked::Method(TrackedMethod::bound(self.target.clone(), method));
        }

        let path = self.child_path(key);
        if child.is_object_like() {
            self.ctx.track(&path, false, None);
            return Tracked::Proxy(self.child(child, path));
        }

        self.ctx.track(&path, true, None);
        Tracked::Value(child)
    }

    /// Iterate the real values. The whole node counts as consumed.
    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        if !self.ctx.is_bailed(&self.target) {
            self.ctx.track(&self.path, true, None);
            self.ctx.bail_out(&self.target);
        }
        self.target.iter_values().into_iter()
    }

    /// Own enumerable keys.
    pub fn keys(&self) -> Vec<String> {
        self.ctx.track(&self.path, true, None);
        self.ctx.bail_out(&self.target);
        self.target.keys()
    }

    /// Own property lookup without inherited built-ins.
    pub fn get_own_property(&self, key: &str) -> Option<Value> {
        self.ctx.track(&self.path, true, None);
        self.ctx.bail_out(&self.target);
        self.target.own_property(key)
    }

    /// Membership test including inherited built-ins.
    pub fn has(&self, key: &str) -> bool {
        self.ctx.track(&self.path, true, None);
        self.target.has_own(key) || !matches!(self.target.get(key), Value::Undefined)
    }

    /// The real value, consumed wholesale.
    pub fn to_value(&self) -> Value {
        self.ctx.track(&self.path, true, None);
        self.ctx.bail_out(&self.target);
        self.target.clone()
    }
}

impl fmt::Debug for TrackingProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingProxy")
            .field("store", &store_name(self.ctx.store.as_ref()))
            .field("path", &self.path)
            .field("kind", &self.target.kind())
            .finish()
    }
}

// ----------------------------------------------------------------------
// Methods
// ----------------------------------------------------------------------

struct Recorder {
    ctx: Arc<ProxyContext>,
    path: Vec<String>,
    name: String,
}

/// A function resolved through a proxy, bound to the object it was read from.
///
/// Store actions record a [`TrackedInvocation`] each time they are called.
#[derive(Clone)]
pub struct TrackedMethod {
    this: Value,
    method: Method,
    recorder: Option<Arc<Recorder>>,
}

impl TrackedMethod {
    fn bound(this: Value, method: Method) -> Self {
        Self {
            this,
            method,
            recorder: None,
        }
    }

    /// Whether calls are recorded as invocations.
    pub fn is_store_action(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn call(&self, args: &[Value]) -> Value {
        if let Some(recorder) = &self.recorder {
            let invocation = TrackedInvocation::new(recorder.name.clone(), args);
            recorder.ctx.track(&recorder.path, true, Some(invocation));
        }
        self.method.call(&self.this, args)
    }
}

impl fmt::Debug for TrackedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedMethod")
            .field("method", &self.method)
            .field("store_action", &self.is_store_action())
            .finish()
    }
}

// ----------------------------------------------------------------------
// Tracked
// ----------------------------------------------------------------------

/// Result of a read through the proxy.
#[derive(Clone, Debug)]
pub enum Tracked {
    /// A primitive, or any value read after bailing out.
    Value(Value),
    /// An object-like node that keeps tracking.
    Proxy(TrackingProxy),
    /// A function bound to its parent.
    Method(TrackedMethod),
}

impl Tracked {
    /// Untracked property resolution against a real value.
    fn resolve(target: &Value, key: &str) -> Tracked {
        match target.get(key) {
            Value::Function(method) => Tracked::Method(TrackedMethod::bound(target.clone(), method)),
            other => Tracked::Value(other),
        }
    }

    /// Chain a property read.
    pub fn get(&self, key: &str) -> Tracked {
        match self {
            Tracked::Proxy(proxy) => proxy.get(key),
            Tracked::Value(value) => Tracked::resolve(value, key),
            Tracked::Method(m) => Tracked::resolve(&Value::Function(m.method.clone()), key),
        }
    }

    /// Call a method result. Calling anything else yields `Undefined`.
    pub fn call(&self, args: &[Value]) -> Tracked {
        match self {
            Tracked::Method(m) => Tracked::Value(m.call(args)),
            _ => Tracked::Value(Value::Undefined),
        }
    }

    /// Collapse to a real value. A proxy is consumed wholesale.
    pub fn value(&self) -> Value {
        match self {
            Tracked::Value(value) => value.clone(),
            Tracked::Proxy(proxy) => proxy.to_value(),
            Tracked::Method(m) => Value::Function(m.method.clone()),
        }
    }

    pub fn as_proxy(&self) -> Option<&TrackingProxy> {
        match self {
            Tracked::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Tracked::Proxy(_))
    }
}
