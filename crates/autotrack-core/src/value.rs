//! Dynamic state values.
//!
//! Store state is a tree of [`Value`]s. Containers (`Array`, `Object`, `Map`,
//! `Set`) and functions are reference-counted, so cloning a value is cheap
//! and *identity* is pointer identity: two clones of one object are the same
//! object, while two structurally equal objects built separately are not.
//!
//! Two comparisons are provided:
//! - [`same_value`]: identity for containers, value for primitives
//!   (NaN equals NaN, `+0` differs from `-0`). This is the default change
//!   detector for subscriptions.
//! - `PartialEq`: deep structural equality, mostly useful in tests.
//!
//! Property resolution mirrors a prototype chain: [`Value::get`] checks own
//! properties first, then the built-in methods every value of that kind
//! inherits (`toString`, Array `includes`, Map `get`, ...). The tracking proxy
//! relies on [`Value::has_own`] to tell store actions (own function
//! properties) apart from inherited built-ins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Own properties of an object value, ordered by key.
pub type Object = BTreeMap<String, Value>;

type MethodFn = dyn Fn(&Value, &[Value]) -> Value + Send + Sync;

/// A callable value. Receives the object it was resolved on as `this`.
#[derive(Clone)]
pub struct Method(Arc<MethodFn>);

impl Method {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Value {
        (self.0)(this, args)
    }

    pub fn ptr_eq(&self, other: &Method) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({:#x})", self.identity())
    }
}

/// A dynamically typed state value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(Arc<Vec<Value>>),
    Object(Arc<Object>),
    /// Insertion-ordered entries with unique keys (by [`same_value_zero`]).
    Map(Arc<Vec<(Value, Value)>>),
    /// Insertion-ordered unique values (by [`same_value_zero`]).
    Set(Arc<Vec<Value>>),
    Function(Method),
}

impl Value {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Build an object from `(key, value)` pairs. Later duplicates win.
    pub fn object<I, K>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(Arc::new(
            props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }

    /// Build a map. A repeated key keeps its first position and takes the
    /// last value.
    pub fn map<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let mut out: Vec<(Value, Value)> = Vec::new();
        for (key, value) in entries {
            match out.iter_mut().find(|(k, _)| same_value_zero(k, &key)) {
                Some(slot) => slot.1 = value,
                None => out.push((key, value)),
            }
        }
        Value::Map(Arc::new(out))
    }

    /// Build a set, dropping repeated values.
    pub fn set<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let mut out: Vec<Value> = Vec::new();
        for value in values {
            if !out.iter().any(|v| same_value_zero(v, &value)) {
                out.push(value);
            }
        }
        Value::Set(Arc::new(out))
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Value + Send + Sync + 'static,
    {
        Value::Function(Method::new(f))
    }

    /// Copy of this object with `key` set to `value`. Non-objects are
    /// replaced by a fresh single-key object.
    pub fn with(&self, key: impl Into<String>, value: Value) -> Value {
        let mut props = match self {
            Value::Object(props) => (**props).clone(),
            _ => Object::new(),
        };
        props.insert(key.into(), value);
        Value::Object(Arc::new(props))
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Short lowercase name of the value's kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Function(_) => "function",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// True for non-null containers: arrays, objects, maps, and sets.
    pub fn is_object_like(&self) -> bool {
        matches!(
            self,
            Value::Array(_) | Value::Object(_) | Value::Map(_) | Value::Set(_)
        )
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(props) => Some(props),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Method> {
        match self {
            Value::Function(m) => Some(m),
            _ => None,
        }
    }

    /// Pointer identity of a container or function; `None` for primitives.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(a) => Some(Arc::as_ptr(a) as *const () as usize),
            Value::Object(o) => Some(Arc::as_ptr(o) as *const () as usize),
            Value::Map(m) => Some(Arc::as_ptr(m) as *const () as usize),
            Value::Set(s) => Some(Arc::as_ptr(s) as *const () as usize),
            Value::Function(f) => Some(f.identity()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Property resolution
    // ------------------------------------------------------------------

    /// Resolve `key` on this value: own property, then inherited accessor or
    /// built-in method, else `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        if let Some(own) = self.own_property(key) {
            return own;
        }
        match self {
            Value::Map(entries) if key == "size" => return Value::Number(entries.len() as f64),
            Value::Set(values) if key == "size" => return Value::Number(values.len() as f64),
            _ => {}
        }
        builtin_method(self, key).map_or(Value::Undefined, Value::Function)
    }

    /// The own property stored under `key`, if any.
    pub fn own_property(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(props) => props.get(key).cloned(),
            Value::Array(items) => {
                if key == "length" {
                    return Some(Value::Number(items.len() as f64));
                }
                parse_index(key).and_then(|i| items.get(i).cloned())
            }
            Value::String(s) => {
                if key == "length" {
                    return Some(Value::Number(s.chars().count() as f64));
                }
                parse_index(key)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::from(c.to_string()))
            }
            _ => None,
        }
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.own_property(key).is_some()
    }

    /// Own enumerable keys, in order. Arrays and strings list their indices
    /// followed by `length`.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(props) => props.keys().cloned().collect(),
            Value::Array(items) => indexed_keys(items.len()),
            Value::String(s) => indexed_keys(s.chars().count()),
            _ => Vec::new(),
        }
    }

    /// Values produced by iterating this value: array elements, `[key, value]`
    /// pairs for maps, set members, and property values for objects.
    pub fn iter_values(&self) -> Vec<Value> {
        match self {
            Value::Array(items) => items.to_vec(),
            Value::Set(values) => values.to_vec(),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                .collect(),
            Value::Object(props) => props.values().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

fn indexed_keys(len: usize) -> Vec<String> {
    let mut keys: Vec<String> = (0..len).map(|i| i.to_string()).collect();
    keys.push("length".to_string());
    keys
}

/// Parse a canonical array index (`"0"`, `"12"`, but not `"01"` or `"+1"`).
fn parse_index(key: &str) -> Option<usize> {
    let index: usize = key.parse().ok()?;
    (index.to_string() == key).then_some(index)
}

// ----------------------------------------------------------------------
// Built-in (inherited) methods
// ----------------------------------------------------------------------

fn builtin_method(target: &Value, name: &str) -> Option<Method> {
    let method = match (target, name) {
        (Value::Undefined | Value::Null, _) => return None,
        (_, "toString") => Method::new(|this, _| Value::from(this.to_string())),
        (_, "valueOf") => Method::new(|this, _| this.clone()),
        (Value::Array(_), "includes") => Method::new(|this, args| {
            let needle = args.first().cloned().unwrap_or_default();
            let items = this.as_array().unwrap_or_default();
            Value::Bool(items.iter().any(|v| same_value_zero(v, &needle)))
        }),
        (Value::Array(_), "indexOf") => Method::new(|this, args| {
            let needle = args.first().cloned().unwrap_or_default();
            let items = this.as_array().unwrap_or_default();
            let found = items.iter().position(|v| strict_equals(v, &needle));
            Value::Number(found.map_or(-1.0, |i| i as f64))
        }),
        (Value::Array(_), "join") => Method::new(|this, args| {
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(other) => other.to_string(),
            };
            let items = this.as_array().unwrap_or_default();
            let parts: Vec<String> = items.iter().map(join_part).collect();
            Value::from(parts.join(&separator))
        }),
        (Value::Array(_), "at") => Method::new(|this, args| {
            let items = this.as_array().unwrap_or_default();
            let index = args.first().and_then(Value::as_f64).unwrap_or(0.0).trunc();
            let resolved = if index < 0.0 { items.len() as f64 + index } else { index };
            if resolved < 0.0 {
                return Value::Undefined;
            }
            items.get(resolved as usize).cloned().unwrap_or_default()
        }),
        (Value::Map(_), "get") => Method::new(|this, args| {
            let key = args.first().cloned().unwrap_or_default();
            match this {
                Value::Map(entries) => entries
                    .iter()
                    .find(|(k, _)| same_value_zero(k, &key))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default(),
                _ => Value::Undefined,
            }
        }),
        (Value::Map(_), "has") => Method::new(|this, args| {
            let key = args.first().cloned().unwrap_or_default();
            match this {
                Value::Map(entries) => Value::Bool(entries.iter().any(|(k, _)| same_value_zero(k, &key))),
                _ => Value::Bool(false),
            }
        }),
        (Value::Set(_), "has") => Method::new(|this, args| {
            let needle = args.first().cloned().unwrap_or_default();
            match this {
                Value::Set(values) => Value::Bool(values.iter().any(|v| same_value_zero(v, &needle))),
                _ => Value::Bool(false),
            }
        }),
        (Value::String(_), "toLowerCase") => {
            Method::new(|this, _| Value::from(this.as_str().unwrap_or_default().to_lowercase()))
        }
        (Value::String(_), "toUpperCase") => {
            Method::new(|this, _| Value::from(this.as_str().unwrap_or_default().to_uppercase()))
        }
        (Value::String(_), "trim") => {
            Method::new(|this, _| Value::from(this.as_str().unwrap_or_default().trim()))
        }
        (Value::String(_), "includes") => Method::new(|this, args| {
            let needle = args.first().map(Value::to_string).unwrap_or_else(|| "undefined".into());
            Value::Bool(this.as_str().unwrap_or_default().contains(needle.as_str()))
        }),
        (Value::String(_), "startsWith") => Method::new(|this, args| {
            let needle = args.first().map(Value::to_string).unwrap_or_else(|| "undefined".into());
            Value::Bool(this.as_str().unwrap_or_default().starts_with(needle.as_str()))
        }),
        _ => return None,
    };
    Some(method)
}

fn join_part(value: &Value) -> String {
    if value.is_nullish() { String::new() } else { value.to_string() }
}

// ----------------------------------------------------------------------
// Comparisons
// ----------------------------------------------------------------------

/// `Object.is`: primitives by value, containers and functions by identity.
/// NaN equals NaN; `+0` and `-0` differ.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            (x.is_nan() && y.is_nan()) || (x == y && x.is_sign_negative() == y.is_sign_negative())
        }
        _ => same_value_zero(a, b),
    }
}

/// Like [`same_value`], but `+0` equals `-0`. Used for map keys and set members.
pub fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => (x.is_nan() && y.is_nan()) || x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(_), Value::Array(_))
        | (Value::Object(_), Value::Object(_))
        | (Value::Map(_), Value::Map(_))
        | (Value::Set(_), Value::Set(_))
        | (Value::Function(_), Value::Function(_)) => a.identity() == b.identity(),
        _ => false,
    }
}

/// `===`: like [`same_value_zero`] except NaN never equals itself.
fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => same_value_zero(a, b),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------
// Formatting
// ----------------------------------------------------------------------

/// Render a number the way `String(n)` does for the common cases.
pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// String coercion (`String(value)`).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(join_part).collect();
                f.write_str(&parts.join(","))
            }
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Map(_) => f.write_str("[object Map]"),
            Value::Set(_) => f.write_str("[object Set]"),
            Value::Function(_) => f.write_str("function"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({})", number_to_string(*n)),
            Value::String(s) => write!(f, "String({:?})", &**s),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(props) => f.debug_map().entries(props.iter()).finish(),
            Value::Map(entries) => {
                f.write_str("Map")?;
                f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish()
            }
            Value::Set(values) => {
                f.write_str("Set")?;
                f.debug_set().entries(values.iter()).finish()
            }
            Value::Function(m) => fmt::Debug::fmt(m, f),
        }
    }
}

// ----------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Number(n as f64)
            }
        })*
    };
}

impl_from_int!(i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Method> for Value {
    fn from(m: Method) -> Self {
        Value::Function(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
