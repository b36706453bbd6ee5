//! JSON persistence codec.
//!
//! Persisted payloads are `{"state": …, "version": …}` envelopes. Plain JSON
//! cannot carry `Map` or `Set`, so the optional [`replacer`] / [`reviver`]
//! pair encodes them as tagged objects:
//!
//! ```text
//! Map -> {"__type":"Map","entries":[[key, value], …]}
//! Set -> {"__type":"Set","values":[value, …]}
//! ```
//!
//! Encoding follows `JSON.stringify`: functions and `undefined` vanish from
//! objects and become `null` inside arrays, and non-finite numbers become
//! `null`. Without the replacer a `Map` or `Set` encodes as `{}`.

use serde_json::Value as JsonValue;
use tracing::error;

use crate::error::CodecError;
use crate::value::{Object, Value};

/// Key carrying the container tag.
pub const TYPE_TAG: &str = "__type";
pub const MAP_TAG: &str = "Map";
pub const SET_TAG: &str = "Set";

/// Largest integer an `f64` represents exactly (2^53 - 1).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A decoded `{state, version}` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub state: Value,
    pub version: Option<u32>,
}

/// Tag `Map` and `Set` values; `None` leaves other values to the default encoding.
pub fn replacer(value: &Value) -> Option<JsonValue> {
    match value {
        Value::Map(entries) => {
            let entries: Vec<JsonValue> = entries
                .iter()
                .map(|(k, v)| JsonValue::Array(vec![to_json_or_null(k, true), to_json_or_null(v, true)]))
                .collect();
            Some(tagged(MAP_TAG, "entries", entries))
        }
        Value::Set(values) => {
            let values: Vec<JsonValue> = values.iter().map(|v| to_json_or_null(v, true)).collect();
            Some(tagged(SET_TAG, "values", values))
        }
        _ => None,
    }
}

fn tagged(tag: &str, field: &str, items: Vec<JsonValue>) -> JsonValue {
    let mut obj = serde_json::Map::new();
    obj.insert(TYPE_TAG.to_string(), JsonValue::from(tag));
    obj.insert(field.to_string(), JsonValue::Array(items));
    JsonValue::Object(obj)
}

/// Rebuild a tagged `Map` or `Set`.
///
/// `Ok(None)` means the value is not tagged. A tag whose payload is not the
/// expected shape is an error, never a partially rebuilt container.
pub fn reviver(json: &JsonValue) -> Result<Option<Value>, CodecError> {
    let Some(obj) = json.as_object() else {
        return Ok(None);
    };
    let Some(tag) = obj.get(TYPE_TAG).and_then(JsonValue::as_str) else {
        return Ok(None);
    };
    match tag {
        MAP_TAG => {
            let entries = tagged_items(obj, MAP_TAG, "entries")?;
            let pairs = entries
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    let Some(pair) = entry.as_array() else {
                        return Err(CodecError::Deserialize(format!(
                            "Map entry {i} must be an array, got {}",
                            json_kind(entry)
                        )));
                    };
                    let element = |n: usize| pair.get(n).map_or(Ok(Value::Undefined), |v| from_json(v, true));
                    Ok((element(0)?, element(1)?))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Value::map(pairs)))
        }
        SET_TAG => {
            let values = tagged_items(obj, SET_TAG, "values")?
                .iter()
                .map(|v| from_json(v, true))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Value::set(values)))
        }
        _ => Ok(None),
    }
}

fn tagged_items<'a>(
    obj: &'a serde_json::Map<String, JsonValue>,
    tag: &str,
    field: &str,
) -> Result<&'a Vec<JsonValue>, CodecError> {
    match obj.get(field) {
        Some(JsonValue::Array(items)) => Ok(items),
        other => Err(CodecError::Deserialize(format!(
            "{tag} `{field}` must be an array, got {}",
            other.map_or("nothing", json_kind)
        ))),
    }
}

/// Encode a value. `None` means the value is omitted (`undefined`, functions).
pub fn to_json(value: &Value, use_replacer: bool) -> Option<JsonValue> {
    if use_replacer {
        if let Some(tagged) = replacer(value) {
            return Some(tagged);
        }
    }
    match value {
        Value::Undefined | Value::Function(_) => None,
        Value::Null => Some(JsonValue::Null),
        Value::Bool(b) => Some(JsonValue::Bool(*b)),
        Value::Number(n) => Some(number_to_json(*n)),
        Value::String(s) => Some(JsonValue::from(&**s)),
        Value::Array(items) => Some(JsonValue::Array(
            items.iter().map(|v| to_json_or_null(v, use_replacer)).collect(),
        )),
        Value::Object(props) => Some(JsonValue::Object(
            props
                .iter()
                .filter_map(|(k, v)| to_json(v, use_replacer).map(|json| (k.clone(), json)))
                .collect(),
        )),
        Value::Map(_) | Value::Set(_) => Some(JsonValue::Object(serde_json::Map::new())),
    }
}

fn to_json_or_null(value: &Value, use_replacer: bool) -> JsonValue {
    to_json(value, use_replacer).unwrap_or(JsonValue::Null)
}

fn number_to_json(n: f64) -> JsonValue {
    if !n.is_finite() {
        return JsonValue::Null;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return JsonValue::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
}

/// Decode a JSON value, reviving tagged containers when `use_reviver` is set.
pub fn from_json(json: &JsonValue, use_reviver: bool) -> Result<Value, CodecError> {
    if use_reviver {
        if let Some(revived) = reviver(json)? {
            return Ok(revived);
        }
    }
    Ok(match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::String(s) => Value::from(s.as_str()),
        JsonValue::Array(items) => Value::array(
            items
                .iter()
                .map(|v| from_json(v, use_reviver))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        JsonValue::Object(props) => Value::object(
            props
                .iter()
                .map(|(k, v)| Ok((k.clone(), from_json(v, use_reviver)?)))
                .collect::<Result<Vec<_>, CodecError>>()?,
        ),
    })
}

/// Serialize `state` into a `{state, version}` envelope.
///
/// Failures are logged and returned; a payload that cannot be written must
/// surface to the caller.
pub fn default_serialize_state(state: &Value, version: u32, use_replacer: bool) -> Result<String, CodecError> {
    let mut envelope = serde_json::Map::new();
    if let Some(json) = to_json(state, use_replacer) {
        envelope.insert("state".to_string(), json);
    }
    envelope.insert("version".to_string(), JsonValue::from(version));

    serde_json::to_string(&JsonValue::Object(envelope)).map_err(|err| {
        error!(error = %err, "failed to serialize persisted state");
        CodecError::Serialize(err.to_string())
    })
}

/// Parse a `{state, version}` envelope.
///
/// Malformed JSON, a non-object envelope, or a corrupt `Map`/`Set` tag is
/// logged and returned as [`CodecError::Deserialize`].
pub fn default_deserialize_state(serialized: &str, use_reviver: bool) -> Result<PersistedState, CodecError> {
    let json: JsonValue = serde_json::from_str(serialized).map_err(|err| {
        error!(error = %err, "failed to deserialize persisted state");
        CodecError::Deserialize(err.to_string())
    })?;

    let Some(envelope) = json.as_object() else {
        error!(kind = json_kind(&json), "persisted payload is not an envelope object");
        return Err(CodecError::Deserialize(format!(
            "expected envelope object, got {}",
            json_kind(&json)
        )));
    };

    let state = match envelope.get("state") {
        Some(json) => from_json(json, use_reviver).inspect_err(|err| {
            error!(error = %err, "persisted state is corrupt");
        })?,
        None => Value::Undefined,
    };
    let version = envelope
        .get("version")
        .and_then(JsonValue::as_u64)
        .and_then(|v| u32::try_from(v).ok());

    Ok(PersistedState { state, version })
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Default partializer: drop function-valued top-level properties so store
/// actions are never persisted. Non-object state passes through unchanged.
pub fn omit_store_methods(state: &Value) -> Value {
    match state {
        Value::Object(props) => {
            let kept: Object = props
                .iter()
                .filter(|(_, v)| !v.is_function())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(kept.into())
        }
        other => other.clone(),
    }
}

/// Merge a rehydrated payload into the initial state.
///
/// Objects merge shallowly with persisted keys winning; any other persisted
/// value replaces the initial state, and `undefined` keeps it.
pub fn merge_persisted_state(initial: &Value, persisted: &Value) -> Value {
    match (initial, persisted) {
        (_, Value::Undefined) => initial.clone(),
        (Value::Object(base), Value::Object(overrides)) => {
            let mut merged = (**base).clone();
            for (k, v) in overrides.iter() {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged.into())
        }
        (_, other) => other.clone(),
    }
}
