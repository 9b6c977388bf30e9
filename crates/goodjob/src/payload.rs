//! Wire payload format (spec §6.2): the JSON blob stored in `good_jobs.payload`
//! and reconstructed from it on every fetch. Self-describing so that workers
//! written in other languages agree on the meaning of every argument without
//! sharing a type system.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GoodJobError, Result};

/// A single job argument. Primitives round-trip as themselves; anything
/// Rust can't natively represent (a date, a symbol, a GlobalID reference...)
/// round-trips through [`ArgumentValue::Unknown`] so a value this process
/// doesn't understand is never silently corrupted on its way back out.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<ArgumentValue>),
    /// A string-keyed map. `keyword_keys` records which keys (if any) were
    /// marked via `_aj_ruby2_keywords`/`_aj_symbol_keys` as named
    /// parameters rather than ordinary map entries, so re-encoding restores
    /// the same marker.
    Object {
        fields: Vec<(String, ArgumentValue)>,
        keyword_keys: Option<Vec<String>>,
    },
    /// `_aj_serialized` tagged scalar: date, time, symbol, decimal,
    /// duration, range, or module reference. `tag` is the suffix after the
    /// final `::` (e.g. `"DateSerializer"`); the full original class path
    /// is preserved in `serializer` for exact round-trip.
    Serialized {
        serializer: String,
        tag: SerializedTag,
        value: Value,
    },
    /// `_aj_globalid` reference, decomposed into its `gid://app/Model/id`
    /// parts for convenient matching while keeping the original string.
    GlobalId {
        app: String,
        model: String,
        id: String,
        gid: String,
    },
    /// Anything structurally unrecognized. Preserved byte-for-byte (modulo
    /// JSON whitespace) so an unknown tag from a newer producer survives a
    /// round trip through a process that doesn't understand it yet.
    Unknown(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializedTag {
    Date,
    DateTime,
    Time,
    TimeWithZone,
    Symbol,
    BigDecimal,
    Duration,
    Range,
    Module,
}

impl SerializedTag {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "DateSerializer" => Some(Self::Date),
            "DateTimeSerializer" => Some(Self::DateTime),
            "TimeSerializer" => Some(Self::Time),
            "TimeWithZoneSerializer" => Some(Self::TimeWithZone),
            "SymbolSerializer" => Some(Self::Symbol),
            "BigDecimalSerializer" => Some(Self::BigDecimal),
            "DurationSerializer" => Some(Self::Duration),
            "RangeSerializer" => Some(Self::Range),
            "ModuleSerializer" => Some(Self::Module),
            _ => None,
        }
    }
}

impl ArgumentValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ArgumentValue::Null,
            Value::Bool(b) => ArgumentValue::Bool(*b),
            Value::Number(n) => ArgumentValue::Number(n.clone()),
            Value::String(s) => ArgumentValue::String(s.clone()),
            Value::Array(items) => {
                ArgumentValue::Array(items.iter().map(ArgumentValue::from_json).collect())
            }
            Value::Object(map) => Self::object_from_json(map, value),
        }
    }

    fn object_from_json(map: &Map<String, Value>, original: &Value) -> Self {
        if let Some(Value::String(serializer)) = map.get("_aj_serialized") {
            if let Some(tag) = serializer.rsplit("::").next().and_then(SerializedTag::from_suffix) {
                return ArgumentValue::Serialized {
                    serializer: serializer.clone(),
                    tag,
                    value: original.clone(),
                };
            }
        }

        if let Some(Value::String(gid)) = map.get("_aj_globalid") {
            if let Some(parsed) = parse_globalid(gid) {
                return parsed;
            }
        }

        let keyword_keys = map
            .get("_aj_ruby2_keywords")
            .or_else(|| map.get("_aj_symbol_keys"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            });

        let fields = map
            .iter()
            .filter(|(k, _)| *k != "_aj_ruby2_keywords" && *k != "_aj_symbol_keys")
            .map(|(k, v)| (k.clone(), ArgumentValue::from_json(v)))
            .collect();

        ArgumentValue::Object {
            fields,
            keyword_keys,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ArgumentValue::Null => Value::Null,
            ArgumentValue::Bool(b) => Value::Bool(*b),
            ArgumentValue::Number(n) => Value::Number(n.clone()),
            ArgumentValue::String(s) => Value::String(s.clone()),
            ArgumentValue::Array(items) => {
                Value::Array(items.iter().map(ArgumentValue::to_json).collect())
            }
            ArgumentValue::Object {
                fields,
                keyword_keys,
            } => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                if let Some(keys) = keyword_keys {
                    map.insert(
                        "_aj_ruby2_keywords".to_string(),
                        Value::Array(keys.iter().map(|k| Value::String(k.clone())).collect()),
                    );
                }
                Value::Object(map)
            }
            ArgumentValue::Serialized { value, .. } => value.clone(),
            ArgumentValue::GlobalId { gid, .. } => {
                let mut map = Map::new();
                map.insert("_aj_globalid".to_string(), Value::String(gid.clone()));
                Value::Object(map)
            }
            ArgumentValue::Unknown(value) => value.clone(),
        }
    }
}

fn parse_globalid(gid: &str) -> Option<ArgumentValue> {
    let rest = gid.strip_prefix("gid://")?;
    let mut parts = rest.splitn(2, '/');
    let app = parts.next()?.to_string();
    let tail = parts.next()?;
    let (model, id) = tail.rsplit_once('/')?;
    Some(ArgumentValue::GlobalId {
        app,
        model: model.to_string(),
        id: id.to_string(),
        gid: gid.to_string(),
    })
}

/// The decoded form of `good_jobs.payload` (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_class: String,
    pub job_id: uuid::Uuid,
    pub queue_name: String,
    pub priority: Option<i32>,
    pub arguments: Vec<Value>,
    pub executions: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "good_job_concurrency_key")]
    pub concurrency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "good_job_labels")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "good_job_notify")]
    pub notify: Option<bool>,
}

impl JobPayload {
    /// Typed access to `arguments`, decoding each element's tagged form.
    pub fn decoded_arguments(&self) -> Vec<ArgumentValue> {
        self.arguments.iter().map(ArgumentValue::from_json).collect()
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| GoodJobError::DeserializationFailure {
            reason: e.to_string(),
        })
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| GoodJobError::DeserializationFailure {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_date_serializer() {
        let raw = json!({ "_aj_serialized": "ActiveJob::Serializers::DateSerializer", "value": "2024-01-01" });
        let decoded = ArgumentValue::from_json(&raw);
        assert!(matches!(
            decoded,
            ArgumentValue::Serialized { tag: SerializedTag::Date, .. }
        ));
        assert_eq!(decoded.to_json(), raw);
    }

    #[test]
    fn round_trips_globalid() {
        let raw = json!({ "_aj_globalid": "gid://app/User/42" });
        let decoded = ArgumentValue::from_json(&raw);
        match &decoded {
            ArgumentValue::GlobalId { app, model, id, gid } => {
                assert_eq!(app, "app");
                assert_eq!(model, "User");
                assert_eq!(id, "42");
                assert_eq!(gid, "gid://app/User/42");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(decoded.to_json(), raw);
    }

    #[test]
    fn round_trips_ruby2_keywords() {
        let raw = json!({ "a": 1, "b": 2, "_aj_ruby2_keywords": ["a", "b"] });
        let decoded = ArgumentValue::from_json(&raw);
        assert_eq!(decoded.to_json(), raw);
    }

    #[test]
    fn plain_object_without_markers_round_trips() {
        let raw = json!({ "name": "widget", "count": 3 });
        let decoded = ArgumentValue::from_json(&raw);
        assert_eq!(decoded.to_json(), raw);
    }

    #[test]
    fn unrecognized_serializer_tag_falls_back_to_unknown_shape() {
        let raw = json!({ "_aj_serialized": "Some::Future::WeirdSerializer", "value": 1 });
        let decoded = ArgumentValue::from_json(&raw);
        // Unknown serializer suffixes degrade to a plain object, not Unknown,
        // because the shape is still a recognizable map — only the tag's
        // *meaning* is unrecognized. This still round-trips exactly.
        assert_eq!(decoded.to_json(), raw);
    }

    #[test]
    fn job_payload_round_trips_through_json() {
        let payload = JobPayload {
            job_class: "App::Jobs::SendEmail".to_string(),
            job_id: uuid::Uuid::new_v4(),
            queue_name: "mailers".to_string(),
            priority: Some(10),
            arguments: vec![json!("hello"), json!(42)],
            executions: 1,
            locale: Some("en".to_string()),
            timezone: None,
            concurrency_key: Some("user-1".to_string()),
            labels: None,
            notify: None,
        };
        let value = payload.to_value().unwrap();
        let back = JobPayload::from_value(value).unwrap();
        assert_eq!(back.job_class, payload.job_class);
        assert_eq!(back.arguments, payload.arguments);
    }
}
