//! The Value type - opaque structured data carried across the boundary.
//!
//! Tool definitions, documents and template keyword arguments are owned by
//! the interpreter's module. The host never interprets them; it only needs to
//! carry them through the codec unchanged.

use std::collections::BTreeMap;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Error as _, Serialize, SerializeMap, SerializeSeq, Serializer};

/// A JSON-shaped value with no schema attached.
///
/// # Design Notes
///
/// - Uses `BTreeMap` for deterministic ordering (stable wire output, comparison)
/// - Integers that fit in `i64` stay integers; everything else numeric is `Float`
/// - Non-finite floats have no JSON form; serializing one is an error
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// JSON `null`.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Key-value map with string keys.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create an empty map.
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Look up a key in a map value.
    ///
    /// Returns `None` for missing keys and for non-map values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

// Conversion from common types

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    // Fallback for numbers outside the f64 range
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Lossy for non-finite floats, which become `null`. Use `serde_json::to_value`
/// to have them rejected instead.
impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(_) => Err(S::Error::custom("non-finite float has no JSON form")),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for item in arr {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_literals::btree;

    #[test]
    fn from_json_numbers() {
        let json = serde_json::json!({
            "integer": 42,
            "float": 2.75,
            "negative": -100
        });

        let value = Value::from(json);
        assert_eq!(value.get("integer").and_then(Value::as_i64), Some(42));
        assert_eq!(value.get("negative").and_then(Value::as_i64), Some(-100));
        assert_eq!(value.get("float").and_then(Value::as_i64), None);
        match value.get("float") {
            Some(Value::Float(f)) => assert!((f - 2.75).abs() < 0.001),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn large_unsigned_becomes_float() {
        let value = Value::from(serde_json::json!(u64::MAX));
        assert!(matches!(value, Value::Float(_)));
    }

    #[test]
    fn non_finite_float_does_not_serialize() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let nested = Value::Map(btree! {
                "temperature".to_string() => Value::Float(f),
            });
            let err = serde_json::to_string(&nested).unwrap_err();
            assert!(err.to_string().contains("non-finite float"));
        }
    }

    #[test]
    fn json_conversion_nulls_non_finite() {
        assert_eq!(
            serde_json::Value::from(Value::Float(f64::INFINITY)),
            serde_json::Value::Null
        );
    }

    #[test]
    fn serialize_matches_json_conversion() {
        let value = Value::Map(btree! {
            "type".to_string() => Value::from("function"),
            "function".to_string() => Value::Map(btree! {
                "name".to_string() => Value::from("get_weather"),
                "parameters".to_string() => Value::from(vec![1i64, 2, 3]),
                "strict".to_string() => Value::Bool(true),
            }),
        });

        let direct = serde_json::to_value(&value).unwrap();
        let converted = serde_json::Value::from(value.clone());
        assert_eq!(direct, converted);
    }

    #[test]
    fn deserialize_nested() {
        let value: Value =
            serde_json::from_str(r#"{"a": [1, "two", null, {"b": false}], "c": 1.5}"#).unwrap();

        let a = value.get("a").unwrap();
        assert!(a.is_array());
        match a {
            Value::Array(items) => {
                assert_eq!(items[0], Value::Integer(1));
                assert_eq!(items[1].as_str(), Some("two"));
                assert!(items[2].is_null());
                assert_eq!(items[3].get("b").and_then(Value::as_bool), Some(false));
            }
            _ => unreachable!(),
        }
        assert_eq!(value.get("c"), Some(&Value::Float(1.5)));
    }

    #[test]
    fn get_on_non_map_is_none() {
        assert_eq!(Value::from("x").get("x"), None);
        assert_eq!(Value::array().get("0"), None);
        assert!(Value::map().is_map());
    }
}
