// Logical values, records and decoded documents

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Field values of one record, keyed by field name.
pub type Record = BTreeMap<String, Value>;

/// A logical field value, before encoding or after decoding.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    /// Value of a `json` field. `Json(Null)` is a stored JSON null, unlike `Null`.
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    /// Payload of an `other` field.
    Object(serde_json::Value),
    Embedding(Vec<f32>),
}

impl Value {
    /// Wrap any serializable value as an `other` payload.
    pub fn object<T: Serialize>(value: &T) -> crate::Result<Self> {
        Ok(Value::Object(serde_json::to_value(value)?))
    }

    /// Deserialize an `other` payload (or a `json` value) into a typed value.
    pub fn to_object<T: DeserializeOwned>(&self) -> crate::Result<Option<T>> {
        match self {
            Value::Object(v) | Value::Json(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            _ => Ok(None),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
            Value::Bytes(_) => "bytes",
            Value::Object(_) => "object",
            Value::Embedding(_) => "embedding",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as JSON for the dynamic API. Bytes become hex strings and
    /// datetimes RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
            Value::Json(v) | Value::Object(v) => v.clone(),
            Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            Value::Embedding(v) => serde_json::Value::Array(
                v.iter()
                    .map(|x| {
                        serde_json::Number::from_f64(f64::from(*x))
                            .map(serde_json::Value::Number)
                            .unwrap_or(serde_json::Value::Null)
                    })
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            // NUMERIC columns store integral floats as integers
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Embedding(a), Value::Embedding(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Embedding(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A decoded row: external id, write timestamp and field values.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub fields: Record,
    /// Distance to the query vector, set by nearest-neighbour searches.
    pub distance: Option<f64>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Flatten into a JSON object with `id`, `updated_at` and every field.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("id".into(), serde_json::Value::String(self.id.clone()));
        obj.insert(
            "updated_at".into(),
            serde_json::Value::String(self.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.to_json());
        }
        if let Some(distance) = self.distance {
            obj.insert("distance".into(), serde_json::json!(distance));
        }
        serde_json::Value::Object(obj)
    }
}
