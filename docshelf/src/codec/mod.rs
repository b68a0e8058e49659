//! Per-type encoding between logical [`Value`]s and SQLite storage values.
//!
//! The codec is a pure transform: it never touches the database. Binary
//! payloads (`blob`, `other`, `compressed_string`) pass through the configured
//! [`Compression`]; content-addressed types also yield a [`Digest`] of the
//! bytes actually stored.

mod compression;

pub use compression::Compression;

use crate::document::Value;
use crate::error::{DocShelfError, Result};
use crate::schema::DefinedType;
use chrono::{DateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value as JsonValue;
use sha2::{Digest as _, Sha256};

/// Content hash and byte length of a stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    /// Hex-encoded SHA-256.
    pub hash: String,
    pub len: i64,
}

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Digest {
            hash: hex::encode(Sha256::digest(bytes)),
            len: bytes.len() as i64,
        }
    }
}

/// An encoded field: the column value plus, for content-addressed types, the
/// shadow digest.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub value: SqlValue,
    pub digest: Option<Digest>,
}

impl Encoded {
    fn plain(value: SqlValue) -> Self {
        Encoded {
            value,
            digest: None,
        }
    }

    fn addressed(stored: Vec<u8>) -> Self {
        let digest = Digest::of(&stored);
        Encoded {
            value: SqlValue::Blob(stored),
            digest: Some(digest),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    compression: Compression,
}

impl Codec {
    pub fn new(compression: Compression) -> Self {
        Codec { compression }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn encode(&self, field: &str, ty: DefinedType, value: &Value) -> Result<Encoded> {
        if value.is_null() {
            return Ok(Encoded::plain(SqlValue::Null));
        }
        let mismatch = || DocShelfError::TypeMismatch {
            field: field.to_string(),
            expected: ty,
            found: value.kind().to_string(),
        };

        let encoded = match ty {
            DefinedType::Number => match value {
                Value::Int(i) => Encoded::plain(SqlValue::Integer(*i)),
                Value::Float(f) => Encoded::plain(SqlValue::Real(*f)),
                _ => return Err(mismatch()),
            },
            DefinedType::String => match value {
                Value::Text(s) => Encoded::plain(SqlValue::Text(s.clone())),
                _ => return Err(mismatch()),
            },
            DefinedType::Boolean => match value {
                Value::Bool(b) => Encoded::plain(SqlValue::Integer(i64::from(*b))),
                _ => return Err(mismatch()),
            },
            DefinedType::Datetime => match value {
                Value::DateTime(dt) => Encoded::plain(SqlValue::Real(datetime_to_timestamp(dt))),
                _ => return Err(mismatch()),
            },
            DefinedType::Json => match value {
                Value::Json(v) => Encoded::plain(SqlValue::Text(serde_json::to_string(v)?)),
                _ => return Err(mismatch()),
            },
            DefinedType::CompressedString => match value {
                Value::Text(s) => {
                    Encoded::plain(SqlValue::Blob(self.compression.compress(s.as_bytes())?))
                }
                _ => return Err(mismatch()),
            },
            DefinedType::Blob => match value {
                Value::Bytes(b) => Encoded::addressed(self.compression.compress(b)?),
                _ => return Err(mismatch()),
            },
            DefinedType::Other => match value {
                Value::Object(v) => {
                    let packed = rmp_serde::to_vec(v)
                        .map_err(|e| DocShelfError::Codec(format!("field '{field}': {e}")))?;
                    Encoded::addressed(self.compression.compress(&packed)?)
                }
                _ => return Err(mismatch()),
            },
            DefinedType::NormalizedEmbedding => match value {
                Value::Embedding(v) => Encoded::plain(SqlValue::Blob(embedding_to_bytes(field, v)?)),
                other => {
                    return Err(DocShelfError::InvalidEmbedding(format!(
                        "field '{field}' expects a one-dimensional f32 vector, got {}",
                        other.kind()
                    )))
                }
            },
        };
        Ok(encoded)
    }

    pub fn decode(&self, field: &str, ty: DefinedType, raw: ValueRef<'_>) -> Result<Value> {
        if let ValueRef::Null = raw {
            return Ok(Value::Null);
        }
        let corrupt = || {
            DocShelfError::Codec(format!(
                "field '{field}' ({ty}) holds an unexpected {:?} value",
                raw.data_type()
            ))
        };

        let value = match ty {
            DefinedType::Number => match raw {
                ValueRef::Integer(i) => Value::Int(i),
                ValueRef::Real(f) => Value::Float(f),
                _ => return Err(corrupt()),
            },
            DefinedType::String => match raw {
                ValueRef::Text(t) => Value::Text(utf8(field, t.to_vec())?),
                _ => return Err(corrupt()),
            },
            DefinedType::Boolean => match raw {
                ValueRef::Integer(i) => Value::Bool(i != 0),
                ValueRef::Real(f) => Value::Bool(f != 0.0),
                _ => return Err(corrupt()),
            },
            DefinedType::Datetime => {
                let ts = match raw {
                    ValueRef::Integer(i) => i as f64,
                    ValueRef::Real(f) => f,
                    _ => return Err(corrupt()),
                };
                Value::DateTime(timestamp_to_datetime(ts).ok_or_else(corrupt)?)
            }
            DefinedType::Json => match raw {
                ValueRef::Text(t) => Value::Json(serde_json::from_slice(t)?),
                _ => return Err(corrupt()),
            },
            DefinedType::CompressedString => match raw {
                ValueRef::Blob(b) => Value::Text(utf8(field, self.compression.decompress(b)?)?),
                _ => return Err(corrupt()),
            },
            DefinedType::Blob => match raw {
                ValueRef::Blob(b) => Value::Bytes(self.compression.decompress(b)?),
                _ => return Err(corrupt()),
            },
            DefinedType::Other => match raw {
                ValueRef::Blob(b) => {
                    let packed = self.compression.decompress(b)?;
                    let payload: JsonValue = rmp_serde::from_slice(&packed)
                        .map_err(|e| DocShelfError::Codec(format!("field '{field}': {e}")))?;
                    Value::Object(payload)
                }
                _ => return Err(corrupt()),
            },
            DefinedType::NormalizedEmbedding => match raw {
                ValueRef::Blob(b) => Value::Embedding(bytes_to_embedding(b).ok_or_else(corrupt)?),
                _ => return Err(corrupt()),
            },
        };
        Ok(value)
    }

    /// Encode a JSON literal for `field` in one step.
    pub fn encode_json(&self, field: &str, ty: DefinedType, json: &JsonValue) -> Result<Encoded> {
        self.encode(field, ty, &coerce(field, ty, json)?)
    }
}

/// Convert a JSON literal into the logical value of a field type.
///
/// Datetimes accept RFC 3339 strings or epoch seconds, blobs accept hex strings
/// or arrays of byte values, embeddings accept flat arrays of numbers. JSON
/// `null` is always `Value::Null`.
pub fn coerce(field: &str, ty: DefinedType, json: &JsonValue) -> Result<Value> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || DocShelfError::TypeMismatch {
        field: field.to_string(),
        expected: ty,
        found: json_kind(json).to_string(),
    };

    let value = match ty {
        DefinedType::Number => match json.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(json.as_f64().ok_or_else(mismatch)?),
        },
        DefinedType::String | DefinedType::CompressedString => {
            Value::Text(json.as_str().ok_or_else(mismatch)?.to_string())
        }
        DefinedType::Boolean => Value::Bool(json.as_bool().ok_or_else(mismatch)?),
        DefinedType::Datetime => match json {
            JsonValue::String(s) => Value::DateTime(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|_| mismatch())?
                    .with_timezone(&Utc),
            ),
            JsonValue::Number(n) => {
                let ts = n.as_f64().ok_or_else(mismatch)?;
                Value::DateTime(timestamp_to_datetime(ts).ok_or_else(mismatch)?)
            }
            _ => return Err(mismatch()),
        },
        DefinedType::Json => Value::Json(json.clone()),
        DefinedType::Other => Value::Object(json.clone()),
        DefinedType::Blob => match json {
            JsonValue::String(s) => Value::Bytes(hex::decode(s).map_err(|_| mismatch())?),
            JsonValue::Array(items) => Value::Bytes(
                items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|b| u8::try_from(b).ok())
                            .ok_or_else(mismatch)
                    })
                    .collect::<Result<Vec<u8>>>()?,
            ),
            _ => return Err(mismatch()),
        },
        DefinedType::NormalizedEmbedding => {
            let items = json.as_array().ok_or_else(|| {
                DocShelfError::InvalidEmbedding(format!(
                    "field '{field}' expects an array of numbers, got {}",
                    json_kind(json)
                ))
            })?;
            let vector = items
                .iter()
                .map(|item| {
                    item.as_f64().map(|x| x as f32).ok_or_else(|| {
                        DocShelfError::InvalidEmbedding(format!(
                            "field '{field}' expects a one-dimensional vector of numbers, found {}",
                            json_kind(item)
                        ))
                    })
                })
                .collect::<Result<Vec<f32>>>()?;
            Value::Embedding(vector)
        }
    };
    Ok(value)
}

pub(crate) fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Epoch seconds with microsecond precision.
pub fn datetime_to_timestamp(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1_000_000.0
}

/// Inverse of [`datetime_to_timestamp`], rounding to the nearest microsecond.
pub fn timestamp_to_datetime(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() {
        return None;
    }
    let micros = (ts * 1_000_000.0).round() as i64;
    let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).ok()?;
    DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos)
}

fn embedding_to_bytes(field: &str, vector: &[f32]) -> Result<Vec<u8>> {
    if vector.is_empty() {
        return Err(DocShelfError::InvalidEmbedding(format!(
            "field '{field}' got an empty vector"
        )));
    }
    Ok(vector.iter().flat_map(|x| x.to_le_bytes()).collect())
}

/// Reinterpret little-endian f32 bytes. `None` when the length is not a
/// multiple of four.
pub fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn utf8(field: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| DocShelfError::Codec(format!("field '{field}' is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(codec: &Codec, ty: DefinedType, value: Value) -> Value {
        let encoded = codec.encode("f", ty, &value).unwrap();
        codec.decode("f", ty, ValueRef::from(&encoded.value)).unwrap()
    }

    fn samples() -> Vec<(DefinedType, Value)> {
        vec![
            (DefinedType::Number, Value::Int(42)),
            (DefinedType::Number, Value::Float(2.5)),
            (DefinedType::String, Value::from("hello")),
            (DefinedType::Boolean, Value::Bool(true)),
            (DefinedType::Boolean, Value::Bool(false)),
            (
                DefinedType::Datetime,
                Value::DateTime(DateTime::from_timestamp(1_700_000_000, 123_000_000).unwrap()),
            ),
            (DefinedType::Json, Value::Json(json!({"a": [1, 2, {"b": null}]}))),
            (DefinedType::Json, Value::Json(JsonValue::Null)),
            (DefinedType::CompressedString, Value::from("compress me ".repeat(20))),
            (DefinedType::Blob, Value::Bytes(vec![0, 1, 2, 255])),
            (DefinedType::Other, Value::Object(json!({"k": [1.5, "x", true]}))),
            (DefinedType::NormalizedEmbedding, Value::Embedding(vec![0.25, -1.0, 3.5])),
        ]
    }

    #[test]
    fn test_round_trip_every_type() {
        for compression in [Compression::None, Compression::Lz4, Compression::Zstd] {
            let codec = Codec::new(compression);
            for (ty, value) in samples() {
                assert_eq!(round_trip(&codec, ty, value.clone()), value, "{ty} / {compression}");
            }
        }
    }

    #[test]
    fn test_null_round_trip() {
        let codec = Codec::default();
        for ty in DefinedType::ALL {
            let encoded = codec.encode("f", ty, &Value::Null).unwrap();
            assert_eq!(encoded.value, SqlValue::Null);
            assert!(encoded.digest.is_none());
            assert_eq!(round_trip(&codec, ty, Value::Null), Value::Null);
        }
    }

    #[test]
    fn test_json_null_stored_as_text() {
        let encoded = Codec::default()
            .encode("f", DefinedType::Json, &Value::Json(JsonValue::Null))
            .unwrap();
        assert_eq!(encoded.value, SqlValue::Text("null".into()));
    }

    #[test]
    fn test_boolean_encoded_as_integer() {
        let encoded = Codec::default()
            .encode("f", DefinedType::Boolean, &Value::Bool(true))
            .unwrap();
        assert_eq!(encoded.value, SqlValue::Integer(1));
    }

    #[test]
    fn test_digest_covers_stored_bytes() {
        let codec = Codec::new(Compression::Zstd);
        let encoded = codec
            .encode("f", DefinedType::Blob, &Value::Bytes(b"payload".repeat(10)))
            .unwrap();
        let SqlValue::Blob(stored) = &encoded.value else {
            panic!("expected blob");
        };
        let digest = encoded.digest.unwrap();
        assert_eq!(digest, Digest::of(stored));
        assert_eq!(digest.len, stored.len() as i64);
        assert_eq!(digest.hash.len(), 64);
    }

    #[test]
    fn test_distinct_objects_distinct_digests() {
        let codec = Codec::default();
        let a = codec
            .encode("f", DefinedType::Other, &Value::Object(json!({"n": 1})))
            .unwrap();
        let b = codec
            .encode("f", DefinedType::Other, &Value::Object(json!({"n": 2})))
            .unwrap();
        assert_ne!(a.digest.unwrap().hash, b.digest.unwrap().hash);
    }

    #[test]
    fn test_datetime_truncates_to_micros() {
        let dt = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let decoded = round_trip(&Codec::default(), DefinedType::Datetime, Value::DateTime(dt));
        let expected = DateTime::from_timestamp(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(decoded, Value::DateTime(expected));
    }

    #[test]
    fn test_embedding_rejects_wrong_shapes() {
        let codec = Codec::default();
        let err = codec
            .encode("v", DefinedType::NormalizedEmbedding, &Value::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, DocShelfError::InvalidEmbedding(_)));

        let err = codec
            .encode("v", DefinedType::NormalizedEmbedding, &Value::Embedding(vec![]))
            .unwrap_err();
        assert!(matches!(err, DocShelfError::InvalidEmbedding(_)));

        let err = coerce("v", DefinedType::NormalizedEmbedding, &json!([[1.0, 2.0]])).unwrap_err();
        assert!(matches!(err, DocShelfError::InvalidEmbedding(_)));

        let err = coerce("v", DefinedType::NormalizedEmbedding, &json!("1,2")).unwrap_err();
        assert!(matches!(err, DocShelfError::InvalidEmbedding(_)));
    }

    #[test]
    fn test_embedding_little_endian_layout() {
        let encoded = Codec::default()
            .encode("v", DefinedType::NormalizedEmbedding, &Value::Embedding(vec![1.0]))
            .unwrap();
        assert_eq!(encoded.value, SqlValue::Blob(1.0f32.to_le_bytes().to_vec()));
        assert!(bytes_to_embedding(&[0, 0, 0]).is_none());
    }

    #[test]
    fn test_type_mismatch() {
        let err = Codec::default()
            .encode("age", DefinedType::Number, &Value::from("thirty"))
            .unwrap_err();
        assert!(matches!(
            err,
            DocShelfError::TypeMismatch { ref field, expected: DefinedType::Number, .. } if field == "age"
        ));
    }

    #[test]
    fn test_decode_corrupt_column() {
        let err = Codec::default()
            .decode("f", DefinedType::Blob, ValueRef::Integer(7))
            .unwrap_err();
        assert!(matches!(err, DocShelfError::Codec(_)));
    }

    #[test]
    fn test_coerce_literals() {
        assert_eq!(coerce("n", DefinedType::Number, &json!(30)).unwrap(), Value::Int(30));
        assert_eq!(coerce("n", DefinedType::Number, &json!(2.5)).unwrap(), Value::Float(2.5));
        assert_eq!(
            coerce("b", DefinedType::Blob, &json!("cafe")).unwrap(),
            Value::Bytes(vec![0xca, 0xfe])
        );
        assert_eq!(
            coerce("b", DefinedType::Blob, &json!([1, 2])).unwrap(),
            Value::Bytes(vec![1, 2])
        );
        assert_eq!(
            coerce("d", DefinedType::Datetime, &json!("1970-01-01T00:01:00Z")).unwrap(),
            Value::DateTime(DateTime::from_timestamp(60, 0).unwrap())
        );
        assert_eq!(
            coerce("d", DefinedType::Datetime, &json!(60)).unwrap(),
            Value::DateTime(DateTime::from_timestamp(60, 0).unwrap())
        );
        assert_eq!(coerce("s", DefinedType::String, &JsonValue::Null).unwrap(), Value::Null);
        assert!(coerce("s", DefinedType::String, &json!(1)).is_err());
        assert!(coerce("b", DefinedType::Blob, &json!([256])).is_err());
    }
}
