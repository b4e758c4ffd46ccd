//! Bind values and rendered statements.
//!
//! [`Value`] is the dialect-neutral parameter type every builder collects.
//! The driver layer binds it to the native query type of each backend.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Text form of `timestamp without time zone` values in decoded rows.
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    /// Timestamp without time zone.
    LocalTimestamp(NaiveDateTime),
    Json(JsonValue),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::LocalTimestamp(_) => "local_timestamp",
            Self::Json(_) => "json",
        }
    }

    /// Convert a decoded JSON value into a bind value.
    ///
    /// Scalars map to their natural variant; arrays and objects stay JSON.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.clone()),
        }
    }

    /// Convert a value read back from a decoded row (or a model serialized
    /// the same way) into a bind value.
    ///
    /// Row decoding turns uuid and timestamp columns into strings. Strings
    /// in exactly those shapes get their typed variant back, so keys and
    /// cursor positions compare against the column's own type on backends
    /// that do not compare them with text implicitly. Everything else is
    /// handled as in [`Value::from_json`].
    pub fn from_decoded(value: &JsonValue) -> Self {
        let JsonValue::String(s) = value else {
            return Self::from_json(value);
        };
        if s.len() == 36 {
            if let Ok(uuid) = Uuid::parse_str(s) {
                return Self::Uuid(uuid);
            }
        }
        if s.len() >= 19 && s.as_bytes().get(10) == Some(&b'T') {
            if s.ends_with('Z') {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    return Self::Timestamp(ts.with_timezone(&Utc));
                }
            } else if let Ok(ts) = NaiveDateTime::parse_from_str(s, NAIVE_TIMESTAMP_FORMAT) {
                return Self::LocalTimestamp(ts);
            }
        }
        Self::Text(s.clone())
    }

    /// Convert this value into JSON (used for cursors and hydration).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => JsonValue::Array(b.iter().map(|x| JsonValue::from(*x)).collect()),
            Self::Uuid(u) => JsonValue::String(u.to_string()),
            Self::Timestamp(t) => JsonValue::String(t.to_rfc3339()),
            Self::LocalTimestamp(t) => JsonValue::String(naive_text(t)),
            Self::Json(v) => v.clone(),
        }
    }

    /// Render the value as text, used where a backend compares against text
    /// (Postgres `->>` extraction yields `text`).
    pub fn into_text(self) -> Self {
        match self {
            Self::Null | Self::Text(_) => self,
            Self::Bool(b) => Self::Text(b.to_string()),
            Self::Int(i) => Self::Text(i.to_string()),
            Self::Float(f) => Self::Text(f.to_string()),
            Self::Uuid(u) => Self::Text(u.to_string()),
            Self::Timestamp(t) => Self::Text(t.to_rfc3339()),
            Self::LocalTimestamp(t) => Self::Text(naive_text(&t)),
            Self::Json(JsonValue::String(s)) => Self::Text(s),
            Self::Json(v) => Self::Text(v.to_string()),
            Self::Bytes(b) => Self::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::LocalTimestamp(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

/// Same text as a decoded `timestamp` column.
pub(crate) fn naive_text(v: &NaiveDateTime) -> String {
    v.format(NAIVE_TIMESTAMP_FORMAT).to_string()
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A statement rendered for one dialect: SQL text plus its bindings in
/// placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl RenderedQuery {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl std::fmt::Display for RenderedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated key reported by MySQL/MariaDB/SQLite drivers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}
