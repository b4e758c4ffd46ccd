//! Column value transforms.
//!
//! A transform maps one JSON value to another. Columns use them in two
//! directions: `prepare` on the way into the database and `serialize` on
//! the way back. NULL passes through every built-in transform untouched.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub type Transform = Arc<dyn Fn(JsonValue) -> DbResult<JsonValue> + Send + Sync>;

/// Wrap a closure, e.g. for encryption of a column.
pub fn custom<F>(f: F) -> Transform
where
    F: Fn(JsonValue) -> DbResult<JsonValue> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Coerce `0`/`1`, `"t"`/`"f"`, `"true"`/`"false"` into a JSON boolean.
/// MySQL and SQLite hand booleans back as integers.
pub fn boolean() -> Transform {
    Arc::new(|value| match value {
        JsonValue::Null | JsonValue::Bool(_) => Ok(value),
        JsonValue::Number(ref n) => Ok(JsonValue::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
        JsonValue::String(ref s) => match s.to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" | "y" => Ok(JsonValue::Bool(true)),
            "0" | "f" | "false" | "no" | "n" | "" => Ok(JsonValue::Bool(false)),
            _ => Err(mismatch("boolean", &value)),
        },
        other => Err(mismatch("boolean", &other)),
    })
}

/// Parse integers returned as text (DECIMAL columns, COUNT on some drivers).
pub fn integer() -> Transform {
    Arc::new(|value| match value {
        JsonValue::String(ref s) => s
            .trim()
            .parse::<i64>()
            .map(JsonValue::from)
            .map_err(|_| mismatch("integer", &value)),
        JsonValue::Number(ref n) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| JsonValue::from(f as i64))
            .ok_or_else(|| mismatch("integer", &value)),
        other => Ok(other),
    })
}

/// Render numbers as strings so 64-bit ids survive JavaScript clients.
pub fn bigint_as_string() -> Transform {
    Arc::new(|value| match value {
        JsonValue::Number(n) => Ok(JsonValue::String(n.to_string())),
        other => Ok(other),
    })
}

/// Parse JSON stored as text (MySQL JSON over some drivers, SQLite TEXT).
pub fn json() -> Transform {
    Arc::new(|value| match value {
        JsonValue::String(ref s) => {
            serde_json::from_str(s).map_err(|_| mismatch("json document", &value))
        }
        other => Ok(other),
    })
}

/// Store JSON documents as text.
pub fn json_text() -> Transform {
    Arc::new(|value| match value {
        JsonValue::Null | JsonValue::String(_) => Ok(value),
        other => Ok(JsonValue::String(other.to_string())),
    })
}

/// Normalize timestamps to RFC 3339 in UTC. Accepts RFC 3339 and
/// `YYYY-MM-DD HH:MM:SS[.f]` (read as UTC).
pub fn date_to_rfc3339() -> Transform {
    Arc::new(|value| match value {
        JsonValue::String(ref s) => parse_timestamp(s)
            .map(|t| JsonValue::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            .ok_or_else(|| mismatch("timestamp", &value)),
        other => Ok(other),
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn mismatch(expected: &str, value: &JsonValue) -> DbError {
    DbError::invalid_input(format!("expected {expected}, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boolean() {
        let t = boolean();
        assert_eq!(t(json!(1)).unwrap(), json!(true));
        assert_eq!(t(json!("f")).unwrap(), json!(false));
        assert_eq!(t(JsonValue::Null).unwrap(), JsonValue::Null);
        assert!(t(json!("maybe")).is_err());
    }

    #[test]
    fn test_numeric_transforms() {
        assert_eq!(integer()(json!("42")).unwrap(), json!(42));
        assert!(integer()(json!("4.5")).is_err());
        assert_eq!(
            bigint_as_string()(json!(9007199254740993_i64)).unwrap(),
            json!("9007199254740993")
        );
    }

    #[test]
    fn test_json_round_trip_through_text() {
        let stored = json_text()(json!({"a": [1, 2]})).unwrap();
        assert_eq!(stored, json!(r#"{"a":[1,2]}"#));
        assert_eq!(json()(stored).unwrap(), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_date_to_rfc3339() {
        let t = date_to_rfc3339();
        assert_eq!(
            t(json!("2024-03-01 10:20:30")).unwrap(),
            json!("2024-03-01T10:20:30Z")
        );
        assert_eq!(
            t(json!("2024-03-01T12:20:30+02:00")).unwrap(),
            json!("2024-03-01T10:20:30Z")
        );
    }

    #[test]
    fn test_custom() {
        let reverse = custom(|v| Ok(json!(v.as_str().unwrap_or("").chars().rev().collect::<String>())));
        assert_eq!(reverse(json!("abc")).unwrap(), json!("cba"));
    }
}
