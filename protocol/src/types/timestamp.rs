//! Lenient timestamp handling.
//!
//! The server emits ISO-8601 strings, sometimes without an offset (naive values
//! are UTC). Integer values are treated as unix seconds.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a timestamp string as sent by the server
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn from_value<E: Error>(value: Value) -> Result<Option<DateTime<Utc>>, E> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => parse(&s)
            .map(Some)
            .ok_or_else(|| E::custom(format!("invalid timestamp: {}", s))),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Some)
            .ok_or_else(|| E::custom(format!("timestamp out of range: {}", n))),
        other => Err(E::custom(format!("invalid timestamp: {}", other))),
    }
}

pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    from_value(Value::deserialize(deserializer)?)?
        .ok_or_else(|| D::Error::custom("timestamp cannot be null"))
}

/// Same as the parent module, for optional fields
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        from_value(Value::deserialize(deserializer)?)
    }
}
