//! Tolerant field decoding for the persisted document.
//!
//! Snapshots written by other versions may carry fractional or stringly
//! timestamps and `null` where a value is expected. None of these may make
//! a snapshot unreadable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value as JsonValue;

/// Epoch-millisecond timestamps that accept any JSON number.
///
/// Fractions are truncated. Values that are not a usable number decode as
/// the epoch.
pub(crate) mod millis {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(timestamp.timestamp_millis())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(timestamp_from_value(&value).unwrap_or(DateTime::UNIX_EPOCH))
    }
}

fn timestamp_from_value(value: &JsonValue) -> Option<DateTime<Utc>> {
    let millis = match value {
        JsonValue::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(truncate_millis))?,
        JsonValue::String(text) => text.trim().parse::<f64>().ok().and_then(truncate_millis)?,
        _ => return None,
    };
    DateTime::from_timestamp_millis(millis)
}

fn truncate_millis(millis: f64) -> Option<i64> {
    // `as` saturates; out-of-range values are rejected by chrono afterwards.
    millis.is_finite().then(|| millis.trunc() as i64)
}

/// Decodes `null` as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
