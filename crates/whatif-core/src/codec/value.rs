//! The rich value model carried by both transports.
//!
//! Plain JSON cannot tell a date from a string or a set from an array.
//! [`RichValue`] keeps those distinctions so a payload decoded on the far side
//! of the bridge has the same shape it had before it was sent.

use crate::error::{BridgeError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A structured-clone style value.
#[derive(Debug, Clone, PartialEq)]
pub enum RichValue {
    Undefined,
    Null,
    Bool(bool),
    Number(serde_json::Number),
    BigInt(i128),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<RichValue>),
    Set(Vec<RichValue>),
    Map(Vec<(RichValue, RichValue)>),
    Object(BTreeMap<String, RichValue>),
}

impl RichValue {
    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, RichValue)>,
    {
        RichValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Convert any serializable value. Rich types inside it degrade to their
    /// JSON form; build the value by hand when they must survive.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    /// Deserialize into a typed value via the plain JSON projection.
    ///
    /// Dates project to RFC 3339 strings, which `chrono` reads back, so typed
    /// receivers get their `DateTime` fields intact.
    pub fn deserialize_into<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.into_json()).map_err(|e| BridgeError::Codec {
            message: e.to_string(),
        })
    }

    /// Lossy projection onto plain JSON.
    pub fn into_json(self) -> Value {
        match self {
            RichValue::Undefined | RichValue::Null => Value::Null,
            RichValue::Bool(b) => Value::Bool(b),
            RichValue::Number(n) => Value::Number(n),
            RichValue::BigInt(n) => Value::String(n.to_string()),
            RichValue::String(s) => Value::String(s),
            RichValue::Date(d) => Value::String(format_date(&d)),
            RichValue::Array(items) | RichValue::Set(items) => {
                Value::Array(items.into_iter().map(RichValue::into_json).collect())
            }
            RichValue::Map(entries) => Value::Array(
                entries
                    .into_iter()
                    .map(|(k, v)| Value::Array(vec![k.into_json(), v.into_json()]))
                    .collect(),
            ),
            RichValue::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
        }
    }

    /// Look up an object field.
    pub fn get(&self, key: &str) -> Option<&RichValue> {
        match self {
            RichValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RichValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            RichValue::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RichValue]> {
        match self {
            RichValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, RichValue::Undefined)
    }
}

/// Format a date the way browsers print `Date.prototype.toISOString()`.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a date written by [`format_date`] (any RFC 3339 offset is accepted).
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| BridgeError::Codec {
            message: format!("Invalid date {:?}: {}", raw, e),
        })
}

impl From<Value> for RichValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RichValue::Null,
            Value::Bool(b) => RichValue::Bool(b),
            Value::Number(n) => RichValue::Number(n),
            Value::String(s) => RichValue::String(s),
            Value::Array(items) => RichValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                RichValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<()> for RichValue {
    fn from(_: ()) -> Self {
        RichValue::Undefined
    }
}

impl From<bool> for RichValue {
    fn from(b: bool) -> Self {
        RichValue::Bool(b)
    }
}

impl From<i64> for RichValue {
    fn from(n: i64) -> Self {
        RichValue::Number(n.into())
    }
}

impl From<u64> for RichValue {
    fn from(n: u64) -> Self {
        RichValue::Number(n.into())
    }
}

impl From<u32> for RichValue {
    fn from(n: u32) -> Self {
        RichValue::Number(n.into())
    }
}

impl From<f64> for RichValue {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(RichValue::Number)
            .unwrap_or(RichValue::Null)
    }
}

impl From<String> for RichValue {
    fn from(s: String) -> Self {
        RichValue::String(s)
    }
}

impl From<&str> for RichValue {
    fn from(s: &str) -> Self {
        RichValue::String(s.to_string())
    }
}

impl From<DateTime<Utc>> for RichValue {
    fn from(d: DateTime<Utc>) -> Self {
        RichValue::Date(d)
    }
}

impl<T: Into<RichValue>> From<Option<T>> for RichValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RichValue::Undefined)
    }
}

impl<T: Into<RichValue>> From<Vec<T>> for RichValue {
    fn from(items: Vec<T>) -> Self {
        RichValue::Array(items.into_iter().map(Into::into).collect())
    }
}
