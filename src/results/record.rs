//! Result records and the payload type they carry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Build the canonical result key for a ticker analysed in a session.
pub fn result_key(ticker: &str, session_id: &str) -> String {
    format!("{}:{}", ticker.trim().to_uppercase(), session_id)
}

/// Analysis payload stored against a key.
///
/// Tagged on the wire so a persisted integer reloads as an integer and an
/// empty map reloads as a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResultValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<ResultValue>),
    Map(BTreeMap<String, ResultValue>),
}

impl ResultValue {
    /// Look up a field of a `Map` payload
    pub fn get(&self, field: &str) -> Option<&ResultValue> {
        match self {
            ResultValue::Map(fields) => fields.get(field),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResultValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ResultValue::Null)
    }

    /// Replace NaN and infinite floats, at any depth, with `Null`.
    ///
    /// JSON has no encoding for them, so they could not be read back from a snapshot.
    pub fn into_finite(self) -> Self {
        match self {
            ResultValue::Float(f) if !f.is_finite() => ResultValue::Null,
            ResultValue::List(items) => {
                ResultValue::List(items.into_iter().map(ResultValue::into_finite).collect())
            }
            ResultValue::Map(fields) => ResultValue::Map(
                fields.into_iter().map(|(k, v)| (k, v.into_finite())).collect(),
            ),
            other => other,
        }
    }
}

impl From<&str> for ResultValue {
    fn from(s: &str) -> Self {
        ResultValue::Text(s.to_string())
    }
}

impl From<String> for ResultValue {
    fn from(s: String) -> Self {
        ResultValue::Text(s)
    }
}

impl From<bool> for ResultValue {
    fn from(b: bool) -> Self {
        ResultValue::Bool(b)
    }
}

impl From<i64> for ResultValue {
    fn from(n: i64) -> Self {
        ResultValue::Integer(n)
    }
}

impl From<i32> for ResultValue {
    fn from(n: i32) -> Self {
        ResultValue::Integer(n.into())
    }
}

impl From<f64> for ResultValue {
    fn from(n: f64) -> Self {
        ResultValue::Float(n).into_finite()
    }
}

impl From<Vec<ResultValue>> for ResultValue {
    fn from(items: Vec<ResultValue>) -> Self {
        ResultValue::List(items)
    }
}

impl From<BTreeMap<String, ResultValue>> for ResultValue {
    fn from(fields: BTreeMap<String, ResultValue>) -> Self {
        ResultValue::Map(fields)
    }
}

impl From<serde_json::Value> for ResultValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => ResultValue::Null,
            Value::Bool(b) => ResultValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ResultValue::Integer(i),
                // u64 beyond i64::MAX and fractional numbers
                None => n.as_f64().map_or(ResultValue::Null, ResultValue::from),
            },
            Value::String(s) => ResultValue::Text(s),
            Value::Array(items) => ResultValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(fields) => {
                ResultValue::Map(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<ResultValue> for serde_json::Value {
    fn from(value: ResultValue) -> Self {
        use serde_json::Value;

        match value {
            ResultValue::Null => Value::Null,
            ResultValue::Bool(b) => Value::Bool(b),
            ResultValue::Integer(i) => Value::from(i),
            ResultValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ResultValue::Text(s) => Value::String(s),
            ResultValue::List(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            ResultValue::Map(fields) => {
                Value::Object(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// A stored analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub key: String,
    pub value: ResultValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResultRecord {
    pub(crate) fn new(key: String, value: ResultValue, now: DateTime<Utc>) -> Self {
        Self {
            key,
            value,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the payload, keeping `created_at` and never moving `updated_at` backwards.
    pub(crate) fn overwrite(&mut self, value: ResultValue, now: DateTime<Utc>) {
        self.value = value;
        self.updated_at = now.max(self.updated_at);
    }
}
