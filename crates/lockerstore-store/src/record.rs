//! Conversions between Rust field values and SQLite values

use crate::errors::{serialization, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;

/// A row as returned by the driver, columns in descriptor order
pub type Record = Vec<Value>;

/// Types that can be bound as a column value
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl IntoValue for DateTime<Utc> {
    fn into_value(self) -> Value {
        Value::Integer(self.timestamp_millis())
    }
}

impl IntoValue for serde_json::Value {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

pub(crate) fn time_from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| serialization(format!("timestamp {} out of range", ms)))
}

/// Render a SQLite value as JSON for `scan`
pub(crate) fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(i),
        Value::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s),
        Value::Blob(b) => serde_json::Value::from(b),
    }
}

/// Sequential reader over one record
pub(crate) struct RecordReader {
    label: &'static str,
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl RecordReader {
    pub(crate) fn new(label: &'static str, record: Record) -> Self {
        Self {
            label,
            values: record.into_iter(),
            index: 0,
        }
    }

    fn next(&mut self) -> Result<Value> {
        self.index += 1;
        self.values.next().ok_or_else(|| {
            serialization(format!(
                "{} record has fewer than {} columns",
                self.label, self.index
            ))
        })
    }

    fn mismatch(&self, want: &str, got: &Value) -> lockerstore_core::StoreError {
        serialization(format!(
            "{} column {}: expected {}, got {:?}",
            self.label,
            self.index - 1,
            want,
            got.data_type()
        ))
    }

    pub(crate) fn int64(&mut self) -> Result<i64> {
        match self.next()? {
            Value::Integer(i) => Ok(i),
            other => Err(self.mismatch("integer", &other)),
        }
    }

    pub(crate) fn int32(&mut self) -> Result<i32> {
        let v = self.int64()?;
        i32::try_from(v).map_err(|_| serialization(format!("{} out of int32 range", v)))
    }

    pub(crate) fn opt_int64(&mut self) -> Result<Option<i64>> {
        match self.next()? {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(i)),
            other => Err(self.mismatch("integer or NULL", &other)),
        }
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        match self.next()? {
            Value::Text(s) => Ok(s),
            other => Err(self.mismatch("text", &other)),
        }
    }

    pub(crate) fn opt_string(&mut self) -> Result<Option<String>> {
        match self.next()? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            other => Err(self.mismatch("text or NULL", &other)),
        }
    }

    pub(crate) fn json(&mut self) -> Result<serde_json::Value> {
        let raw = self.string()?;
        serde_json::from_str(&raw).map_err(|e| {
            serialization(format!("{} body is not valid JSON: {}", self.label, e))
        })
    }

    pub(crate) fn opt_time(&mut self) -> Result<Option<DateTime<Utc>>> {
        self.opt_int64()?.map(time_from_millis).transpose()
    }
}
