//! Value types for source rows and identifiers.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a record in the source system.
///
/// Single-column keys are integers or strings. Join tables use a composite
/// key, rendered as its parts joined by `:`. Backslashes and `:` inside a
/// part are escaped with a backslash, so distinct keys never render the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Int(i64),
    Text(String),
    Composite(Vec<ExternalId>),
}

impl ExternalId {
    pub fn composite(parts: impl IntoIterator<Item = ExternalId>) -> Self {
        ExternalId::Composite(parts.into_iter().collect())
    }

    /// Build a key from a field value. NULL, floats and timestamps are not keys.
    pub fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int(v) => Some(ExternalId::Int(*v)),
            FieldValue::Text(s) if !s.is_empty() => Some(ExternalId::Text(s.clone())),
            _ => None,
        }
    }

    /// Build a key from the named columns of a row.
    pub fn from_columns(
        fields: &BTreeMap<String, FieldValue>,
        columns: &[String],
    ) -> std::result::Result<Self, String> {
        let mut parts = Vec::with_capacity(columns.len());
        for column in columns {
            let value = fields
                .get(column)
                .ok_or_else(|| format!("key column '{}' is missing", column))?;
            let part = ExternalId::from_field(value)
                .ok_or_else(|| format!("key column '{}' is not an integer or text", column))?;
            parts.push(part);
        }
        match parts.len() {
            0 => Err("no key columns configured".to_string()),
            1 => Ok(parts.remove(0)),
            _ => Ok(ExternalId::Composite(parts)),
        }
    }

    /// The key's components, one per key column.
    pub fn parts(&self) -> Vec<&ExternalId> {
        match self {
            ExternalId::Composite(parts) => parts.iter().collect(),
            other => vec![other],
        }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Int(v) => write!(f, "{}", v),
            ExternalId::Text(s) => f.write_str(s),
            ExternalId::Composite(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    for c in part.to_string().chars() {
                        if c == '\\' || c == ':' {
                            f.write_str("\\")?;
                        }
                        write!(f, "{}", c)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for ExternalId {
    fn from(v: i64) -> Self {
        ExternalId::Int(v)
    }
}

impl From<i32> for ExternalId {
    fn from(v: i32) -> Self {
        ExternalId::Int(v.into())
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        ExternalId::Text(s.to_string())
    }
}

impl From<String> for ExternalId {
    fn from(s: String) -> Self {
        ExternalId::Text(s)
    }
}

/// Identifier assigned by the target system on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalId(pub i64);

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single column value read from the source.
///
/// Strings stay strings when decoded from JSON; accessors such as
/// [`FieldValue::as_timestamp`] parse them on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Legacy schemas store flags as booleans, 0/1 integers, or 't'/'f' text.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            FieldValue::Int(v) => Some(*v != 0),
            FieldValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "1" => Some(true),
                "f" | "false" | "n" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Timestamps arrive as native values, RFC 3339 strings, naive
    /// `YYYY-MM-DD HH:MM:SS` strings (read as UTC) or unix seconds.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            FieldValue::Int(secs) => DateTime::from_timestamp(*secs, 0),
            FieldValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(v) => serde_json::Value::from(*v),
            FieldValue::Float(v) => serde_json::Value::from(*v),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v.into())
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// One row read from the source for a given entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub external_id: ExternalId,
    fields: BTreeMap<String, FieldValue>,
}

impl SourceRow {
    pub fn new(external_id: ExternalId, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            external_id,
            fields,
        }
    }

    /// Build a row whose key is read from `key_columns`.
    pub fn keyed(
        fields: BTreeMap<String, FieldValue>,
        key_columns: &[String],
    ) -> std::result::Result<Self, String> {
        let external_id = ExternalId::from_columns(&fields, key_columns)?;
        Ok(Self::new(external_id, fields))
    }

    /// Add or replace a column. Handy for building rows by hand.
    pub fn with(mut self, column: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(column.to_string(), value.into());
        self
    }

    /// Column value, treating SQL NULL as absent.
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column).filter(|v| !v.is_null())
    }

    /// Non-empty text column.
    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column)
            .and_then(FieldValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(FieldValue::as_i64)
    }

    pub fn flag(&self, column: &str) -> bool {
        self.get(column)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    pub fn timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.get(column).and_then(FieldValue::as_timestamp)
    }

    /// A column holding a reference to another record.
    pub fn reference(&self, column: &str) -> Option<ExternalId> {
        self.get(column).and_then(ExternalId::from_field)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }
}
