//! Request decoding for the dispatch loop.
//!
//! A request record is either empty (after trimming whitespace) or a JSON
//! object. Commands are recognised by key presence, so the request keeps the
//! raw object and offers typed lookups for the probes.

use serde_json::{Map, Value};

use super::errors::DispatchError;

/// One decoded request record.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// The record held nothing but whitespace.
    Empty,
    /// A JSON object carrying one or more commands.
    Command(Map<String, Value>),
}

impl Request {
    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::MalformedRequest` when the record is not
    /// valid JSON or not a JSON object.
    pub fn parse(record: &str) -> Result<Self, DispatchError> {
        let trimmed = record.trim();
        if trimmed.is_empty() {
            return Ok(Self::Empty);
        }
        match serde_json::from_str(trimmed).map_err(DispatchError::from_json_error)? {
            Value::Object(fields) => Ok(Self::Command(fields)),
            other => Err(DispatchError::malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Whether the record was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Top-level field lookup.
    pub fn field(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Empty => None,
            Self::Command(fields) => fields.get(key),
        }
    }

    /// Lookup of `outer.inner` when `outer` is an object.
    pub fn nested(&self, outer: &str, inner: &str) -> Option<&Value> {
        self.field(outer)?.as_object()?.get(inner)
    }

    /// Lookup of `outer.inner` when it holds a string.
    pub fn nested_str(&self, outer: &str, inner: &str) -> Option<&str> {
        self.nested(outer, inner)?.as_str()
    }
}

/// Reads a client flag: set only by the number 1 (or `true`).
pub fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64() == Some(1.0),
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
