//! Logical field types and values
//!
//! Every schema field has one of four logical types. Values travel through
//! the engines as [`Value`], which also carries an explicit `Null` so that
//! "cleared" is distinguishable from "not supplied".

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
}

impl FieldType {
    /// Get the string representation of the field type
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Real => "real",
            FieldType::Boolean => "boolean",
        }
    }

    /// SQLite column type used to persist this logical type.
    ///
    /// Booleans have no native storage class and are kept as 0/1 integers.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Integer | FieldType::Boolean => "INTEGER",
            FieldType::Real => "REAL",
        }
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "string" | "str" => Ok(FieldType::Text),
            "integer" | "int" | "i64" => Ok(FieldType::Integer),
            "real" | "float" | "double" | "number" | "f64" => Ok(FieldType::Real),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            _ => Err(Error::Schema(format!("Unknown field type: {}", s))),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single field value.
///
/// Serialized as a plain JSON scalar, so a stored entity reads like an
/// ordinary JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Name of the value's variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Check the value against a declared type, widening integers into
    /// real fields. `Null` is accepted for every type.
    pub fn conform(self, field: &str, expected: FieldType) -> Result<Value> {
        match (expected, self) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldType::Text, v @ Value::Text(_)) => Ok(v),
            (FieldType::Integer, v @ Value::Integer(_)) => Ok(v),
            (FieldType::Real, v @ Value::Real(_)) => Ok(v),
            (FieldType::Real, Value::Integer(n)) => Ok(Value::Real(n as f64)),
            (FieldType::Boolean, v @ Value::Boolean(_)) => Ok(v),
            (expected, other) => Err(Error::InvalidValue {
                field: field.to_string(),
                expected,
                found: other.kind(),
            }),
        }
    }

    /// Parse a command-line literal as the given type.
    ///
    /// The literal `null` always yields `Value::Null`.
    pub fn parse_as(field: &str, raw: &str, field_type: FieldType) -> Result<Value> {
        if raw == "null" {
            return Ok(Value::Null);
        }
        let invalid = || Error::InvalidValue {
            field: field.to_string(),
            expected: field_type,
            found: "text",
        };
        match field_type {
            FieldType::Text => Ok(Value::Text(raw.to_string())),
            FieldType::Integer => raw.parse().map(Value::Integer).map_err(|_| invalid()),
            FieldType::Real => raw.parse().map(Value::Real).map_err(|_| invalid()),
            FieldType::Boolean => match raw.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Boolean(true)),
                "false" | "no" | "0" => Ok(Value::Boolean(false)),
                _ => Err(invalid()),
            },
        }
    }

    /// Best-effort parse of an untyped literal, used for schema-less collections.
    pub fn infer(raw: &str) -> Value {
        match raw {
            "null" => Value::Null,
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => {
                if let Ok(n) = raw.parse::<i64>() {
                    Value::Integer(n)
                } else if let Ok(n) = raw.parse::<f64>() {
                    Value::Real(n)
                } else {
                    Value::Text(raw.to_string())
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Real(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Real(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
