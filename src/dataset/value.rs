use std::fmt;

use serde::{Deserialize, Serialize};

/// A single dataset cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for nulls and for text made only of whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Parses text into a number. Nulls stay null, numbers are kept.
    ///
    /// Returns `None` when the text is not a number.
    pub fn to_numeric(&self) -> Option<Value> {
        match self {
            Value::Null => Some(Value::Null),
            Value::Number(n) => Some(Value::Number(*n)),
            Value::Text(s) => s.trim().parse::<f64>().ok().map(Value::Number),
        }
    }

    pub(crate) fn key(&self) -> CellKey {
        match self {
            Value::Null => CellKey::Null,
            Value::Number(n) => CellKey::Number(n.to_bits()),
            Value::Text(s) => CellKey::Text(s.clone()),
        }
    }
}

/// Hashable stand-in for a [`Value`], used for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CellKey {
    Null,
    Number(u64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
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

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
