//! Time-series backend abstraction.
//!
//! A backend executes a rendered query and hands back untyped rows. Decoding
//! rows into records is left to [`crate::aggregation`] so that every backend
//! gets the same tolerance for missing and oddly typed fields.

use crate::error::BackendError;
use async_trait::async_trait;
use std::collections::HashMap;

/// A single cell value as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Unsigned(u64),
    Boolean(bool),
    Text(String),
    Null,
}

impl FieldValue {
    /// Numeric view of the value. Integers widen to `f64`; anything else has
    /// no numeric reading.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Unsigned(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Float(_) => "double",
            FieldValue::Integer(_) => "long",
            FieldValue::Unsigned(_) => "unsignedLong",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Text(_) => "string",
            FieldValue::Null => "null",
        }
    }
}

/// One result row keyed by column name.
pub type BackendRow = HashMap<String, FieldValue>;

/// Executes queries against a time-series store.
#[async_trait]
pub trait TimeSeriesBackend: Send + Sync {
    /// Runs the query text and returns every result row.
    async fn execute(&self, query: &str) -> Result<Vec<BackendRow>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(FieldValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(FieldValue::Integer(-3).as_f64(), Some(-3.0));
        assert_eq!(FieldValue::Unsigned(7).as_f64(), Some(7.0));
        assert_eq!(FieldValue::Text("1.0".to_string()).as_f64(), None);
        assert_eq!(FieldValue::Boolean(true).as_f64(), None);
        assert_eq!(FieldValue::Null.as_f64(), None);
    }
}
