use std::fmt;

use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::error::{Error, Result};
use crate::record::Record;

/// CSV cell text standing for a null value, as in PostgreSQL `COPY`.
///
/// Keeps null apart from the empty string in exported files.
pub const NULL_CELL: &str = "\\N";

/// A generated field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Object(Record),
    List(Vec<Value>),
}

/// Declared type of a leaf, used to coerce text cells back into values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Lists and unflattened objects, stored as JSON text.
    Json,
}

impl ScalarKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
            ScalarKind::Timestamp => "timestamp",
            ScalarKind::Json => "json",
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) | Value::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) | Value::Timestamp(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Record> {
        match self {
            Value::Object(record) => Some(record),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Object(_) => "object",
            Value::List(_) => "list",
        }
    }

    /// Kind used when this value is written as a CSV leaf.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ScalarKind::Bool),
            Value::Int(_) => Some(ScalarKind::Int),
            Value::Float(_) => Some(ScalarKind::Float),
            Value::String(_) => Some(ScalarKind::String),
            Value::Timestamp(_) => Some(ScalarKind::Timestamp),
            Value::Object(_) | Value::List(_) => Some(ScalarKind::Json),
        }
    }

    /// Plain-text rendering used for keys, templates and CSV cells.
    ///
    /// Null renders as the empty string; structured values render as JSON.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(value) => value.to_string(),
            Value::Int(value) | Value::Timestamp(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::String(value) => value.clone(),
            Value::Object(_) | Value::List(_) => self.to_json().to_string(),
        }
    }

    /// CSV cell text; null renders as [`NULL_CELL`].
    pub fn to_cell(&self) -> String {
        match self {
            Value::Null => NULL_CELL.to_string(),
            other => other.to_text(),
        }
    }

    /// Coerce a text cell to the declared kind.
    ///
    /// [`NULL_CELL`] is null for every kind. An empty cell is the empty
    /// string for string columns and null for the others.
    pub fn from_text(text: &str, kind: ScalarKind, path: &str) -> Result<Value> {
        if text == NULL_CELL {
            return Ok(Value::Null);
        }
        if text.is_empty() {
            return Ok(match kind {
                ScalarKind::String => Value::String(String::new()),
                _ => Value::Null,
            });
        }
        let coercion = || Error::Coercion {
            path: path.to_string(),
            value: text.to_string(),
            expected: kind.as_str(),
        };
        match kind {
            ScalarKind::String => Ok(Value::String(text.to_string())),
            ScalarKind::Int => text.trim().parse().map(Value::Int).map_err(|_| coercion()),
            ScalarKind::Timestamp => text
                .trim()
                .parse()
                .map(Value::Timestamp)
                .map_err(|_| coercion()),
            ScalarKind::Float => text
                .trim()
                .parse()
                .map(Value::Float)
                .map_err(|_| coercion()),
            ScalarKind::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(coercion()),
            },
            ScalarKind::Json => serde_json::from_str::<serde_json::Value>(text)
                .map(|json| Value::from_json(&json))
                .map_err(|_| coercion()),
        }
    }

    /// Re-type a value parsed without its declared kind, such as a leaf
    /// read back from a JSON column.
    pub fn conform(self, kind: ScalarKind, path: &str) -> Result<Value> {
        if kind == ScalarKind::Json || self.is_null() || self.scalar_kind() == Some(kind) {
            return Ok(self);
        }
        match self {
            Value::Object(_) | Value::List(_) => Err(Error::Coercion {
                path: path.to_string(),
                value: self.to_text(),
                expected: kind.as_str(),
            }),
            scalar => Value::from_text(&scalar.to_text(), kind, path),
        }
    }

    /// Best-effort scalar inference for cells without a declared kind.
    pub fn infer_text(text: &str) -> Value {
        if text.is_empty() || text == NULL_CELL {
            return Value::Null;
        }
        match text {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        let leading_zero = text.len() > 1 && text.starts_with('0') && !text.starts_with("0.");
        if !leading_zero {
            if let Ok(value) = text.parse::<i64>() {
                return Value::Int(value);
            }
            if let Ok(value) = text.parse::<f64>()
                && value.is_finite()
            {
                return Value::Float(value);
            }
        }
        Value::String(text.to_string())
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Int(value) | Value::Timestamp(value) => serde_json::Value::from(*value),
            Value::Float(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(value) => serde_json::Value::String(value.clone()),
            Value::Object(record) => record.to_json(),
            Value::List(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(*value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Value::Int(value),
                None => Value::Float(number.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(value) => Value::String(value.clone()),
            serde_json::Value::Array(values) => {
                Value::List(values.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(Record::from_json_map(map)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Object(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Int(value) | Value::Timestamp(value) => serializer.serialize_i64(*value),
            Value::Float(value) => {
                if value.is_finite() {
                    serializer.serialize_f64(*value)
                } else {
                    serializer.serialize_unit()
                }
            }
            Value::String(value) => serializer.serialize_str(value),
            Value::Object(record) => record.serialize(serializer),
            Value::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_coercion_follows_declared_kind() {
        assert_eq!(
            Value::from_text("007", ScalarKind::String, "code").expect("string"),
            Value::String("007".to_string())
        );
        assert_eq!(
            Value::from_text("42", ScalarKind::Int, "n").expect("int"),
            Value::Int(42)
        );
        assert_eq!(
            Value::from_text("1700000000000", ScalarKind::Timestamp, "ts").expect("ts"),
            Value::Timestamp(1_700_000_000_000)
        );
        assert!(Value::from_text("abc", ScalarKind::Int, "n").is_err());
    }

    #[test]
    fn empty_cells_keep_strings_apart_from_null() {
        assert_eq!(Value::String(String::new()).to_cell(), "");
        assert_eq!(Value::Null.to_cell(), NULL_CELL);
        assert_eq!(
            Value::from_text("", ScalarKind::String, "s").expect("empty"),
            Value::String(String::new())
        );
        assert_eq!(
            Value::from_text("", ScalarKind::Float, "f").expect("null"),
            Value::Null
        );
        for kind in [ScalarKind::String, ScalarKind::Int, ScalarKind::Json] {
            assert_eq!(Value::from_text(NULL_CELL, kind, "x").expect("null"), Value::Null);
        }
        assert_eq!(Value::infer_text(NULL_CELL), Value::Null);
    }

    #[test]
    fn conform_restores_declared_kinds() {
        assert_eq!(
            Value::Int(1_700_000_000_000)
                .conform(ScalarKind::Timestamp, "ts")
                .expect("ts"),
            Value::Timestamp(1_700_000_000_000)
        );
        assert_eq!(
            Value::Int(3).conform(ScalarKind::Float, "f").expect("float"),
            Value::Float(3.0)
        );
        assert_eq!(
            Value::from("12").conform(ScalarKind::String, "s").expect("string"),
            Value::from("12")
        );
        assert!(Value::from("x").conform(ScalarKind::Bool, "b").is_err());
    }

    #[test]
    fn float_text_round_trips() {
        for value in [0.1_f64, 3.0, 1234.5678, -2.25e-7] {
            let text = Value::Float(value).to_text();
            let back = Value::from_text(&text, ScalarKind::Float, "f").expect("float");
            assert_eq!(back, Value::Float(value));
        }
    }

    #[test]
    fn inference_keeps_leading_zero_strings() {
        assert_eq!(Value::infer_text("0042"), Value::String("0042".to_string()));
        assert_eq!(Value::infer_text("42"), Value::Int(42));
        assert_eq!(Value::infer_text("0.5"), Value::Float(0.5));
        assert_eq!(Value::infer_text("true"), Value::Bool(true));
    }
}
