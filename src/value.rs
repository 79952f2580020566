//! Typed scalar values and their text form.
//!
//! Attribute values in a document are plain text; properties are typed. A
//! [`Converter`] turns one into the other and back, and must round-trip every
//! value the property's validator accepts.

use std::fmt;

use toml::Value;

/// Text ⇄ typed value conversion for a scalar property.
pub trait Converter: Send + Sync + fmt::Debug {
    fn from_text(&self, text: &str) -> Result<Value, String>;
    fn to_text(&self, value: &Value) -> String;
}

/// The scalar types a property can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Boolean => "boolean",
        }
    }

    /// Whether `value` is of this type.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueType::String, Value::String(_))
                | (ValueType::Integer, Value::Integer(_))
                | (ValueType::Float, Value::Float(_))
                | (ValueType::Boolean, Value::Boolean(_))
        )
    }
}

impl Converter for ValueType {
    fn from_text(&self, text: &str) -> Result<Value, String> {
        match self {
            ValueType::String => Ok(Value::String(text.to_string())),
            ValueType::Integer => text
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| format!("'{text}' is not an integer: {e}")),
            ValueType::Float => text
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| format!("'{text}' is not a number: {e}")),
            ValueType::Boolean => {
                let t = text.trim();
                if t.eq_ignore_ascii_case("true") {
                    Ok(Value::Boolean(true))
                } else if t.eq_ignore_ascii_case("false") {
                    Ok(Value::Boolean(false))
                } else {
                    Err(format!("'{text}' is not a boolean"))
                }
            }
        }
    }

    fn to_text(&self, value: &Value) -> String {
        value_to_text(value)
    }
}

/// Render a scalar the way it appears in an attribute.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Datetime(d) => d.to_string(),
        Value::Array(_) | Value::Table(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip() {
        let v = ValueType::Integer.from_text("42").unwrap();
        assert_eq!(v, Value::Integer(42));
        assert_eq!(ValueType::Integer.to_text(&v), "42");
    }

    #[test]
    fn boolean_is_case_insensitive() {
        assert_eq!(
            ValueType::Boolean.from_text("TRUE").unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            ValueType::Boolean.from_text("False").unwrap(),
            Value::Boolean(false)
        );
        assert!(ValueType::Boolean.from_text("yes").is_err());
    }

    #[test]
    fn float_round_trip() {
        let v = ValueType::Float.from_text("1.5").unwrap();
        assert_eq!(ValueType::Float.to_text(&v), "1.5");
    }

    #[test]
    fn string_keeps_whitespace() {
        let v = ValueType::String.from_text("  spaced ").unwrap();
        assert_eq!(v.as_str(), Some("  spaced "));
    }

    #[test]
    fn bad_integer_reports_text() {
        let err = ValueType::Integer.from_text("ten").unwrap_err();
        assert!(err.contains("ten"));
    }

    #[test]
    fn accepts_matches_variant() {
        assert!(ValueType::Integer.accepts(&Value::Integer(1)));
        assert!(!ValueType::Integer.accepts(&Value::String("1".into())));
    }
}
