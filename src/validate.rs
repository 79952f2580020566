//! Value validators attached to property descriptors.
//!
//! A validator rejects values outside a property's declared domain. It only
//! sees the typed value; the element wraps failures with the property name
//! and declaring type into [`ConfigError::ValidationFailed`](crate::ConfigError).

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use toml::Value;

pub trait Validator: Send + Sync + fmt::Debug {
    fn validate(&self, value: &Value) -> Result<(), String>;
}

/// Inclusive integer range.
#[derive(Debug, Clone)]
pub struct IntegerRange {
    pub min: i64,
    pub max: i64,
}

impl Validator for IntegerRange {
    fn validate(&self, value: &Value) -> Result<(), String> {
        let Some(i) = value.as_integer() else {
            return Err(format!("expected an integer, got {}", value.type_str()));
        };
        if i < self.min || i > self.max {
            return Err(format!(
                "{i} is outside the range {}..={}",
                self.min, self.max
            ));
        }
        Ok(())
    }
}

/// String length bounds, in characters.
#[derive(Debug, Clone)]
pub struct StringLength {
    pub min: usize,
    pub max: usize,
}

impl Validator for StringLength {
    fn validate(&self, value: &Value) -> Result<(), String> {
        let Some(s) = value.as_str() else {
            return Err(format!("expected a string, got {}", value.type_str()));
        };
        let len = s.chars().count();
        if len < self.min || len > self.max {
            return Err(format!(
                "length {len} is outside {}..={}",
                self.min, self.max
            ));
        }
        Ok(())
    }
}

/// The whole string must match the pattern.
#[derive(Debug, Clone)]
pub struct RegexValidator {
    regex: Regex,
}

impl RegexValidator {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let anchored = format!("^(?:{pattern})$");
        Ok(Self {
            regex: Regex::new(&anchored)?,
        })
    }
}

impl Validator for RegexValidator {
    fn validate(&self, value: &Value) -> Result<(), String> {
        let Some(s) = value.as_str() else {
            return Err(format!("expected a string, got {}", value.type_str()));
        };
        if self.regex.is_match(s) {
            Ok(())
        } else {
            Err(format!("'{s}' does not match {}", self.regex.as_str()))
        }
    }
}

/// Enumerated domain: the value must equal one of the listed values.
#[derive(Debug, Clone)]
pub struct OneOf(pub Vec<Value>);

impl Validator for OneOf {
    fn validate(&self, value: &Value) -> Result<(), String> {
        if self.0.contains(value) {
            return Ok(());
        }
        let allowed: Vec<String> = self.0.iter().map(crate::value::value_to_text).collect();
        Err(format!(
            "'{}' is not one of [{}]",
            crate::value::value_to_text(value),
            allowed.join(", ")
        ))
    }
}

type Predicate = dyn Fn(&Value) -> Result<(), String> + Send + Sync;

/// Custom predicate.
#[derive(Clone)]
pub struct CallbackValidator(Arc<Predicate>);

impl CallbackValidator {
    pub fn new(f: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for CallbackValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackValidator")
    }
}

impl Validator for CallbackValidator {
    fn validate(&self, value: &Value) -> Result<(), String> {
        (self.0)(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_accepts_bounds() {
        let v = IntegerRange { min: 1, max: 10 };
        assert!(v.validate(&Value::Integer(1)).is_ok());
        assert!(v.validate(&Value::Integer(10)).is_ok());
    }

    #[test]
    fn range_rejects_outside() {
        let v = IntegerRange { min: 1, max: 10 };
        let err = v.validate(&Value::Integer(11)).unwrap_err();
        assert!(err.contains("11"));
    }

    #[test]
    fn range_rejects_wrong_type() {
        let v = IntegerRange { min: 1, max: 10 };
        assert!(v.validate(&Value::String("5".into())).is_err());
    }

    #[test]
    fn string_length_counts_chars() {
        let v = StringLength { min: 1, max: 3 };
        assert!(v.validate(&Value::String("äöü".into())).is_ok());
        assert!(v.validate(&Value::String("".into())).is_err());
    }

    #[test]
    fn regex_is_anchored() {
        let v = RegexValidator::new("[a-z]+").unwrap();
        assert!(v.validate(&Value::String("abc".into())).is_ok());
        assert!(v.validate(&Value::String("abc1".into())).is_err());
    }

    #[test]
    fn one_of_lists_allowed_values() {
        let v = OneOf(vec![Value::String("fast".into()), Value::String("slow".into())]);
        assert!(v.validate(&Value::String("fast".into())).is_ok());
        let err = v.validate(&Value::String("medium".into())).unwrap_err();
        assert!(err.contains("fast, slow"));
    }

    #[test]
    fn callback_runs_predicate() {
        let v = CallbackValidator::new(|val| match val.as_integer() {
            Some(i) if i % 2 == 0 => Ok(()),
            _ => Err("must be even".into()),
        });
        assert!(v.validate(&Value::Integer(4)).is_ok());
        assert_eq!(v.validate(&Value::Integer(3)).unwrap_err(), "must be even");
    }
}
