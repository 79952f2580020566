//! Property descriptors (static schema) and property instances (per-element
//! value plus origin tracking).

use std::fmt;
use std::sync::Arc;

use toml::Value;

use crate::element::Element;
use crate::types::{Provenance, ValueOrigin};
use crate::validate::Validator;
use crate::value::{Converter, ValueType};

/// Constructs a fresh nested element for element-typed properties.
pub type ElementCtor = Arc<dyn Fn() -> Element + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyFlags {
    pub is_key: bool,
    pub is_required: bool,
    pub is_default_collection: bool,
}

#[derive(Clone)]
pub enum PropertyKind {
    Scalar {
        ty: ValueType,
        converter: Option<Arc<dyn Converter>>,
    },
    Element(ElementCtor),
}

impl fmt::Debug for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Scalar { ty, .. } => write!(f, "Scalar({})", ty.name()),
            PropertyKind::Element(_) => f.write_str("Element"),
        }
    }
}

/// Immutable description of one property, shared by every instance of an
/// element kind.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    kind: PropertyKind,
    default: Option<Value>,
    flags: PropertyFlags,
    validator: Option<Arc<dyn Validator>>,
}

impl PropertyDescriptor {
    pub fn scalar(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Scalar {
                ty,
                converter: None,
            },
            default: None,
            flags: PropertyFlags::default(),
            validator: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::scalar(name, ValueType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::scalar(name, ValueType::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::scalar(name, ValueType::Boolean)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::scalar(name, ValueType::Float)
    }

    /// An element-typed property; `ctor` builds the nested element.
    pub fn element(
        name: impl Into<String>,
        ctor: impl Fn() -> Element + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Element(Arc::new(ctor)),
            default: None,
            flags: PropertyFlags::default(),
            validator: None,
        }
    }

    /// The implicit repeat container: its items appear directly as children
    /// of the owning element.
    pub fn default_collection(ctor: impl Fn() -> Element + Send + Sync + 'static) -> Self {
        let mut d = Self::element("", ctor);
        d.flags.is_default_collection = true;
        d
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn key(mut self) -> Self {
        self.flags.is_key = true;
        self.flags.is_required = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.flags.is_required = true;
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_converter(mut self, converter: impl Converter + 'static) -> Self {
        if let PropertyKind::Scalar { converter: c, .. } = &mut self.kind {
            *c = Some(Arc::new(converter));
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, PropertyKind::Element(_))
    }

    pub(crate) fn new_element(&self) -> Option<Element> {
        match &self.kind {
            PropertyKind::Element(ctor) => Some(ctor()),
            PropertyKind::Scalar { .. } => None,
        }
    }

    /// Type check plus the attached validator.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if let PropertyKind::Scalar { ty, .. } = &self.kind
            && !ty.accepts(value)
        {
            return Err(format!(
                "expected {}, got {}",
                ty.name(),
                value.type_str()
            ));
        }
        match &self.validator {
            Some(v) => v.validate(value),
            None => Ok(()),
        }
    }

    pub fn convert_from_text(&self, text: &str) -> Result<Value, String> {
        match &self.kind {
            PropertyKind::Scalar {
                converter: Some(c), ..
            } => c.from_text(text),
            PropertyKind::Scalar { ty, .. } => ty.from_text(text),
            PropertyKind::Element(_) => Err(format!("'{}' is an element", self.name)),
        }
    }

    pub fn convert_to_text(&self, value: &Value) -> String {
        match &self.kind {
            PropertyKind::Scalar {
                converter: Some(c), ..
            } => c.to_text(value),
            PropertyKind::Scalar { ty, .. } => ty.to_text(value),
            PropertyKind::Element(_) => crate::value::value_to_text(value),
        }
    }
}

/// Storage of a property instance.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    /// `None` means "no stored value": the effective value is the default.
    Scalar(Option<Value>),
    Element(Box<Element>),
}

/// One property of one element instance.
#[derive(Debug, Clone)]
pub struct PropertyInstance {
    pub(crate) value: PropertyValue,
    pub(crate) origin: ValueOrigin,
    pub(crate) modified: bool,
    pub(crate) provenance: Option<Provenance>,
}

impl PropertyInstance {
    pub(crate) fn for_descriptor(desc: &PropertyDescriptor) -> Self {
        let value = match desc.new_element() {
            Some(el) => PropertyValue::Element(Box::new(el)),
            None => PropertyValue::Scalar(None),
        };
        Self {
            value,
            origin: ValueOrigin::Default,
            modified: false,
            provenance: None,
        }
    }

    pub fn origin(&self) -> ValueOrigin {
        self.origin
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    /// Effective scalar value: the stored one, or the descriptor default.
    pub(crate) fn effective<'a>(&'a self, desc: &'a PropertyDescriptor) -> Option<&'a Value> {
        match &self.value {
            PropertyValue::Scalar(Some(v)) if self.origin != ValueOrigin::Default => Some(v),
            PropertyValue::Scalar(_) => desc.default_value(),
            PropertyValue::Element(_) => None,
        }
    }

    pub(crate) fn set_scalar(&mut self, value: Value) {
        self.value = PropertyValue::Scalar(Some(value));
        self.origin = ValueOrigin::SetHere;
        self.modified = true;
    }

    pub(crate) fn element(&self) -> Option<&Element> {
        match &self.value {
            PropertyValue::Element(el) => Some(el),
            PropertyValue::Scalar(_) => None,
        }
    }

    pub(crate) fn element_mut(&mut self) -> Option<&mut Element> {
        match &mut self.value {
            PropertyValue::Element(el) => Some(el),
            PropertyValue::Scalar(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::IntegerRange;

    #[test]
    fn key_implies_required() {
        let d = PropertyDescriptor::string("name").key();
        assert!(d.flags().is_key);
        assert!(d.flags().is_required);
    }

    #[test]
    fn validate_checks_type_first() {
        let d = PropertyDescriptor::integer("port").with_validator(IntegerRange { min: 1, max: 9 });
        let err = d.validate(&Value::String("x".into())).unwrap_err();
        assert!(err.contains("expected integer"));
        assert!(d.validate(&Value::Integer(10)).is_err());
        assert!(d.validate(&Value::Integer(5)).is_ok());
    }

    #[test]
    fn default_origin_uses_descriptor_default() {
        let d = PropertyDescriptor::integer("port").with_default(80);
        let inst = PropertyInstance::for_descriptor(&d);
        assert_eq!(inst.origin(), ValueOrigin::Default);
        assert_eq!(inst.effective(&d), Some(&Value::Integer(80)));
    }

    #[test]
    fn set_marks_set_here_and_modified() {
        let d = PropertyDescriptor::integer("port");
        let mut inst = PropertyInstance::for_descriptor(&d);
        inst.set_scalar(Value::Integer(8080));
        assert_eq!(inst.origin(), ValueOrigin::SetHere);
        assert!(inst.is_modified());
        assert_eq!(inst.effective(&d), Some(&Value::Integer(8080)));
    }

    #[test]
    fn custom_converter_overrides_type() {
        #[derive(Debug)]
        struct Seconds;
        impl Converter for Seconds {
            fn from_text(&self, text: &str) -> Result<Value, String> {
                let digits = text.trim_end_matches('s');
                digits
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| e.to_string())
            }
            fn to_text(&self, value: &Value) -> String {
                format!("{}s", value.as_integer().unwrap_or_default())
            }
        }
        let d = PropertyDescriptor::integer("timeout").with_converter(Seconds);
        assert_eq!(d.convert_from_text("30s").unwrap(), Value::Integer(30));
        assert_eq!(d.convert_to_text(&Value::Integer(30)), "30s");
    }
}
