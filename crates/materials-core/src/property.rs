//! Property schema utility shared by batch and producer properties.
//!
//! A [`PropertyDefinition`] declares the value type, an optional default and
//! whether values may be reassigned after they are first set. Values are
//! carried as a tagged [`PropertyValue`] and checked against the definition
//! with [`PropertyDefinition::is_compatible`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Boolean,
    Integer,
    Double,
    Text,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::Boolean => "boolean",
            PropertyType::Integer => "integer",
            PropertyType::Double => "double",
            PropertyType::Text => "text",
        };
        f.write_str(name)
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Boolean(_) => PropertyType::Boolean,
            PropertyValue::Integer(_) => PropertyType::Integer,
            PropertyValue::Double(_) => PropertyType::Double,
            PropertyValue::Text(_) => PropertyType::Text,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Boolean(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

/// Errors raised while building a [`PropertyDefinition`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    #[error("default value of type {actual} does not match declared type {declared}")]
    IncompatibleDefault {
        declared: PropertyType,
        actual: PropertyType,
    },
    #[error("default value {0} is not a finite double")]
    NonFiniteDefault(f64),
}

/// Schema for a single property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    property_type: PropertyType,
    default: Option<PropertyValue>,
    mutable: bool,
}

impl PropertyDefinition {
    /// Start building a definition for the given value type. Properties are
    /// mutable and have no default unless configured otherwise.
    pub fn builder(property_type: PropertyType) -> PropertyDefinitionBuilder {
        PropertyDefinitionBuilder {
            property_type,
            default: None,
            mutable: true,
        }
    }

    pub fn property_type(&self) -> PropertyType {
        self.property_type
    }

    pub fn default_value(&self) -> Option<&PropertyValue> {
        self.default.as_ref()
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Whether `value` may be stored under this definition. Doubles must be
    /// finite so that stored values always compare equal to themselves.
    pub fn is_compatible(&self, value: &PropertyValue) -> bool {
        match value {
            PropertyValue::Double(v) if !v.is_finite() => false,
            _ => value.property_type() == self.property_type,
        }
    }
}

/// Builder for [`PropertyDefinition`].
#[derive(Debug, Clone)]
pub struct PropertyDefinitionBuilder {
    property_type: PropertyType,
    default: Option<PropertyValue>,
    mutable: bool,
}

impl PropertyDefinitionBuilder {
    pub fn default_value(mut self, value: impl Into<PropertyValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn build(self) -> Result<PropertyDefinition, PropertyError> {
        if let Some(default) = &self.default
            && default.property_type() != self.property_type
        {
            return Err(PropertyError::IncompatibleDefault {
                declared: self.property_type,
                actual: default.property_type(),
            });
        }
        if let Some(PropertyValue::Double(v)) = &self.default
            && !v.is_finite()
        {
            return Err(PropertyError::NonFiniteDefault(*v));
        }
        Ok(PropertyDefinition {
            property_type: self.property_type,
            default: self.default,
            mutable: self.mutable,
        })
    }
}
