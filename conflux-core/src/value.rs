//! Dynamically typed values flowing from content into entity properties.

use crate::types::{Content, RecursiveValue};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a value or of an entity property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Data,
    Bool,
    Int32,
    Int64,
    Float,
    Double,
    Array,
    Map,
    Vector,
}

impl ValueType {
    /// Whether this is one of the numeric types
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Int32 | ValueType::Int64 | ValueType::Float | ValueType::Double
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "String",
            ValueType::Data => "Data",
            ValueType::Bool => "Bool",
            ValueType::Int32 => "Int32",
            ValueType::Int64 => "Int64",
            ValueType::Float => "Float",
            ValueType::Double => "Double",
            ValueType::Array => "Array",
            ValueType::Map => "Map",
            ValueType::Vector => "Vector",
        };
        f.write_str(name)
    }
}

/// A value on its way into an entity property
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Data(Vec<u8>),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Array(Vec<RecursiveValue>),
    Map(BTreeMap<String, RecursiveValue>),
    Vector(Vec<f32>),
}

impl Value {
    /// Get the declared type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Data(_) => ValueType::Data,
            Value::Bool(_) => ValueType::Bool,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::Array(_) => ValueType::Array,
            Value::Map(_) => ValueType::Map,
            Value::Vector(_) => ValueType::Vector,
        }
    }

    /// Numeric view of the value, if it is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(i) => Some(*i as f64),
            Value::Int64(i) => Some(*i as f64),
            Value::Float(f) => Some(*f as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Number of elements for strings (characters), buffers and ordered collections
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Data(d) => Some(d.len()),
            Value::Array(a) => Some(a.len()),
            Value::Vector(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Borrow the inner string, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Content {
    /// Convert into a value ready for validation and binding.
    ///
    /// Audio and image payloads become raw `Data`; their format is dropped.
    pub fn into_value(self) -> Value {
        self.into()
    }
}

impl From<Content> for Value {
    fn from(content: Content) -> Self {
        match content {
            Content::Text(text) => Value::String(text),
            Content::Data(data) => Value::Data(data),
            Content::Audio { data, .. } | Content::Image { data, .. } => Value::Data(data),
            Content::Structured(map) => Value::Map(map),
            Content::Embedding { vector, .. } => Value::Vector(vector),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(d: Vec<u8>) -> Self {
        Value::Data(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<Vec<RecursiveValue>> for Value {
    fn from(a: Vec<RecursiveValue>) -> Self {
        Value::Array(a)
    }
}
