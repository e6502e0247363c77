//! Type-converting property binding.
//!
//! A [`Property`] names a field of an entity and gives mutable access to it.
//! Its declared type comes from the field's [`Bindable`] implementation. The
//! [`PropertyBinder`] converts an incoming [`Value`] to that type along a
//! fixed coercion matrix and assigns it. Nothing is assigned unless the
//! conversion succeeds.
//!
//! | from \ to        | String | Data | Bool | numeric |
//! |------------------|--------|------|------|---------|
//! | String           | =      | UTF-8| parse| parse   |
//! | Data             | UTF-8  | =    |      |         |
//! | Bool             | format |      | =    |         |
//! | numeric          | format |      |      | convert |
//!
//! `Array`, `Map` and `Vector` only bind to properties of the same type.

use crate::error::AiError;
use crate::types::RecursiveValue;
use crate::value::{Value, ValueType};
use std::collections::BTreeMap;
use std::fmt;

/// A Rust type that can be the declared type of an entity property
pub trait Bindable: Sized + Send + 'static {
    /// Declared type used to pick the conversion
    const VALUE_TYPE: ValueType;

    /// Extract from a value that already has [`Self::VALUE_TYPE`]
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_bindable {
    ($ty:ty, $variant:ident) => {
        impl Bindable for $ty {
            const VALUE_TYPE: ValueType = ValueType::$variant;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_bindable!(String, String);
impl_bindable!(Vec<u8>, Data);
impl_bindable!(bool, Bool);
impl_bindable!(i32, Int32);
impl_bindable!(i64, Int64);
impl_bindable!(f32, Float);
impl_bindable!(f64, Double);
impl_bindable!(Vec<RecursiveValue>, Array);
impl_bindable!(BTreeMap<String, RecursiveValue>, Map);
impl_bindable!(Vec<f32>, Vector);

impl<T: Bindable> Bindable for Option<T> {
    const VALUE_TYPE: ValueType = T::VALUE_TYPE;

    fn from_value(value: Value) -> Option<Self> {
        T::from_value(value).map(Some)
    }
}

/// Named, typed accessor for one property of an entity.
///
/// ```ignore
/// const TITLE: Property<Note, String> = Property::new("title", |note| &mut note.title);
/// ```
pub struct Property<E, T> {
    name: &'static str,
    accessor: fn(&mut E) -> &mut T,
}

impl<E, T: Bindable> Property<E, T> {
    /// Create a property accessor
    pub const fn new(name: &'static str, accessor: fn(&mut E) -> &mut T) -> Self {
        Self { name, accessor }
    }

    /// Property name, used in logs and hook contexts
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared type of the property
    pub fn value_type(&self) -> ValueType {
        T::VALUE_TYPE
    }

    fn slot<'a>(&self, entity: &'a mut E) -> &'a mut T {
        (self.accessor)(entity)
    }
}

impl<E, T> Clone for Property<E, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, T> Copy for Property<E, T> {}

impl<E, T> fmt::Debug for Property<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property").field("name", &self.name).finish()
    }
}

/// Converts values to a property's declared type and assigns them
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyBinder;

impl PropertyBinder {
    /// Create a binder
    pub fn new() -> Self {
        Self
    }

    /// Convert `value` and assign it to `property` on `entity`.
    ///
    /// On error the property keeps its previous value.
    pub fn bind<E, T: Bindable>(
        &self,
        value: Value,
        entity: &mut E,
        property: &Property<E, T>,
    ) -> Result<(), AiError> {
        let typed = self.convert::<T>(value)?;
        tracing::debug!(
            "[Binder] assigning property: name={}, type={}",
            property.name(),
            T::VALUE_TYPE
        );
        *property.slot(entity) = typed;
        Ok(())
    }

    /// Convert a value into a concrete Rust type without assigning it
    pub fn convert<T: Bindable>(&self, value: Value) -> Result<T, AiError> {
        let from = value.value_type();
        let coerced = self.coerce(value, T::VALUE_TYPE)?;
        T::from_value(coerced).ok_or_else(|| {
            AiError::binding(
                from.to_string(),
                T::VALUE_TYPE.to_string(),
                "conversion produced the wrong type",
            )
        })
    }

    /// Convert a value to the target type along the coercion matrix
    pub fn coerce(&self, value: Value, to: ValueType) -> Result<Value, AiError> {
        let from = value.value_type();
        if from == to {
            return Ok(value);
        }

        let fail = |reason: &str| AiError::binding(from.to_string(), to.to_string(), reason);

        match (value, to) {
            (Value::String(s), ValueType::Data) => Ok(Value::Data(s.into_bytes())),
            (Value::Data(d), ValueType::String) => String::from_utf8(d)
                .map(Value::String)
                .map_err(|_| fail("data is not valid UTF-8")),
            (Value::String(s), ValueType::Bool) => parse_bool(&s)
                .map(Value::Bool)
                .ok_or_else(|| fail(&format!("'{}' is not a boolean", s))),
            (Value::Bool(b), ValueType::String) => Ok(Value::String(b.to_string())),
            (Value::String(s), target) if target.is_numeric() => parse_number(s.trim(), target)
                .ok_or_else(|| fail(&format!("'{}' is not a valid number", s))),
            (number, ValueType::String) if from.is_numeric() => {
                Ok(Value::String(format_number(&number)))
            }
            (number, target) if from.is_numeric() && target.is_numeric() => {
                convert_number(&number, target).ok_or_else(|| fail("value is out of range"))
            }
            _ => Err(fail("no conversion between these types")),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number(s: &str, target: ValueType) -> Option<Value> {
    match target {
        ValueType::Int32 => s.parse().ok().map(Value::Int32),
        ValueType::Int64 => s.parse().ok().map(Value::Int64),
        ValueType::Float => s.parse().ok().map(Value::Float),
        ValueType::Double => s.parse().ok().map(Value::Double),
        _ => None,
    }
}

fn format_number(value: &Value) -> String {
    match value {
        Value::Int32(i) => i.to_string(),
        Value::Int64(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(d) => d.to_string(),
        _ => String::new(),
    }
}

fn convert_number(value: &Value, target: ValueType) -> Option<Value> {
    match (value, target) {
        (Value::Int32(i), ValueType::Int64) => Some(Value::Int64(*i as i64)),
        (Value::Int64(i), ValueType::Int32) => i32::try_from(*i).ok().map(Value::Int32),
        (Value::Int32(i), ValueType::Float) => Some(Value::Float(*i as f32)),
        (Value::Int32(i), ValueType::Double) => Some(Value::Double(*i as f64)),
        (Value::Int64(i), ValueType::Float) => Some(Value::Float(*i as f32)),
        (Value::Int64(i), ValueType::Double) => Some(Value::Double(*i as f64)),
        (Value::Float(f), ValueType::Double) => Some(Value::Double(*f as f64)),
        (Value::Double(d), ValueType::Float) => {
            let narrowed = *d as f32;
            (narrowed.is_finite() || !d.is_finite()).then_some(Value::Float(narrowed))
        }
        (Value::Float(f), ValueType::Int32 | ValueType::Int64) => truncate(*f as f64, target),
        (Value::Double(d), ValueType::Int32 | ValueType::Int64) => truncate(*d, target),
        _ => None,
    }
}

// Truncates toward zero; NaN, infinities and out-of-range values have no integer form.
fn truncate(value: f64, target: ValueType) -> Option<Value> {
    if !value.is_finite() {
        return None;
    }
    let truncated = value.trunc();
    match target {
        ValueType::Int32 if truncated >= i32::MIN as f64 && truncated <= i32::MAX as f64 => {
            Some(Value::Int32(truncated as i32))
        }
        ValueType::Int64 if truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 => {
            Some(Value::Int64(truncated as i64))
        }
        _ => None,
    }
}
