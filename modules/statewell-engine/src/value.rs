//! Field values: plain JSON data or a reference to another component.

use serde_json::Value;

use crate::reference::Reference;

/// The value held by one component field.
///
/// Equality is what change detection uses: data compares by value,
/// references by `(target id, generation)`.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Data(Value),
    Reference(Reference),
}

impl FieldValue {
    pub fn null() -> Self {
        FieldValue::Data(Value::Null)
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            FieldValue::Data(value) => Some(value),
            FieldValue::Reference(_) => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            FieldValue::Reference(reference) => Some(reference),
            FieldValue::Data(_) => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldValue::Reference(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_data().and_then(Value::as_i64)
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Data(a), FieldValue::Data(b)) => a == b,
            (FieldValue::Reference(a), FieldValue::Reference(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Data(value)
    }
}

impl From<Reference> for FieldValue {
    fn from(reference: Reference) -> Self {
        FieldValue::Reference(reference)
    }
}

/// A missing reference (unregistered target) reads as `null`.
impl From<Option<Reference>> for FieldValue {
    fn from(reference: Option<Reference>) -> Self {
        reference.map_or_else(FieldValue::null, FieldValue::Reference)
    }
}
