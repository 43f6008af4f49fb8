//! Field definitions: descriptors, read accessors and writable stores.

use crate::rows::RowId;
use crate::types::FieldType;
use crate::value::Value;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

/// Display/semantic attributes attached to a field descriptor.
///
/// The core never interprets these; they are carried for external renderers
/// and transports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    attrs: Vec<(String, String)>,
}

impl Metadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute, replacing any existing value for the key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.attrs.retain(|(k, _)| *k != key);
        self.attrs.push((key, value.into()));
        self
    }

    /// Returns the value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// Describes one field: name, type and metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: String,
    field_type: FieldType,
    metadata: Metadata,
}

impl FieldDescriptor {
    /// Creates a descriptor with empty metadata.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            metadata: Metadata::new(),
        }
    }

    /// Replaces the metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the field name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field type.
    #[inline]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Returns the metadata.
    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns a copy with a different name, keeping type and metadata.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: self.field_type,
            metadata: self.metadata.clone(),
        }
    }
}

/// The read side of a field: a typed, row-indexed value accessor.
///
/// A field never owns a row's existence, only its value; a source with no
/// backing value for a row yields the type default.
pub trait FieldSource {
    /// Returns the value at the given row.
    fn value_at(&self, row: RowId) -> Value;
}

/// A typed field accessor shared through a schema.
#[derive(Clone)]
pub struct Field {
    field_type: FieldType,
    source: Rc<dyn FieldSource>,
}

impl Field {
    /// Creates a field over a source.
    pub fn new(field_type: FieldType, source: Rc<dyn FieldSource>) -> Self {
        Self { field_type, source }
    }

    /// Returns the field type.
    #[inline]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Returns the value at the given row.
    #[inline]
    pub fn value_at(&self, row: RowId) -> Value {
        self.source.value_at(row)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("field_type", &self.field_type)
            .finish()
    }
}

/// A growable, row-indexed writable column.
///
/// Stores are shared between the operator that writes them and the schema
/// fields that read them; cloning a store aliases the same storage.
#[derive(Clone)]
pub struct FieldStore {
    field_type: FieldType,
    values: Rc<RefCell<Vec<Value>>>,
}

impl FieldStore {
    /// Creates an empty store for the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            values: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Returns the field type.
    #[inline]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Writes a value at a row, growing the store as needed.
    ///
    /// Returns true when the stored value actually changed.
    pub fn set_value_at(&self, row: RowId, value: Value) -> bool {
        let mut values = self.values.borrow_mut();
        if row >= values.len() {
            values.resize(row + 1, Value::Null);
        }
        if values[row] == value {
            false
        } else {
            values[row] = value;
            true
        }
    }

    /// Clears the value at a row so it reads as the type default again.
    pub fn clear_row(&self, row: RowId) {
        let mut values = self.values.borrow_mut();
        if row < values.len() {
            values[row] = Value::Null;
        }
    }

    /// Wraps this store as a read-only field.
    pub fn as_field(&self) -> Field {
        Field::new(self.field_type, Rc::new(self.clone()))
    }
}

impl FieldSource for FieldStore {
    fn value_at(&self, row: RowId) -> Value {
        let values = self.values.borrow();
        match values.get(row) {
            Some(v) if !v.is_null() => v.clone(),
            _ => Value::default_for_type(self.field_type),
        }
    }
}

impl fmt::Debug for FieldStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldStore")
            .field("field_type", &self.field_type)
            .field("len", &self.values.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata() {
        let md = Metadata::new().with("display", "currency").with("display", "plain");
        assert_eq!(md.get("display"), Some("plain"));
        assert_eq!(md.get("missing"), None);
        assert!(Metadata::new().is_empty());
    }

    #[test]
    fn test_descriptor_renamed() {
        let d = FieldDescriptor::new("Value1", FieldType::Int32)
            .with_metadata(Metadata::new().with("unit", "ms"));
        let r = d.renamed("Latency");
        assert_eq!(r.name(), "Latency");
        assert_eq!(r.field_type(), FieldType::Int32);
        assert_eq!(r.metadata().get("unit"), Some("ms"));
    }

    #[test]
    fn test_store_default_for_missing_row() {
        let store = FieldStore::new(FieldType::Int64);
        assert_eq!(store.value_at(5), Value::Int64(0));
        let s = FieldStore::new(FieldType::String);
        assert_eq!(s.value_at(0), Value::from(""));
    }

    #[test]
    fn test_store_set_and_change_detection() {
        let store = FieldStore::new(FieldType::Int32);
        assert!(store.set_value_at(2, Value::Int32(7)));
        assert!(!store.set_value_at(2, Value::Int32(7)));
        assert!(store.set_value_at(2, Value::Int32(8)));
        assert_eq!(store.value_at(2), Value::Int32(8));
        // rows below the written one read as defaults
        assert_eq!(store.value_at(0), Value::Int32(0));
    }

    #[test]
    fn test_store_clear_row() {
        let store = FieldStore::new(FieldType::Bool);
        store.set_value_at(0, Value::Bool(true));
        store.clear_row(0);
        assert_eq!(store.value_at(0), Value::Bool(false));
    }

    #[test]
    fn test_store_aliases_through_field() {
        let store = FieldStore::new(FieldType::Int32);
        let field = store.as_field();
        store.set_value_at(1, Value::Int32(42));
        assert_eq!(field.value_at(1), Value::Int32(42));
    }
}
