//! Schema definition and builder.
//!
//! A schema is an ordered, name-addressable collection of fields plus a
//! name. Field ids are contiguous from 0 and stable for the schema's
//! lifetime. A schema is immutable once published; structural change means
//! publishing a new schema instance, after which old row ids are
//! meaningless downstream.

use super::field::{Field, FieldDescriptor};
use crate::error::{Error, Result};
use crate::rows::FieldId;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::HashMap;

/// A field bound into a schema: dense id + descriptor + accessor.
#[derive(Clone, Debug)]
pub struct SchemaField {
    id: FieldId,
    descriptor: FieldDescriptor,
    field: Field,
}

impl SchemaField {
    pub(crate) fn new(id: FieldId, descriptor: FieldDescriptor, field: Field) -> Self {
        Self {
            id,
            descriptor,
            field,
        }
    }

    /// Returns the dense field id.
    #[inline]
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Returns the field name.
    #[inline]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Returns the descriptor.
    #[inline]
    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    /// Returns the field accessor.
    #[inline]
    pub fn field(&self) -> &Field {
        &self.field
    }
}

/// Shared, immutable schema handle.
pub type SchemaRef = Rc<Schema>;

/// A named, ordered, immutable set of typed fields.
#[derive(Debug)]
pub struct Schema {
    name: String,
    fields: Vec<SchemaField>,
    by_name: HashMap<String, FieldId>,
}

impl Schema {
    /// Returns the schema name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of fields.
    #[inline]
    pub fn size(&self) -> usize {
        self.fields.len()
    }

    /// Returns the fields in id order.
    #[inline]
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Returns the field at a dense id.
    ///
    /// Panics if the id is out of range; field ids come from this schema.
    pub fn field_at(&self, id: FieldId) -> &SchemaField {
        &self.fields[id]
    }

    /// Returns the field with the given name, if present.
    pub fn maybe_field(&self, name: &str) -> Option<&SchemaField> {
        self.by_name.get(name).map(|&id| &self.fields[id])
    }

    /// Returns the field with the given name.
    pub fn field(&self, name: &str) -> Result<&SchemaField> {
        self.maybe_field(name)
            .ok_or_else(|| Error::field_not_found(&self.name, name))
    }

    /// Returns the id of the field with the given name, if present.
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    /// Calls `f` with each field in id order.
    pub fn for_each_field(&self, mut f: impl FnMut(&SchemaField)) {
        for field in &self.fields {
            f(field);
        }
    }
}

/// Builder assembling a schema from (descriptor, accessor) pairs.
pub struct SchemaBuilder {
    name: String,
    fields: Vec<(FieldDescriptor, Field)>,
}

impl SchemaBuilder {
    /// Creates a builder for a schema with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field; ids are assigned densely in append order.
    pub fn add_field(mut self, descriptor: FieldDescriptor, field: Field) -> Self {
        self.fields.push((descriptor, field));
        self
    }

    /// Appends a field (by-reference form for loops).
    pub fn push_field(&mut self, descriptor: FieldDescriptor, field: Field) {
        self.fields.push((descriptor, field));
    }

    /// Returns the number of fields added so far.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no fields were added.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds the schema, rejecting duplicate field names.
    pub fn build(self) -> Result<SchemaRef> {
        let mut by_name = HashMap::with_capacity(self.fields.len());
        let mut fields = Vec::with_capacity(self.fields.len());
        for (id, (descriptor, field)) in self.fields.into_iter().enumerate() {
            if by_name
                .insert(String::from(descriptor.name()), id)
                .is_some()
            {
                return Err(Error::duplicate_field(&self.name, descriptor.name()));
            }
            fields.push(SchemaField::new(id, descriptor, field));
        }
        Ok(Rc::new(Schema {
            name: self.name,
            fields,
            by_name,
        }))
    }
}
