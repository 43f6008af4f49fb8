//! Table: the mutable source of truth at the head of a dataflow graph.
//!
//! Mutations are staged between `begin_add`/`end_add`,
//! `begin_change`/`end_change` and `remove` calls; nothing is delivered
//! downstream until `fire_changes()`. Row ids are allocated from a
//! free-list that is refilled only once a removal has actually been fired,
//! so an in-flight consumer can never conflate an old row with its
//! recycled id.

use crate::cursor::RowWriter;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::HashMap;
use rowflow_core::schema::{
    FieldDescriptor, FieldSource, FieldStore, Metadata, SchemaBuilder, SchemaRef,
};
use rowflow_core::{BitSet, Error, FieldId, FieldType, Result, RowAllocator, RowId, Value};
use rowflow_dataflow::{OutputHandle, OutputManager, StateChange};

/// A mutable table of rows feeding a dataflow graph.
pub struct Table {
    name: String,
    manager: OutputManager,
    schema: SchemaRef,
    stores: Vec<FieldStore>,
    allocator: RowAllocator,
    active: BitSet,
    key_field: Option<FieldId>,
    key_index: HashMap<Value, RowId>,
    change: StateChange,
    current: Option<RowId>,
    is_change: bool,
}

impl core::fmt::Debug for Table {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Table {
    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the published schema.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns the output to attach downstream inputs to.
    pub fn output(&self) -> OutputHandle {
        self.manager.output()
    }

    /// Returns the dense id of a field by name.
    pub fn field_id(&self, name: &str) -> Result<FieldId> {
        self.schema
            .field_id(name)
            .ok_or_else(|| Error::field_not_found(&self.name, name))
    }

    /// Returns the number of active rows.
    pub fn row_count(&self) -> usize {
        self.active.len()
    }

    /// Returns the row currently holding the given key value, if any.
    pub fn row_for_key(&self, key: &Value) -> Option<RowId> {
        self.key_index.get(key).copied()
    }

    /// Begins adding a row, returning its id. The row becomes visible
    /// downstream only after `end_add` and a subsequent `fire_changes`.
    pub fn begin_add(&mut self) -> Result<RowId> {
        self.assert_no_row_in_progress("begin_add")?;
        let row = self.allocator.allocate();
        self.current = Some(row);
        self.is_change = false;
        Ok(row)
    }

    /// Begins changing an active row.
    pub fn begin_change(&mut self, row: RowId) -> Result<()> {
        self.assert_no_row_in_progress("begin_change")?;
        if !self.active.contains(row) {
            return Err(Error::row_not_found(&self.name));
        }
        self.current = Some(row);
        self.is_change = true;
        Ok(())
    }

    /// Begins changing the row holding the given key value.
    pub fn begin_change_key(&mut self, key: &Value) -> Result<RowId> {
        let row = self
            .row_for_key(key)
            .ok_or_else(|| Error::row_not_found(&self.name))?;
        self.begin_change(row)?;
        Ok(row)
    }

    /// Writes a field of the in-progress row.
    ///
    /// During a change operation the field is recorded into the firing's
    /// changed-field set only when the stored value actually differs.
    pub fn set_value(&mut self, field: FieldId, value: Value) -> Result<()> {
        let row = self.assert_row_in_progress("set_value")?;
        let store = self
            .stores
            .get(field)
            .ok_or_else(|| Error::field_not_found(&self.name, format!("#{}", field)))?;
        if let Some(got) = value.field_type() {
            if got != store.field_type() {
                return Err(Error::type_mismatch(store.field_type(), got));
            }
        }
        if self.is_change && Some(field) == self.key_field {
            self.remap_key(row, &value)?;
        }
        let changed = self.stores[field].set_value_at(row, value);
        if self.is_change && changed {
            self.change.change_field(field);
        }
        Ok(())
    }

    /// Writes a field of the in-progress row by name.
    pub fn set_value_by_name(&mut self, name: &str, value: Value) -> Result<()> {
        let field = self.field_id(name)?;
        self.set_value(field, value)
    }

    /// Returns a cursor positioned over the in-progress row for get/set by
    /// field name.
    pub fn writer(&mut self) -> Result<RowWriter<'_>> {
        self.assert_row_in_progress("writer")?;
        Ok(RowWriter::new(self))
    }

    /// Completes an add. The row joins the active rowspace and is staged
    /// for the next firing. With a key field configured, a duplicate key
    /// cancels the add and returns an error.
    pub fn end_add(&mut self) -> Result<RowId> {
        let row = self.assert_row_in_progress("end_add")?;
        if self.is_change {
            return Err(Error::invalid_operation("end_add during a change operation"));
        }
        if let Some(key_field) = self.key_field {
            let key = self.stores[key_field].value_at(row);
            if self.key_index.contains_key(&key) {
                self.cancel_add(row);
                return Err(Error::duplicate_key(&self.name));
            }
            self.key_index.insert(key, row);
        }
        self.active.insert(row);
        self.change.add_row(row);
        self.current = None;
        Ok(row)
    }

    /// Completes a change, staging the row for the next firing.
    pub fn end_change(&mut self) -> Result<()> {
        let row = self.assert_row_in_progress("end_change")?;
        if !self.is_change {
            return Err(Error::invalid_operation("end_change during an add operation"));
        }
        self.change.change_row(row);
        self.current = None;
        self.is_change = false;
        Ok(())
    }

    /// Stages the removal of an active row. Its id is recycled only after
    /// the removal has been fired.
    pub fn remove(&mut self, row: RowId) -> Result<()> {
        self.assert_no_row_in_progress("remove")?;
        if !self.active.remove(row) {
            return Err(Error::row_not_found(&self.name));
        }
        if let Some(key_field) = self.key_field {
            let key = self.stores[key_field].value_at(row);
            self.key_index.remove(&key);
        }
        self.change.cancel_change(row);
        if self.change.cancel_add(row) {
            // staged but never fired; reclaim the id right away
            self.cancel_add(row);
        } else {
            self.change.remove_row(row);
        }
        Ok(())
    }

    /// Stages the removal of the row holding the given key value.
    pub fn remove_key(&mut self, key: &Value) -> Result<RowId> {
        let row = self
            .row_for_key(key)
            .ok_or_else(|| Error::row_not_found(&self.name))?;
        self.remove(row)?;
        Ok(row)
    }

    /// Delivers all staged changes downstream in the order removes, adds,
    /// changes, then recycles the removed row ids.
    pub fn fire_changes(&mut self) {
        let Table {
            manager,
            stores,
            allocator,
            change,
            ..
        } = self;
        change.fire_and_release(manager, |row| {
            for store in stores.iter() {
                store.clear_row(row);
            }
            allocator.release(row);
        });
    }

    pub(crate) fn schema_ref(&self) -> &SchemaRef {
        &self.schema
    }

    pub(crate) fn current_row(&self) -> Option<RowId> {
        self.current
    }

    pub(crate) fn store(&self, field: FieldId) -> &FieldStore {
        &self.stores[field]
    }

    fn remap_key(&mut self, row: RowId, new_key: &Value) -> Result<()> {
        let key_field = self.key_field.expect("key field");
        let old_key = self.stores[key_field].value_at(row);
        if old_key == *new_key {
            return Ok(());
        }
        if self.key_index.contains_key(new_key) {
            return Err(Error::duplicate_key(&self.name));
        }
        self.key_index.remove(&old_key);
        self.key_index.insert(new_key.clone(), row);
        Ok(())
    }

    fn cancel_add(&mut self, row: RowId) {
        for store in &self.stores {
            store.clear_row(row);
        }
        self.allocator.release(row);
        self.current = None;
    }

    fn assert_no_row_in_progress(&self, operation: &str) -> Result<()> {
        if self.current.is_some() {
            return Err(Error::invalid_operation(format!(
                "{} while another row operation is in progress",
                operation
            )));
        }
        Ok(())
    }

    fn assert_row_in_progress(&self, operation: &str) -> Result<RowId> {
        self.current
            .ok_or_else(|| Error::invalid_operation(format!("{} without a row in progress", operation)))
    }
}

/// Builder for tables.
pub struct TableBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
    key_field: Option<String>,
}

impl core::fmt::Debug for TableBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TableBuilder")
            .field("name", &self.name)
            .field("key_field", &self.key_field)
            .finish_non_exhaustive()
    }
}

impl TableBuilder {
    /// Creates a new table builder.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            fields: Vec::new(),
            key_field: None,
        })
    }

    /// Adds a typed field.
    pub fn add_field(self, name: impl Into<String>, field_type: FieldType) -> Result<Self> {
        self.add_field_with_metadata(name, field_type, Metadata::new())
    }

    /// Adds a typed field carrying metadata attributes.
    pub fn add_field_with_metadata(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        metadata: Metadata,
    ) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        if self.fields.iter().any(|f| f.name() == name) {
            return Err(Error::duplicate_field(&self.name, name));
        }
        self.fields
            .push(FieldDescriptor::new(name, field_type).with_metadata(metadata));
        Ok(self)
    }

    /// Declares one field as the table's key: values must be unique, and
    /// rows become addressable by key.
    pub fn key_field(mut self, name: impl Into<String>) -> Self {
        self.key_field = Some(name.into());
        self
    }

    /// Builds the table and publishes its schema.
    pub fn build(self) -> Result<Table> {
        let stores: Vec<FieldStore> = self
            .fields
            .iter()
            .map(|f| FieldStore::new(f.field_type()))
            .collect();
        let mut sb = SchemaBuilder::new(self.name.clone());
        for (descriptor, store) in self.fields.iter().zip(&stores) {
            sb.push_field(descriptor.clone(), store.as_field());
        }
        let schema = sb.build()?;
        let key_field = match &self.key_field {
            Some(name) => Some(
                schema
                    .field_id(name)
                    .ok_or_else(|| Error::field_not_found(&self.name, name.clone()))?,
            ),
            None => None,
        };
        let manager = OutputManager::new();
        manager.update_schema(Some(schema.clone()));
        Ok(Table {
            name: self.name,
            manager,
            schema,
            stores,
            allocator: RowAllocator::new(),
            active: BitSet::new(),
            key_field,
            key_index: HashMap::new(),
            change: StateChange::new(),
            current: None,
            is_change: false,
        })
    }
}

pub(crate) fn check_naming_rules(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_schema("Name cannot be empty"));
    }
    let first = name.chars().next().expect("non-empty");
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::invalid_schema(format!(
            "Name must start with letter or underscore: {}",
            name
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::invalid_schema(format!(
            "Name contains invalid characters: {}",
            name
        )));
    }
    Ok(())
}
