//! Row cursors: name-addressed access to field values.
//!
//! `RowWriter` wraps a table's in-progress row for get/set by field name.
//! `RowReader` reads any row of any schema by field name, for consumers
//! that sit at the edge of a graph and do not care about dense field ids.

use crate::table::Table;
use rowflow_core::{Result, RowId, Value};
use rowflow_core::schema::{FieldSource, SchemaRef};

/// Cursor over the row currently staged in a table.
pub struct RowWriter<'a> {
    table: &'a mut Table,
    row: RowId,
}

impl<'a> RowWriter<'a> {
    pub(crate) fn new(table: &'a mut Table) -> Self {
        let row = table.current_row().expect("row in progress");
        Self { table, row }
    }

    /// Returns the id of the staged row.
    pub fn row(&self) -> RowId {
        self.row
    }

    /// Writes a field of the staged row by name.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        self.table.set_value_by_name(name, value.into())?;
        Ok(self)
    }

    /// Reads a field of the staged row by name.
    pub fn get(&self, name: &str) -> Result<Value> {
        let field = self.table.field_id(name)?;
        Ok(self.table.store(field).value_at(self.row))
    }
}

/// Reads rows of a published schema by field name.
#[derive(Clone)]
pub struct RowReader {
    schema: SchemaRef,
}

impl RowReader {
    /// Creates a reader over a schema.
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    /// Returns the schema being read.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Reads a field value by name.
    pub fn get(&self, row: RowId, name: &str) -> Result<Value> {
        Ok(self.schema.field(name)?.field().value_at(row))
    }

    /// Reads a field value by dense id.
    pub fn get_at(&self, row: RowId, field: usize) -> Value {
        self.schema.field_at(field).field().value_at(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableBuilder;
    use rowflow_core::FieldType;

    #[test]
    fn test_writer_set_get() {
        let mut table = TableBuilder::new("t")
            .unwrap()
            .add_field("a", FieldType::Int32)
            .unwrap()
            .add_field("b", FieldType::String)
            .unwrap()
            .build()
            .unwrap();
        table.begin_add().unwrap();
        {
            let mut writer = table.writer().unwrap();
            writer.set("a", 5).unwrap().set("b", "hello").unwrap();
            assert_eq!(writer.get("a").unwrap(), Value::Int32(5));
            assert!(writer.get("missing").is_err());
        }
        let row = table.end_add().unwrap();

        let reader = RowReader::new(table.schema().clone());
        assert_eq!(reader.get(row, "b").unwrap(), Value::from("hello"));
        assert_eq!(reader.get_at(row, 0), Value::Int32(5));
    }
}
