//! Union: multiplexes many named inputs into one output.
//!
//! The outbound rowspace is the disjoint union of the inputs' rowspaces.
//! A compact (input, inbound-row) to outbound-row mapping backs both the
//! row translation and the optional synthetic input-index/input-name
//! fields, with reverse lookup and no extra storage.
//!
//! The first input to publish a schema establishes the union's outbound
//! field set; later inputs are mapped into it by field name, and fields an
//! input lacks simply read as type defaults for its rows. Inputs attach
//! and detach independently; a departing input retracts its rows as one
//! remove batch while the outbound schema stays up for the rest.

use crate::table::check_naming_rules;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::mem;
use rowflow_core::schema::{
    Field, FieldDescriptor, FieldSource, SchemaBuilder, SchemaRef,
};
use rowflow_core::{
    Error, FieldBitSet, FieldId, FieldType, OneToMany, Result, RowId, Value,
};
use rowflow_dataflow::{input_handle, FlowInput, OutputHandle, OutputManager, StateChange};

struct InputSlot {
    name: String,
    schema: Option<SchemaRef>,
    map: FieldMappingSlot,
}

/// Per-input field translation, built when the input publishes a schema.
struct FieldMappingSlot {
    to_out: rowflow_core::schema::FieldMapping,
    fields_by_out: Vec<Option<Field>>,
}

impl FieldMappingSlot {
    fn empty() -> Self {
        Self {
            to_out: rowflow_core::schema::FieldMapping::default(),
            fields_by_out: Vec::new(),
        }
    }
}

struct UnionState {
    name: String,
    manager: OutputManager,
    mapping: OneToMany, // left = input index, right = inbound row, entry = outbound row
    inputs: Vec<InputSlot>,
    established: Vec<FieldDescriptor>,
    index_field: Option<String>,
    name_field: Option<String>,
    change: StateChange,
}

impl UnionState {
    fn bind_input(&mut self, index: usize, schema: &SchemaRef) {
        let mut slot_map = FieldMappingSlot::empty();
        slot_map
            .fields_by_out
            .resize(self.established.len(), None);
        for (out, descriptor) in self.established.iter().enumerate() {
            if let Some(field) = schema.maybe_field(descriptor.name()) {
                slot_map.to_out.map_field(field.id(), out);
                slot_map.fields_by_out[out] = Some(field.field().clone());
            }
        }
        let slot = &mut self.inputs[index];
        slot.schema = Some(schema.clone());
        slot.map = slot_map;
    }
}

/// Reads an outbound field by translating the row back to its input.
struct UnionField {
    state: Rc<RefCell<UnionState>>,
    out: FieldId,
    field_type: FieldType,
}

impl FieldSource for UnionField {
    fn value_at(&self, row: RowId) -> Value {
        let state = self.state.borrow();
        let input = state.mapping.left_at(row);
        let inbound = state.mapping.right_at(row);
        match state.inputs[input].map.fields_by_out.get(self.out) {
            Some(Some(field)) => field.value_at(inbound),
            _ => Value::default_for_type(self.field_type),
        }
    }
}

/// Reads the originating input's index out of the row mapping.
struct InputIndexField {
    state: Rc<RefCell<UnionState>>,
}

impl FieldSource for InputIndexField {
    fn value_at(&self, row: RowId) -> Value {
        Value::Int64(self.state.borrow().mapping.left_at(row) as i64)
    }
}

/// Reads the originating input's name out of the row mapping.
struct InputNameField {
    state: Rc<RefCell<UnionState>>,
}

impl FieldSource for InputNameField {
    fn value_at(&self, row: RowId) -> Value {
        let state = self.state.borrow();
        let input = state.mapping.left_at(row);
        Value::from(state.inputs[input].name.as_str())
    }
}

/// One attachable input of a union.
pub struct UnionPort {
    state: Rc<RefCell<UnionState>>,
    index: usize,
}

impl FlowInput for UnionPort {
    fn schema_updated(&mut self, schema: Option<SchemaRef>) {
        match schema {
            Some(schema) => {
                let establish = {
                    let mut state = self.state.borrow_mut();
                    let first = state.established.is_empty();
                    if first {
                        schema.for_each_field(|f| {
                            state.established.push(f.descriptor().clone());
                        });
                    }
                    state.bind_input(self.index, &schema);
                    first
                };
                if establish {
                    let out = build_out_schema(&self.state);
                    let manager = self.state.borrow().manager.clone();
                    manager.update_schema(Some(out));
                }
            }
            None => {
                // retract this input's rows; the union schema stays up
                {
                    let mut state = self.state.borrow_mut();
                    let mut rows = Vec::new();
                    state.mapping.for_each_right(self.index, |r| rows.push(r));
                    for row in rows {
                        if let Some(entry) = state.mapping.remove_and_reserve(self.index, row) {
                            state.change.remove_row(entry);
                        }
                    }
                    state.inputs[self.index].schema = None;
                    state.inputs[self.index].map = FieldMappingSlot::empty();
                }
                fire(&self.state);
            }
        }
    }

    fn rows_added(&mut self, rows: &[RowId]) {
        {
            let mut state = self.state.borrow_mut();
            for &row in rows {
                let entry = state.mapping.put(self.index, row);
                state.change.add_row(entry);
            }
        }
        fire(&self.state);
    }

    fn rows_changed(&mut self, rows: &[RowId], changed: &FieldBitSet) {
        {
            let mut state = self.state.borrow_mut();
            let mut out_changed = FieldBitSet::new();
            state.inputs[self.index]
                .map
                .to_out
                .translate_into(changed, &mut out_changed);
            if out_changed.is_empty() {
                return; // only fields this input does not contribute
            }
            for &row in rows {
                if let Some(entry) = state.mapping.entry_of(self.index, row) {
                    state.change.change_row(entry);
                }
            }
            state.change.changed_fields_mut().union_with(&out_changed);
        }
        fire(&self.state);
    }

    fn rows_removed(&mut self, rows: &[RowId]) {
        {
            let mut state = self.state.borrow_mut();
            for &row in rows {
                if let Some(entry) = state.mapping.remove_and_reserve(self.index, row) {
                    state.change.remove_row(entry);
                }
            }
        }
        fire(&self.state);
    }
}

fn fire(state: &Rc<RefCell<UnionState>>) {
    let (manager, mut change) = {
        let mut st = state.borrow_mut();
        (st.manager.clone(), mem::take(&mut st.change))
    };
    change.fire_and_release(&manager, |entry| {
        state.borrow_mut().mapping.free_reserved(entry);
    });
}

fn build_out_schema(state: &Rc<RefCell<UnionState>>) -> SchemaRef {
    let st = state.borrow();
    let mut sb = SchemaBuilder::new(st.name.clone());
    for (out, descriptor) in st.established.iter().enumerate() {
        let source = UnionField {
            state: state.clone(),
            out,
            field_type: descriptor.field_type(),
        };
        sb.push_field(
            descriptor.clone(),
            Field::new(descriptor.field_type(), Rc::new(source)),
        );
    }
    if let Some(name) = &st.index_field {
        let source = InputIndexField {
            state: state.clone(),
        };
        sb.push_field(
            FieldDescriptor::new(name.clone(), FieldType::Int64),
            Field::new(FieldType::Int64, Rc::new(source)),
        );
    }
    if let Some(name) = &st.name_field {
        let source = InputNameField {
            state: state.clone(),
        };
        sb.push_field(
            FieldDescriptor::new(name.clone(), FieldType::String),
            Field::new(FieldType::String, Rc::new(source)),
        );
    }
    match sb.build() {
        Ok(schema) => schema,
        Err(err) => panic!("Failed to build union schema: {}", err),
    }
}

/// Multiplexes many inputs into one output.
pub struct Union {
    state: Rc<RefCell<UnionState>>,
}

impl Union {
    /// Returns the union name.
    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    /// Returns the output to attach downstream inputs to.
    pub fn output(&self) -> OutputHandle {
        self.state.borrow().manager.output()
    }

    /// Returns the published outbound schema.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.state.borrow().manager.schema()
    }

    /// Returns the number of outbound rows.
    pub fn row_count(&self) -> usize {
        self.state.borrow().mapping.len()
    }

    /// Registers a named input and returns its attachable port.
    pub fn add_input(&self, name: impl Into<String>) -> Result<Rc<RefCell<UnionPort>>> {
        let name = name.into();
        check_naming_rules(&name)?;
        let index = {
            let mut state = self.state.borrow_mut();
            if state.inputs.iter().any(|slot| slot.name == name) {
                return Err(Error::duplicate_field(&state.name, name));
            }
            state.inputs.push(InputSlot {
                name,
                schema: None,
                map: FieldMappingSlot::empty(),
            });
            state.inputs.len() - 1
        };
        Ok(input_handle(UnionPort {
            state: self.state.clone(),
            index,
        }))
    }
}

/// Builder for unions.
pub struct UnionBuilder {
    name: String,
    index_field: Option<String>,
    name_field: Option<String>,
}

impl UnionBuilder {
    /// Creates a union builder.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            index_field: None,
            name_field: None,
        })
    }

    /// Appends a synthetic field carrying each row's input index.
    pub fn input_index_field(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        self.index_field = Some(name);
        Ok(self)
    }

    /// Appends a synthetic field carrying each row's input name.
    pub fn input_name_field(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        self.name_field = Some(name);
        Ok(self)
    }

    /// Builds the union. Inputs are registered afterwards with
    /// [`Union::add_input`].
    pub fn build(self) -> Result<Union> {
        Ok(Union {
            state: Rc::new(RefCell::new(UnionState {
                name: self.name,
                manager: OutputManager::new(),
                mapping: OneToMany::new(),
                inputs: Vec::new(),
                established: Vec::new(),
                index_field: self.index_field,
                name_field: self.name_field,
                change: StateChange::new(),
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::RowReader;
    use crate::table::{Table, TableBuilder};
    use alloc::format;
    use alloc::vec;
    use rowflow_dataflow::InputHandle;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl FlowInput for Recorder {
        fn schema_updated(&mut self, schema: Option<SchemaRef>) {
            self.calls.push(format!("schema:{}", schema.is_some()));
        }

        fn rows_added(&mut self, rows: &[RowId]) {
            self.calls.push(format!("add:{:?}", rows));
        }

        fn rows_changed(&mut self, rows: &[RowId], changed: &FieldBitSet) {
            let mut fields = vec![];
            changed.for_each(|f| fields.push(f));
            self.calls.push(format!("chg:{:?}:{:?}", rows, fields));
        }

        fn rows_removed(&mut self, rows: &[RowId]) {
            self.calls.push(format!("rem:{:?}", rows));
        }
    }

    fn orders_table(name: &str) -> Table {
        TableBuilder::new(name)
            .unwrap()
            .add_field("Id", FieldType::Int32)
            .unwrap()
            .add_field("Quantity", FieldType::Int32)
            .unwrap()
            .build()
            .unwrap()
    }

    fn add_order(table: &mut Table, id: i32, quantity: i32) -> RowId {
        table.begin_add().unwrap();
        table.set_value_by_name("Id", Value::Int32(id)).unwrap();
        table
            .set_value_by_name("Quantity", Value::Int32(quantity))
            .unwrap();
        table.end_add().unwrap()
    }

    fn union_of_two() -> (Table, Table, Union) {
        let mut east = orders_table("east");
        let mut west = orders_table("west");
        let union = UnionBuilder::new("all_orders")
            .unwrap()
            .input_index_field("Input")
            .unwrap()
            .input_name_field("Source")
            .unwrap()
            .build()
            .unwrap();
        let east_port = union.add_input("east").unwrap();
        let west_port = union.add_input("west").unwrap();
        east.output().attach(east_port);
        west.output().attach(west_port);
        (east, west, union)
    }

    #[test]
    fn test_disjoint_outbound_rowspace() {
        let (mut east, mut west, union) = union_of_two();
        add_order(&mut east, 1, 10);
        add_order(&mut west, 2, 20);
        add_order(&mut east, 3, 30);
        east.fire_changes();
        west.fire_changes();

        assert_eq!(union.row_count(), 3);
        let reader = RowReader::new(union.schema().unwrap());
        let mut seen = vec![];
        union.output().for_each_row(|row| {
            seen.push((
                reader.get(row, "Id").unwrap(),
                reader.get(row, "Source").unwrap(),
            ));
        });
        assert!(seen.contains(&(Value::Int32(1), Value::from("east"))));
        assert!(seen.contains(&(Value::Int32(2), Value::from("west"))));
        assert!(seen.contains(&(Value::Int32(3), Value::from("east"))));
    }

    #[test]
    fn test_first_schema_establishes_field_set() {
        let mut east = orders_table("east");
        let mut extras = TableBuilder::new("extras")
            .unwrap()
            .add_field("Id", FieldType::Int32)
            .unwrap()
            .add_field("Comment", FieldType::String)
            .unwrap()
            .build()
            .unwrap();
        let union = UnionBuilder::new("all").unwrap().build().unwrap();
        let east_port = union.add_input("east").unwrap();
        let extras_port = union.add_input("extras").unwrap();
        east.output().attach(east_port);
        extras.output().attach(extras_port);

        // field set comes from east: Id + Quantity, no Comment
        let schema = union.schema().unwrap();
        assert_eq!(schema.size(), 2);
        assert!(schema.maybe_field("Comment").is_none());

        add_order(&mut east, 1, 5);
        east.fire_changes();
        extras.begin_add().unwrap();
        extras.set_value_by_name("Id", Value::Int32(2)).unwrap();
        extras
            .set_value_by_name("Comment", Value::from("odd"))
            .unwrap();
        extras.end_add().unwrap();
        extras.fire_changes();

        // the extras row reads a default for the unmapped Quantity field
        let reader = RowReader::new(schema);
        let mut quantities = vec![];
        union.output().for_each_row(|row| {
            quantities.push(reader.get(row, "Quantity").unwrap().as_i32().unwrap());
        });
        quantities.sort_unstable();
        assert_eq!(quantities, vec![0, 5]);
    }

    #[test]
    fn test_changes_translate_per_input() {
        let (mut east, mut west, union) = union_of_two();
        let recorder = input_handle(Recorder::default());
        union.output().attach(recorder.clone());

        let e0 = add_order(&mut east, 1, 10);
        east.fire_changes();
        add_order(&mut west, 2, 20);
        west.fire_changes();

        east.begin_change(e0).unwrap();
        east.set_value_by_name("Quantity", Value::Int32(11)).unwrap();
        east.end_change().unwrap();
        east.fire_changes();

        // the east row is outbound row 0; Quantity is outbound field 1
        assert_eq!(recorder.borrow().calls.last().unwrap(), "chg:[0]:[1]");
    }

    #[test]
    fn test_input_departure_retracts_only_its_rows() {
        let mut east = orders_table("east");
        let mut west = orders_table("west");
        let union = UnionBuilder::new("all_orders")
            .unwrap()
            .input_name_field("Source")
            .unwrap()
            .build()
            .unwrap();
        let east_port = union.add_input("east").unwrap();
        let west_port = union.add_input("west").unwrap();
        east.output().attach(east_port.clone());
        west.output().attach(west_port);
        let recorder = input_handle(Recorder::default());
        union.output().attach(recorder.clone());

        add_order(&mut east, 1, 10);
        east.fire_changes();
        add_order(&mut west, 2, 20);
        west.fire_changes();
        assert_eq!(union.row_count(), 2);

        let handle: InputHandle = east_port;
        east.output().detach(&handle);
        assert_eq!(union.row_count(), 1);
        assert_eq!(recorder.borrow().calls.last().unwrap(), "rem:[0]");
        // the union schema survives the establishing input's departure
        assert!(union.schema().is_some());

        let reader = RowReader::new(union.schema().unwrap());
        union.output().for_each_row(|row| {
            assert_eq!(reader.get(row, "Source").unwrap(), Value::from("west"));
        });
        let _ = west;
    }

    #[test]
    fn test_duplicate_input_name_rejected() {
        let union = UnionBuilder::new("u").unwrap().build().unwrap();
        union.add_input("east").unwrap();
        assert!(union.add_input("east").is_err());
    }

    #[test]
    fn test_outbound_ids_reserved_across_firing() {
        let (mut east, mut west, union) = union_of_two();
        let recorder = input_handle(Recorder::default());
        union.output().attach(recorder.clone());

        let e0 = add_order(&mut east, 1, 10);
        east.fire_changes();
        east.remove(e0).unwrap();
        east.fire_changes();
        assert_eq!(recorder.borrow().calls.last().unwrap(), "rem:[0]");

        // the freed outbound id is reusable for the other input
        add_order(&mut west, 2, 20);
        west.fire_changes();
        assert_eq!(recorder.borrow().calls.last().unwrap(), "add:[0]");
    }
}
