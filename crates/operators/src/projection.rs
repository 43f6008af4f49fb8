//! Projection: reshapes an inbound schema without touching the rowspace.
//!
//! Row ids pass through unchanged; the projection forwards a subset of the
//! inbound fields (picked by include or omit lists, optionally renamed),
//! appends calculated fields that may build on earlier ones, and
//! translates inbound changed-field sets into the outbound id space. A
//! change batch whose fields affect no outbound field is suppressed
//! entirely.

use crate::table::check_naming_rules;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use rowflow_core::schema::{
    Field, FieldDescriptor, FieldResolver, FieldSource, SchemaBuilder, SchemaRef,
};
use rowflow_core::{Error, FieldBitSet, FieldType, Result, RowId, Value};
use rowflow_dataflow::{input_handle, FlowInput, OutputManager};

/// A derived field bound to a schema through a resolver.
///
/// `bind` must resolve every field the calculation will ever read; resolved
/// fields become its dependencies, and changes touching them are reported
/// downstream as changes of the calculated field.
pub trait RowCalculation {
    /// The outbound type of the calculated field.
    fn field_type(&self) -> FieldType;

    /// Resolves the fields the calculation reads.
    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()>;

    /// Drops the bound fields. Called on schema retraction and before a
    /// rebind.
    fn unbind(&mut self) {}

    /// Computes the value for a row. Called only after a successful `bind`.
    fn calculate(&self, row: RowId) -> Value;
}

/// A calculation over named input fields.
pub struct ValueCalculation<F: Fn(&[Value]) -> Value> {
    field_type: FieldType,
    input_names: Vec<String>,
    inputs: Vec<Field>,
    calc: F,
}

impl<F: Fn(&[Value]) -> Value> ValueCalculation<F> {
    /// Creates a calculation of the given type over the named fields.
    pub fn new(field_type: FieldType, input_names: &[&str], calc: F) -> Self {
        Self {
            field_type,
            input_names: input_names.iter().map(|n| String::from(*n)).collect(),
            inputs: Vec::new(),
            calc,
        }
    }
}

impl<F: Fn(&[Value]) -> Value> RowCalculation for ValueCalculation<F> {
    fn field_type(&self) -> FieldType {
        self.field_type
    }

    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()> {
        self.inputs.clear();
        for name in &self.input_names {
            self.inputs.push(resolver.get_field(name)?);
        }
        Ok(())
    }

    fn unbind(&mut self) {
        self.inputs.clear();
    }

    fn calculate(&self, row: RowId) -> Value {
        let values: Vec<Value> = self.inputs.iter().map(|f| f.value_at(row)).collect();
        (self.calc)(&values)
    }
}

/// Outbound field order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FieldOrdering {
    /// Fields appear in declaration order: forwards first, then
    /// calculations, each in the order they were added to the builder.
    #[default]
    Declared,
    /// Fields are sorted by name.
    Alphabetical,
}

enum Selection {
    Forward { source: String, out: String },
    Calculated { name: String, calc: Rc<RefCell<dyn RowCalculation>> },
}

impl Selection {
    fn out_name(&self) -> &str {
        match self {
            Selection::Forward { out, .. } => out,
            Selection::Calculated { name, .. } => name,
        }
    }
}

/// Computes a derived field on every read.
struct CalculatedField {
    calc: Rc<RefCell<dyn RowCalculation>>,
}

impl FieldSource for CalculatedField {
    fn value_at(&self, row: RowId) -> Value {
        self.calc.borrow().calculate(row)
    }
}

/// Reshapes an inbound schema, forwarding rows untouched.
pub struct Projection {
    name: String,
    manager: OutputManager,
    selections: Vec<Selection>,
    forward_all: bool,
    omits: Vec<String>,
    ordering: FieldOrdering,
    // indexed by inbound field id: the outbound fields it affects
    dependencies: Vec<FieldBitSet>,
}

impl core::fmt::Debug for Projection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Projection")
            .field("name", &self.name)
            .field("forward_all", &self.forward_all)
            .field("omits", &self.omits)
            .finish_non_exhaustive()
    }
}

impl Projection {
    /// Returns the projection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the output to attach downstream inputs to.
    pub fn output(&self) -> rowflow_dataflow::OutputHandle {
        self.manager.output()
    }

    /// Returns the published outbound schema, if a source is connected.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.manager.schema()
    }

    /// Returns the number of active rows.
    pub fn row_count(&self) -> usize {
        self.manager.row_count()
    }

    fn rebuild(&mut self, schema: &SchemaRef) {
        let mut out_fields: Vec<(FieldDescriptor, Field, FieldBitSet)> = Vec::new();
        // calculations already bound this rebuild, visible to later ones
        let mut calc_fields: Vec<(FieldDescriptor, Field, FieldBitSet)> = Vec::new();
        if self.forward_all {
            for name in &self.omits {
                if let Err(err) = schema.field(name) {
                    panic!("Failed to project {}: {}", self.name, err);
                }
            }
            schema.for_each_field(|f| {
                if self.omits.iter().any(|n| n == f.name()) {
                    return;
                }
                out_fields.push((
                    f.descriptor().clone(),
                    f.field().clone(),
                    FieldBitSet::of(&[f.id()]),
                ));
            });
        }
        for selection in &self.selections {
            match selection {
                Selection::Forward { source, out } => {
                    let schema_field = match schema.field(source) {
                        Ok(f) => f,
                        Err(err) => panic!("Failed to project {}: {}", self.name, err),
                    };
                    out_fields.push((
                        schema_field.descriptor().renamed(out.clone()),
                        schema_field.field().clone(),
                        FieldBitSet::of(&[schema_field.id()]),
                    ));
                }
                Selection::Calculated { name, calc } => {
                    let view = {
                        let mut vb = SchemaBuilder::new(self.name.clone());
                        schema.for_each_field(|f| {
                            vb.push_field(f.descriptor().clone(), f.field().clone());
                        });
                        for (descriptor, field, _) in &calc_fields {
                            vb.push_field(descriptor.clone(), field.clone());
                        }
                        match vb.build() {
                            Ok(view) => view,
                            Err(err) => panic!("Failed to bind calculation {}: {}", name, err),
                        }
                    };
                    let mut view_deps = FieldBitSet::new();
                    let field_type = {
                        let mut calc = calc.borrow_mut();
                        let mut resolver = FieldResolver::new(&view, &mut view_deps);
                        if let Err(err) = calc.bind(&mut resolver) {
                            panic!("Failed to bind calculation {}: {}", name, err);
                        }
                        calc.field_type()
                    };
                    // fold references to earlier calculations back into
                    // inbound field dependencies
                    let inbound = schema.size();
                    let mut deps = FieldBitSet::new();
                    view_deps.for_each(|d| {
                        if d < inbound {
                            deps.field_changed(d);
                        } else {
                            deps.union_with(&calc_fields[d - inbound].2);
                        }
                    });
                    let source = CalculatedField { calc: calc.clone() };
                    let descriptor = FieldDescriptor::new(name.clone(), field_type);
                    let field = Field::new(field_type, Rc::new(source));
                    calc_fields.push((descriptor.clone(), field.clone(), deps.clone()));
                    out_fields.push((descriptor, field, deps));
                }
            }
        }
        if self.ordering == FieldOrdering::Alphabetical {
            out_fields.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        }

        self.dependencies.clear();
        self.dependencies
            .resize_with(schema.size(), FieldBitSet::new);
        let mut sb = SchemaBuilder::new(self.name.clone());
        for (out_id, (descriptor, field, deps)) in out_fields.into_iter().enumerate() {
            deps.for_each(|inbound| self.dependencies[inbound].field_changed(out_id));
            sb.push_field(descriptor, field);
        }
        match sb.build() {
            Ok(out) => self.manager.update_schema(Some(out)),
            Err(err) => panic!("Failed to project {}: {}", self.name, err),
        }
    }
}

impl FlowInput for Projection {
    fn schema_updated(&mut self, schema: Option<SchemaRef>) {
        self.dependencies.clear();
        match schema {
            Some(schema) => self.rebuild(&schema),
            None => {
                for selection in &self.selections {
                    if let Selection::Calculated { calc, .. } = selection {
                        calc.borrow_mut().unbind();
                    }
                }
                self.manager.update_schema(None);
            }
        }
    }

    fn rows_added(&mut self, rows: &[RowId]) {
        self.manager.notify_adds(rows);
    }

    fn rows_changed(&mut self, rows: &[RowId], changed: &FieldBitSet) {
        let mut outbound = FieldBitSet::new();
        changed.for_each(|inbound| {
            if let Some(deps) = self.dependencies.get(inbound) {
                outbound.union_with(deps);
            }
        });
        if outbound.is_empty() {
            return; // no outbound field is affected
        }
        self.manager.notify_changes(rows, &outbound);
    }

    fn rows_removed(&mut self, rows: &[RowId]) {
        self.manager.notify_removes(rows);
    }
}

/// Builder for projections.
pub struct ProjectionBuilder {
    name: String,
    selections: Vec<Selection>,
    forward_all: bool,
    omits: Vec<String>,
    ordering: FieldOrdering,
}

impl core::fmt::Debug for ProjectionBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionBuilder")
            .field("name", &self.name)
            .field("forward_all", &self.forward_all)
            .field("omits", &self.omits)
            .finish_non_exhaustive()
    }
}

impl ProjectionBuilder {
    /// Creates a projection builder with no fields selected.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            selections: Vec::new(),
            forward_all: false,
            omits: Vec::new(),
            ordering: FieldOrdering::Declared,
        })
    }

    /// Forwards every inbound field under its own name.
    pub fn forward_all(mut self) -> Self {
        self.forward_all = true;
        self
    }

    /// Drops one inbound field from a `forward_all` expansion. A name
    /// absent from the bound schema aborts the schema publish.
    pub fn omit(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        if !self.omits.contains(&name) {
            self.omits.push(name);
        }
        Ok(self)
    }

    /// Forwards one inbound field under its own name.
    pub fn forward(self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let out = name.clone();
        self.forward_as(name, out)
    }

    /// Forwards one inbound field under a new name.
    pub fn forward_as(
        mut self,
        source: impl Into<String>,
        out: impl Into<String>,
    ) -> Result<Self> {
        let out = out.into();
        check_naming_rules(&out)?;
        self.check_duplicate(&out)?;
        self.selections.push(Selection::Forward {
            source: source.into(),
            out,
        });
        Ok(self)
    }

    /// Appends a calculated field. Its calculation can resolve inbound
    /// fields and calculated fields added before it.
    pub fn calculate(
        mut self,
        name: impl Into<String>,
        calc: impl RowCalculation + 'static,
    ) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        self.check_duplicate(&name)?;
        let calc: Rc<RefCell<dyn RowCalculation>> = Rc::new(RefCell::new(calc));
        self.selections.push(Selection::Calculated { name, calc });
        Ok(self)
    }

    /// Sets the outbound field order.
    pub fn ordering(mut self, ordering: FieldOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Builds the projection, ready to attach to a source output.
    pub fn build(self) -> Result<Rc<RefCell<Projection>>> {
        if !self.forward_all && self.selections.is_empty() {
            return Err(Error::invalid_schema("Projection selects no fields"));
        }
        if !self.forward_all && !self.omits.is_empty() {
            return Err(Error::invalid_operation("omit requires forward_all"));
        }
        Ok(input_handle(Projection {
            name: self.name,
            manager: OutputManager::new(),
            selections: self.selections,
            forward_all: self.forward_all,
            omits: self.omits,
            ordering: self.ordering,
            dependencies: Vec::new(),
        }))
    }

    fn check_duplicate(&self, name: &str) -> Result<()> {
        if self.selections.iter().any(|s| s.out_name() == name) {
            return Err(Error::duplicate_field(&self.name, name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Table, TableBuilder};
    use alloc::format;
    use alloc::vec;

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

    fn trades_table() -> Table {
        TableBuilder::new("trades")
            .unwrap()
            .add_field("Symbol", FieldType::String)
            .unwrap()
            .add_field("Price", FieldType::Float64)
            .unwrap()
            .add_field("Quantity", FieldType::Int32)
            .unwrap()
            .add_field("Internal", FieldType::Bool)
            .unwrap()
            .build()
            .unwrap()
    }

    fn add_trade(table: &mut Table, symbol: &str, price: f64, quantity: i32) -> RowId {
        table.begin_add().unwrap();
        table.set_value_by_name("Symbol", Value::from(symbol)).unwrap();
        table.set_value_by_name("Price", Value::Float64(price)).unwrap();
        table
            .set_value_by_name("Quantity", Value::Int32(quantity))
            .unwrap();
        table.end_add().unwrap()
    }

    fn notional() -> impl RowCalculation {
        ValueCalculation::new(FieldType::Float64, &["Price", "Quantity"], |values| {
            let price = values[0].as_f64().unwrap_or(0.0);
            let quantity = values[1].as_f64().unwrap_or(0.0);
            Value::Float64(price * quantity)
        })
    }

    #[test]
    fn test_forward_rename_and_calculate() {
        let mut table = trades_table();
        let projection = ProjectionBuilder::new("trade_view")
            .unwrap()
            .forward("Symbol")
            .unwrap()
            .forward_as("Price", "Px")
            .unwrap()
            .calculate("Notional", notional())
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(projection.clone());

        let schema = projection.borrow().schema().unwrap();
        assert_eq!(schema.size(), 3);
        assert_eq!(schema.field_at(0).name(), "Symbol");
        assert_eq!(schema.field_at(1).name(), "Px");
        assert_eq!(schema.field_at(2).name(), "Notional");

        let row = add_trade(&mut table, "ACME", 2.5, 4);
        table.fire_changes();
        assert_eq!(schema.field_at(0).field().value_at(row), Value::from("ACME"));
        assert_eq!(schema.field_at(1).field().value_at(row), Value::Float64(2.5));
        assert_eq!(
            schema.field_at(2).field().value_at(row),
            Value::Float64(10.0)
        );
    }

    #[test]
    fn test_change_translation_covers_calculation() {
        let mut table = trades_table();
        let projection = ProjectionBuilder::new("view")
            .unwrap()
            .forward("Symbol")
            .unwrap()
            .calculate("Notional", notional())
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(projection.clone());
        let recorder = input_handle(Recorder::default());
        projection.borrow().output().attach(recorder.clone());

        let row = add_trade(&mut table, "ACME", 2.0, 3);
        table.fire_changes();

        // Price feeds only the calculation: outbound change names Notional
        table.begin_change(row).unwrap();
        table.set_value_by_name("Price", Value::Float64(5.0)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();
        assert_eq!(
            recorder.borrow().calls.last().unwrap(),
            &format!("chg:[{}]:[1]", row)
        );
    }

    #[test]
    fn test_calculation_over_calculation() {
        let mut table = trades_table();
        let projection = ProjectionBuilder::new("view")
            .unwrap()
            .forward("Symbol")
            .unwrap()
            .calculate(
                "Double",
                ValueCalculation::new(FieldType::Int64, &["Quantity"], |values| {
                    Value::Int64(values[0].as_i64().unwrap_or(0) * 2)
                }),
            )
            .unwrap()
            .calculate(
                "Quad",
                ValueCalculation::new(FieldType::Int64, &["Double"], |values| {
                    Value::Int64(values[0].as_i64().unwrap_or(0) * 2)
                }),
            )
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(projection.clone());
        let recorder = input_handle(Recorder::default());
        projection.borrow().output().attach(recorder.clone());

        let row = add_trade(&mut table, "ACME", 1.0, 3);
        table.fire_changes();
        let schema = projection.borrow().schema().unwrap();
        assert_eq!(
            schema.field("Double").unwrap().field().value_at(row),
            Value::Int64(6)
        );
        assert_eq!(
            schema.field("Quad").unwrap().field().value_at(row),
            Value::Int64(12)
        );

        // a Quantity change reaches both derived fields
        table.begin_change(row).unwrap();
        table.set_value_by_name("Quantity", Value::Int32(5)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();
        assert_eq!(
            recorder.borrow().calls.last().unwrap(),
            &format!("chg:[{}]:[1, 2]", row)
        );
        assert_eq!(
            schema.field("Quad").unwrap().field().value_at(row),
            Value::Int64(20)
        );

        // a change elsewhere still reaches neither
        let calls_before = recorder.borrow().calls.len();
        table.begin_change(row).unwrap();
        table.set_value_by_name("Internal", Value::Bool(true)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();
        assert_eq!(recorder.borrow().calls.len(), calls_before);
    }

    #[test]
    fn test_forward_all_with_omit() {
        let mut table = trades_table();
        let projection = ProjectionBuilder::new("view")
            .unwrap()
            .forward_all()
            .omit("Internal")
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(projection.clone());
        let recorder = input_handle(Recorder::default());
        projection.borrow().output().attach(recorder.clone());

        let schema = projection.borrow().schema().unwrap();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["Symbol", "Price", "Quantity"]);

        // a change to the omitted field is suppressed like any other
        // unprojected field
        let row = add_trade(&mut table, "ACME", 1.0, 1);
        table.fire_changes();
        let calls_before = recorder.borrow().calls.len();
        table.begin_change(row).unwrap();
        table.set_value_by_name("Internal", Value::Bool(true)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();
        assert_eq!(recorder.borrow().calls.len(), calls_before);
    }

    #[test]
    fn test_omit_requires_forward_all() {
        let err = ProjectionBuilder::new("view")
            .unwrap()
            .forward("Symbol")
            .unwrap()
            .omit("Price")
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));
    }

    #[test]
    #[should_panic(expected = "Failed to project")]
    fn test_omit_of_unknown_field_aborts_publish() {
        let table = trades_table();
        let projection = ProjectionBuilder::new("view")
            .unwrap()
            .forward_all()
            .omit("Missing")
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(projection);
    }

    #[test]
    fn test_unprojected_change_suppressed() {
        let mut table = trades_table();
        let projection = ProjectionBuilder::new("view")
            .unwrap()
            .forward("Symbol")
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(projection.clone());
        let recorder = input_handle(Recorder::default());
        projection.borrow().output().attach(recorder.clone());

        let row = add_trade(&mut table, "ACME", 2.0, 3);
        table.fire_changes();
        let calls_before = recorder.borrow().calls.len();

        table.begin_change(row).unwrap();
        table.set_value_by_name("Internal", Value::Bool(true)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();
        assert_eq!(recorder.borrow().calls.len(), calls_before);
    }

    #[test]
    fn test_forward_all_and_alphabetical_order() {
        let mut table = trades_table();
        let projection = ProjectionBuilder::new("view")
            .unwrap()
            .forward_all()
            .ordering(FieldOrdering::Alphabetical)
            .build()
            .unwrap();
        table.output().attach(projection.clone());

        let schema = projection.borrow().schema().unwrap();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["Internal", "Price", "Quantity", "Symbol"]);

        let row = add_trade(&mut table, "ACME", 1.0, 1);
        table.fire_changes();
        assert_eq!(
            schema.field("Symbol").unwrap().field().value_at(row),
            Value::from("ACME")
        );
    }

    #[test]
    fn test_rowspace_passes_through() {
        let mut table = trades_table();
        let projection = ProjectionBuilder::new("view")
            .unwrap()
            .forward("Symbol")
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(projection.clone());
        let recorder = input_handle(Recorder::default());
        projection.borrow().output().attach(recorder.clone());

        let r0 = add_trade(&mut table, "A", 1.0, 1);
        let r1 = add_trade(&mut table, "B", 1.0, 1);
        table.fire_changes();
        table.remove(r0).unwrap();
        table.fire_changes();

        assert_eq!(
            recorder.borrow().calls,
            vec![
                String::from("schema:true"),
                format!("add:[{}, {}]", r0, r1),
                format!("rem:[{}]", r0),
            ]
        );
        assert_eq!(projection.borrow().row_count(), 1);
    }

    #[test]
    fn test_duplicate_outbound_name_rejected() {
        let err = ProjectionBuilder::new("view")
            .unwrap()
            .forward("Symbol")
            .unwrap()
            .forward_as("Price", "Symbol")
            .unwrap_err();
        assert_eq!(err, Error::duplicate_field("view", "Symbol"));
    }

    #[test]
    fn test_empty_projection_rejected() {
        assert!(ProjectionBuilder::new("view").unwrap().build().is_err());
    }

    #[test]
    fn test_teardown_on_schema_retraction() {
        let mut table = trades_table();
        let projection = ProjectionBuilder::new("view")
            .unwrap()
            .forward("Symbol")
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(projection.clone());
        add_trade(&mut table, "A", 1.0, 1);
        table.fire_changes();

        let handle: rowflow_dataflow::InputHandle = projection.clone();
        table.output().detach(&handle);
        assert!(projection.borrow().schema().is_none());
        assert_eq!(projection.borrow().row_count(), 0);
    }
}
