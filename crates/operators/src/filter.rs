//! Filter: forwards the subset of inbound rows that satisfy a predicate.
//!
//! The filter keeps a row index of passing inbound rows; the index entry id
//! doubles as the outbound row id. Outbound fields wrap the inbound fields
//! with a row translation through that index, so values are never copied.
//! When an inbound change touches none of the fields the predicate resolved
//! during bind, the predicate is not re-evaluated and the change is
//! forwarded for rows already passing.

use crate::table::check_naming_rules;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use core::cell::RefCell;
use rowflow_core::schema::{Field, FieldResolver, FieldSource, SchemaBuilder, SchemaRef};
use rowflow_core::{Error, FieldBitSet, IndexedRowSet, Result, RowId, Value};
use rowflow_dataflow::{input_handle, FlowInput, OutputHandle, OutputManager, StateChange};

/// A row predicate bound to a schema through a resolver.
///
/// `bind` must resolve every field the predicate will ever read; resolved
/// fields become the predicate's dependencies, and only changes touching
/// them trigger re-evaluation.
pub trait RowPredicate {
    /// Resolves the fields the predicate reads.
    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()>;

    /// Drops the bound fields. Called on schema retraction and before a
    /// rebind.
    fn unbind(&mut self) {}

    /// Tests an inbound row. Called only after a successful `bind`.
    fn test(&self, row: RowId) -> bool;
}

/// A predicate over a single named field's value.
pub struct ValuePredicate<F: Fn(&Value) -> bool> {
    field_name: String,
    field: Option<Field>,
    test: F,
}

impl<F: Fn(&Value) -> bool> ValuePredicate<F> {
    /// Creates a predicate testing the named field with `test`.
    pub fn new(field_name: impl Into<String>, test: F) -> Self {
        Self {
            field_name: field_name.into(),
            field: None,
            test,
        }
    }
}

impl<F: Fn(&Value) -> bool> RowPredicate for ValuePredicate<F> {
    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()> {
        self.field = Some(resolver.get_field(&self.field_name)?);
        Ok(())
    }

    fn unbind(&mut self) {
        self.field = None;
    }

    fn test(&self, row: RowId) -> bool {
        let field = self.field.as_ref().expect("predicate bound before test");
        (self.test)(&field.value_at(row))
    }
}

/// The default predicate: passes every row, reads no fields.
struct AcceptAll;

impl RowPredicate for AcceptAll {
    fn bind(&mut self, _resolver: &mut FieldResolver<'_>) -> Result<()> {
        Ok(())
    }

    fn test(&self, _row: RowId) -> bool {
        true
    }
}

/// Reads an inbound field through the passing-row index.
struct TranslatedField {
    inner: Field,
    rows: Rc<RefCell<IndexedRowSet>>,
}

impl FieldSource for TranslatedField {
    fn value_at(&self, row: RowId) -> Value {
        let inbound = self.rows.borrow().key_at(row);
        self.inner.value_at(inbound)
    }
}

/// Filters an inbound rowspace through a `RowPredicate`.
pub struct Filter {
    name: String,
    manager: OutputManager,
    predicate: Box<dyn RowPredicate>,
    dependencies: FieldBitSet,
    passing: Rc<RefCell<IndexedRowSet>>,
    in_schema: Option<SchemaRef>,
    source: Option<OutputHandle>,
    change: StateChange,
}

impl Filter {
    /// Returns the filter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the output to attach downstream inputs to.
    pub fn output(&self) -> OutputHandle {
        self.manager.output()
    }

    /// Returns the published outbound schema, if a source is connected.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.manager.schema()
    }

    /// Returns the number of passing rows.
    pub fn row_count(&self) -> usize {
        self.passing.borrow().len()
    }

    /// Replaces the predicate, re-evaluating the full inbound rowspace.
    ///
    /// Rows whose pass/fail status is unchanged produce no notification, so
    /// swapping in an equivalent predicate is silent downstream.
    pub fn set_predicate(&mut self, mut predicate: Box<dyn RowPredicate>) -> Result<()> {
        match self.in_schema.clone() {
            Some(schema) => {
                let mut dependencies = FieldBitSet::new();
                let mut resolver = FieldResolver::new(&schema, &mut dependencies);
                predicate.bind(&mut resolver)?;
                self.predicate.unbind();
                self.predicate = predicate;
                self.dependencies = dependencies;
                self.retest_all();
            }
            None => {
                self.predicate.unbind();
                self.predicate = predicate;
                self.dependencies.clear();
            }
        }
        Ok(())
    }

    fn retest_all(&mut self) {
        let rows = match &self.source {
            Some(source) => source.row_ids(),
            None => return,
        };
        for row in rows {
            let existing = self.passing.borrow().entry_of(row);
            let passes = self.predicate.test(row);
            match (existing, passes) {
                (Some(_), true) | (None, false) => {}
                (Some(entry), false) => {
                    self.passing.borrow_mut().remove_and_reserve(entry);
                    self.change.remove_row(entry);
                }
                (None, true) => {
                    let entry = self.passing.borrow_mut().add(row);
                    self.change.add_row(entry);
                }
            }
        }
        self.fire();
    }

    fn fire(&mut self) {
        let passing = self.passing.clone();
        self.change.fire_and_release(&self.manager, |row| {
            passing.borrow_mut().free_reserved(row);
        });
    }
}

impl FlowInput for Filter {
    fn set_source(&mut self, source: Option<OutputHandle>) {
        self.source = source;
    }

    fn schema_updated(&mut self, schema: Option<SchemaRef>) {
        self.passing.borrow_mut().clear();
        self.dependencies.clear();
        let schema = match schema {
            Some(schema) => schema,
            None => {
                self.predicate.unbind();
                self.in_schema = None;
                self.manager.update_schema(None);
                return;
            }
        };
        let mut resolver = FieldResolver::new(&schema, &mut self.dependencies);
        if let Err(err) = self.predicate.bind(&mut resolver) {
            panic!("Failed to bind predicate for {}: {}", self.name, err);
        }
        let mut sb = SchemaBuilder::new(self.name.clone());
        schema.for_each_field(|f| {
            let source = TranslatedField {
                inner: f.field().clone(),
                rows: self.passing.clone(),
            };
            sb.push_field(
                f.descriptor().clone(),
                Field::new(f.descriptor().field_type(), Rc::new(source)),
            );
        });
        let out = sb.build().expect("inbound schema has unique field names");
        self.in_schema = Some(schema);
        self.manager.update_schema(Some(out));
    }

    fn rows_added(&mut self, rows: &[RowId]) {
        for &row in rows {
            if self.predicate.test(row) {
                let entry = self.passing.borrow_mut().add(row);
                self.change.add_row(entry);
            }
        }
        self.fire();
    }

    fn rows_changed(&mut self, rows: &[RowId], changed: &FieldBitSet) {
        let retest = self.dependencies.intersects(changed);
        for &row in rows {
            let existing = self.passing.borrow().entry_of(row);
            let passes = if retest {
                self.predicate.test(row)
            } else {
                existing.is_some()
            };
            match (existing, passes) {
                (Some(entry), true) => self.change.change_row(entry),
                (Some(entry), false) => {
                    self.passing.borrow_mut().remove_and_reserve(entry);
                    self.change.remove_row(entry);
                }
                (None, true) => {
                    let entry = self.passing.borrow_mut().add(row);
                    self.change.add_row(entry);
                }
                (None, false) => {}
            }
        }
        // pass-through schema: inbound and outbound field ids coincide
        self.change.changed_fields_mut().union_with(changed);
        self.fire();
    }

    fn rows_removed(&mut self, rows: &[RowId]) {
        for &row in rows {
            let existing = self.passing.borrow().entry_of(row);
            if let Some(entry) = existing {
                self.passing.borrow_mut().remove_and_reserve(entry);
                self.change.remove_row(entry);
            }
        }
        self.fire();
    }
}

/// Builder for filters.
pub struct FilterBuilder {
    name: String,
    predicate: Box<dyn RowPredicate>,
}

impl FilterBuilder {
    /// Creates a filter builder. Without a predicate, every row passes.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            predicate: Box::new(AcceptAll),
        })
    }

    /// Sets the predicate.
    pub fn predicate(mut self, predicate: impl RowPredicate + 'static) -> Self {
        self.predicate = Box::new(predicate);
        self
    }

    /// Builds the filter, ready to attach to a source output.
    pub fn build(self) -> Result<Rc<RefCell<Filter>>> {
        if self.name.is_empty() {
            return Err(Error::invalid_schema("Filter name cannot be empty"));
        }
        Ok(input_handle(Filter {
            name: self.name,
            manager: OutputManager::new(),
            predicate: self.predicate,
            dependencies: FieldBitSet::new(),
            passing: Rc::new(RefCell::new(IndexedRowSet::new())),
            in_schema: None,
            source: None,
            change: StateChange::new(),
        }))
    }
}
