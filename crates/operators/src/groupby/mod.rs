//! GroupBy: incremental aggregation over a grouped inbound rowspace.
//!
//! A group function maps each inbound row to an integer group id. The
//! operator maintains one *parent* output row per live group (forwarded
//! fields, aggregations and the `GroupId`/`Count` synthetics) and a *child*
//! output that mirrors the inbound rowspace 1:1 with the owning group id
//! stamped onto every row.
//!
//! Aggregations are driven by member deltas, never by full recompute: an
//! inbound change touching an aggregation's bound fields adjusts only that
//! group's accumulator. A change touching the group function's bound
//! fields can move a row between groups, which is processed as a removal
//! from the old group followed by an addition to the new one; a group
//! losing its last member is removed and reported to the group function
//! through `on_empty_group`.

mod aggregate;
mod mapping;

pub use aggregate::{AggregationFunction, AvgAggregation, SumAggregation};
pub use mapping::GroupMapping;

use crate::table::check_naming_rules;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use rowflow_core::schema::{
    Field, FieldDescriptor, FieldResolver, FieldSource, FieldStore, SchemaBuilder, SchemaRef,
};
use rowflow_core::{
    Error, FieldBitSet, FieldId, FieldType, IndexedRowSet, OneToMany, Result, RowId, Value,
};
use rowflow_dataflow::{input_handle, FlowInput, OutputHandle, OutputManager, StateChangeSet};

/// Maps inbound rows to integer group ids.
///
/// Like predicates, a group function resolves every field it reads during
/// `bind`; only changes touching those fields trigger re-grouping.
pub trait GroupFunction {
    /// Resolves the fields the function reads.
    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()>;

    /// Drops the bound fields. Called on schema retraction and before a
    /// rebind.
    fn unbind(&mut self) {}

    /// Returns the group id for a row. Called only after a successful
    /// `bind`.
    fn group_of(&mut self, row: RowId) -> usize;

    /// Called when a group loses its last member, so id assignments can be
    /// released.
    fn on_empty_group(&mut self, _group: usize) {}
}

/// Groups by one field's value.
///
/// Integer fields use the value itself as the group id (so a `Value1=4`
/// row lands in group 4; negative values are bit-cast and occupy the
/// upper half of the id space); other types are assigned dense ids
/// through a [`GroupMapping`], released again when the group empties.
pub struct ValueGroupFunction {
    field_name: String,
    field: Option<Field>,
    identity: bool,
    mapping: GroupMapping,
}

impl ValueGroupFunction {
    /// Creates a group function over the named field.
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            field: None,
            identity: false,
            mapping: GroupMapping::new(),
        }
    }
}

impl GroupFunction for ValueGroupFunction {
    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()> {
        let field = resolver.get_field(&self.field_name)?;
        self.identity = matches!(field.field_type(), FieldType::Int32 | FieldType::Int64);
        self.field = Some(field);
        self.mapping.clear();
        Ok(())
    }

    fn unbind(&mut self) {
        self.field = None;
        self.mapping.clear();
    }

    fn group_of(&mut self, row: RowId) -> usize {
        let value = self
            .field
            .as_ref()
            .expect("group function bound before use")
            .value_at(row);
        if self.identity {
            // two's complement bit cast: negative keys land in the upper
            // half of the id space, disjoint from the non-negative
            // identities, and read back as the original value through the
            // GroupId field's i64 cast
            value.as_i64().unwrap_or(0) as usize
        } else {
            self.mapping.id_for(&value)
        }
    }

    fn on_empty_group(&mut self, group: usize) {
        if !self.identity {
            self.mapping.release(group);
        }
    }
}

#[derive(Default)]
struct GroupIndex {
    groups: IndexedRowSet,          // key = group id, entry = parent row
    membership: OneToMany,          // left = parent row, right = inbound row
    row_parent: Vec<Option<usize>>, // inbound row -> parent row
}

impl GroupIndex {
    fn clear(&mut self) {
        self.groups.clear();
        self.membership.clear();
        self.row_parent.clear();
    }

    fn set_parent(&mut self, row: RowId, parent: Option<usize>) {
        if row >= self.row_parent.len() {
            self.row_parent.resize(row + 1, None);
        }
        self.row_parent[row] = parent;
    }

    fn parent_of(&self, row: RowId) -> Option<usize> {
        self.row_parent.get(row).copied().flatten()
    }
}

/// Reads a parent row's group id out of the group index.
struct ParentGroupIdField {
    index: Rc<RefCell<GroupIndex>>,
}

impl FieldSource for ParentGroupIdField {
    fn value_at(&self, row: RowId) -> Value {
        Value::Int64(self.index.borrow().groups.key_at(row) as i64)
    }
}

/// Reads a parent row's member count out of the group index.
struct ParentCountField {
    index: Rc<RefCell<GroupIndex>>,
}

impl FieldSource for ParentCountField {
    fn value_at(&self, row: RowId) -> Value {
        Value::Int64(self.index.borrow().membership.count(row) as i64)
    }
}

/// Stamps a child row with the group id of its owning group.
struct ChildGroupIdField {
    index: Rc<RefCell<GroupIndex>>,
}

impl FieldSource for ChildGroupIdField {
    fn value_at(&self, row: RowId) -> Value {
        let index = self.index.borrow();
        match index.parent_of(row) {
            Some(parent) => Value::Int64(index.groups.key_at(parent) as i64),
            None => Value::Int64(-1),
        }
    }
}

/// Reads an aggregation's group value on every access.
struct AggregationField {
    agg: Rc<RefCell<dyn AggregationFunction>>,
}

impl FieldSource for AggregationField {
    fn value_at(&self, row: RowId) -> Value {
        self.agg.borrow().group_value(row)
    }
}

enum Selection {
    Forward(String),
    Aggregate(String, Rc<RefCell<dyn AggregationFunction>>),
    GroupId(String),
    Count(String),
}

impl Selection {
    fn out_name(&self) -> &str {
        match self {
            Selection::Forward(name)
            | Selection::Aggregate(name, _)
            | Selection::GroupId(name)
            | Selection::Count(name) => name,
        }
    }
}

enum BoundField {
    Forward {
        inbound: FieldId,
        field: Field,
        store: FieldStore,
        out: FieldId,
    },
    Aggregate {
        agg: Rc<RefCell<dyn AggregationFunction>>,
        deps: FieldBitSet,
        out: FieldId,
    },
    GroupId,
    Count {
        out: FieldId,
    },
}

/// Groups an inbound rowspace and maintains per-group aggregations.
pub struct GroupBy {
    name: String,
    parent: OutputManager,
    child: OutputManager,
    group_fn: Box<dyn GroupFunction>,
    group_deps: FieldBitSet,
    index: Rc<RefCell<GroupIndex>>,
    selections: Vec<Selection>,
    bound: Vec<BoundField>,
    child_group_field: String,
    child_gid_id: FieldId,
    change: StateChangeSet,
}

impl GroupBy {
    /// Returns the operator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parent output: one row per live group.
    pub fn output(&self) -> OutputHandle {
        self.parent.output()
    }

    /// Returns the child output: the inbound rowspace stamped with group
    /// ids.
    pub fn child_output(&self) -> OutputHandle {
        self.child.output()
    }

    /// Returns the published parent schema, if a source is connected.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.parent.schema()
    }

    /// Returns the number of live groups.
    pub fn group_count(&self) -> usize {
        self.index.borrow().groups.len()
    }

    fn rebuild(&mut self, schema: &SchemaRef) {
        let mut resolver = FieldResolver::new(schema, &mut self.group_deps);
        if let Err(err) = self.group_fn.bind(&mut resolver) {
            panic!("Failed to bind group function for {}: {}", self.name, err);
        }

        let mut sb = SchemaBuilder::new(self.name.clone());
        for (out, selection) in self.selections.iter().enumerate() {
            match selection {
                Selection::Forward(name) => {
                    let schema_field = match schema.field(name) {
                        Ok(f) => f,
                        Err(err) => panic!("Failed to bind group-by {}: {}", self.name, err),
                    };
                    let store = FieldStore::new(schema_field.descriptor().field_type());
                    sb.push_field(schema_field.descriptor().clone(), store.as_field());
                    self.bound.push(BoundField::Forward {
                        inbound: schema_field.id(),
                        field: schema_field.field().clone(),
                        store,
                        out,
                    });
                }
                Selection::Aggregate(name, agg) => {
                    let mut deps = FieldBitSet::new();
                    let field_type = {
                        let mut agg = agg.borrow_mut();
                        let mut resolver = FieldResolver::new(schema, &mut deps);
                        if let Err(err) = agg.bind(&mut resolver) {
                            panic!("Failed to bind aggregation {}: {}", name, err);
                        }
                        agg.reset();
                        agg.field_type()
                    };
                    let source = AggregationField { agg: agg.clone() };
                    sb.push_field(
                        FieldDescriptor::new(name.clone(), field_type),
                        Field::new(field_type, Rc::new(source)),
                    );
                    self.bound.push(BoundField::Aggregate {
                        agg: agg.clone(),
                        deps,
                        out,
                    });
                }
                Selection::GroupId(name) => {
                    let source = ParentGroupIdField {
                        index: self.index.clone(),
                    };
                    sb.push_field(
                        FieldDescriptor::new(name.clone(), FieldType::Int64),
                        Field::new(FieldType::Int64, Rc::new(source)),
                    );
                    self.bound.push(BoundField::GroupId);
                }
                Selection::Count(name) => {
                    let source = ParentCountField {
                        index: self.index.clone(),
                    };
                    sb.push_field(
                        FieldDescriptor::new(name.clone(), FieldType::Int64),
                        Field::new(FieldType::Int64, Rc::new(source)),
                    );
                    self.bound.push(BoundField::Count { out });
                }
            }
        }
        match sb.build() {
            Ok(out) => self.parent.update_schema(Some(out)),
            Err(err) => panic!("Failed to bind group-by {}: {}", self.name, err),
        }

        let mut cb = SchemaBuilder::new(self.name.clone());
        schema.for_each_field(|f| cb.push_field(f.descriptor().clone(), f.field().clone()));
        self.child_gid_id = schema.size();
        let source = ChildGroupIdField {
            index: self.index.clone(),
        };
        cb.push_field(
            FieldDescriptor::new(self.child_group_field.clone(), FieldType::Int64),
            Field::new(FieldType::Int64, Rc::new(source)),
        );
        match cb.build() {
            Ok(out) => self.child.update_schema(Some(out)),
            Err(err) => panic!("Failed to bind group-by {}: {}", self.name, err),
        }
    }

    fn join_group(&mut self, row: RowId) {
        let gid = self.group_fn.group_of(row);
        let (parent, is_new) = {
            let mut index = self.index.borrow_mut();
            let (parent, is_new) = match index.groups.entry_of(gid) {
                Some(parent) => (parent, false),
                None => (index.groups.add(gid), true),
            };
            index.membership.put(parent, row);
            index.set_parent(row, Some(parent));
            (parent, is_new)
        };
        for bound in &self.bound {
            match bound {
                BoundField::Forward { field, store, out, .. } => {
                    let changed = store.set_value_at(parent, field.value_at(row));
                    if changed && !is_new {
                        self.change.change_field(*out);
                    }
                }
                BoundField::Aggregate { agg, out, .. } => {
                    agg.borrow_mut().row_added(parent, row);
                    if !is_new {
                        self.change.change_field(*out);
                    }
                }
                BoundField::Count { out } => {
                    if !is_new {
                        self.change.change_field(*out);
                    }
                }
                BoundField::GroupId => {}
            }
        }
        if is_new {
            self.change.add_row(parent);
        } else {
            self.change.change_row_if_not_added(parent);
        }
    }

    fn leave_group(&mut self, row: RowId) {
        let parent = self
            .index
            .borrow()
            .parent_of(row)
            .expect("removal of a row with no group");
        let emptied = {
            let mut index = self.index.borrow_mut();
            if let Some(entry) = index.membership.remove_and_reserve(parent, row) {
                index.membership.free_reserved(entry);
            }
            index.membership.count(parent) == 0
        };
        for bound in &self.bound {
            if let BoundField::Aggregate { agg, .. } = bound {
                agg.borrow_mut().row_removed(parent, row);
            }
        }
        if emptied {
            let gid = {
                let mut index = self.index.borrow_mut();
                let gid = index.groups.key_at(parent);
                index.groups.remove_and_reserve(parent);
                gid
            };
            self.change.remove_row(parent);
            self.group_fn.on_empty_group(gid);
        } else {
            for bound in &self.bound {
                match bound {
                    BoundField::Aggregate { out, .. } | BoundField::Count { out } => {
                        self.change.change_field(*out);
                    }
                    _ => {}
                }
            }
            self.change.change_row_if_not_added(parent);
        }
    }

    fn fire_parent(&mut self) {
        let index = self.index.clone();
        let aggs: Vec<Rc<RefCell<dyn AggregationFunction>>> = self
            .bound
            .iter()
            .filter_map(|b| match b {
                BoundField::Aggregate { agg, .. } => Some(agg.clone()),
                _ => None,
            })
            .collect();
        self.change.fire_and_release(&self.parent, |parent| {
            index.borrow_mut().groups.free_reserved(parent);
            for agg in &aggs {
                agg.borrow_mut().group_removed(parent);
            }
        });
    }
}

impl FlowInput for GroupBy {
    fn schema_updated(&mut self, schema: Option<SchemaRef>) {
        self.index.borrow_mut().clear();
        self.group_deps.clear();
        self.bound.clear();
        match schema {
            Some(schema) => self.rebuild(&schema),
            None => {
                self.group_fn.unbind();
                for selection in &self.selections {
                    if let Selection::Aggregate(_, agg) = selection {
                        agg.borrow_mut().unbind();
                    }
                }
                self.parent.update_schema(None);
                self.child.update_schema(None);
            }
        }
    }

    fn rows_added(&mut self, rows: &[RowId]) {
        for &row in rows {
            self.join_group(row);
        }
        self.fire_parent();
        self.child.notify_adds(rows);
    }

    fn rows_changed(&mut self, rows: &[RowId], changed: &FieldBitSet) {
        let regroup = self.group_deps.intersects(changed);
        let mut any_regrouped = false;
        for &row in rows {
            let parent = self
                .index
                .borrow()
                .parent_of(row)
                .expect("change for a row with no group");
            if regroup {
                let gid = self.group_fn.group_of(row);
                let old_gid = self.index.borrow().groups.key_at(parent);
                if gid != old_gid {
                    // regrouping is a removal from the old group followed
                    // by an addition to the new one
                    self.leave_group(row);
                    self.join_group(row);
                    any_regrouped = true;
                    continue;
                }
            }
            let mut touched = false;
            for bound in &self.bound {
                match bound {
                    BoundField::Forward {
                        inbound,
                        field,
                        store,
                        out,
                    } => {
                        if changed.contains(*inbound)
                            && store.set_value_at(parent, field.value_at(row))
                        {
                            self.change.change_field(*out);
                            touched = true;
                        }
                    }
                    BoundField::Aggregate { agg, deps, out } => {
                        if deps.intersects(changed) {
                            agg.borrow_mut().row_changed(parent, row);
                            self.change.change_field(*out);
                            touched = true;
                        }
                    }
                    _ => {}
                }
            }
            if touched {
                self.change.change_row_if_not_added(parent);
            }
        }
        self.fire_parent();
        let mut child_changed = changed.clone();
        if any_regrouped {
            child_changed.field_changed(self.child_gid_id);
        }
        self.child.notify_changes(rows, &child_changed);
    }

    fn rows_removed(&mut self, rows: &[RowId]) {
        for &row in rows {
            self.leave_group(row);
        }
        self.fire_parent();
        self.child.notify_removes(rows);
        let mut index = self.index.borrow_mut();
        for &row in rows {
            index.set_parent(row, None);
        }
    }
}

/// Builder for group-by operators.
pub struct GroupByBuilder {
    name: String,
    group_fn: Option<Box<dyn GroupFunction>>,
    selections: Vec<Selection>,
    child_group_field: String,
}

impl core::fmt::Debug for GroupByBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GroupByBuilder")
            .field("name", &self.name)
            .field("child_group_field", &self.child_group_field)
            .finish_non_exhaustive()
    }
}

impl GroupByBuilder {
    /// Creates a group-by builder.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            group_fn: None,
            selections: Vec::new(),
            child_group_field: String::from("GroupId"),
        })
    }

    /// Groups by one field's value.
    pub fn group_by_field(mut self, name: impl Into<String>) -> Self {
        self.group_fn = Some(Box::new(ValueGroupFunction::new(name)));
        self
    }

    /// Groups with a custom group function.
    pub fn group_function(mut self, group_fn: impl GroupFunction + 'static) -> Self {
        self.group_fn = Some(Box::new(group_fn));
        self
    }

    /// Forwards an inbound field to the parent output. Each member
    /// add/change writes through, so the last writer wins.
    pub fn forward(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        self.check_duplicate(&name)?;
        self.selections.push(Selection::Forward(name));
        Ok(self)
    }

    /// Appends an aggregated field to the parent output.
    pub fn aggregate(
        mut self,
        name: impl Into<String>,
        agg: impl AggregationFunction + 'static,
    ) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        self.check_duplicate(&name)?;
        self.selections
            .push(Selection::Aggregate(name, Rc::new(RefCell::new(agg))));
        Ok(self)
    }

    /// Appends a synthetic group-id field to the parent output.
    pub fn group_id_field(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        self.check_duplicate(&name)?;
        self.selections.push(Selection::GroupId(name));
        Ok(self)
    }

    /// Appends a synthetic member-count field to the parent output.
    pub fn count_field(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        self.check_duplicate(&name)?;
        self.selections.push(Selection::Count(name));
        Ok(self)
    }

    /// Renames the group-id field stamped onto the child output.
    pub fn child_group_id_field(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        self.child_group_field = name;
        Ok(self)
    }

    /// Builds the group-by, ready to attach to a source output.
    pub fn build(self) -> Result<Rc<RefCell<GroupBy>>> {
        let group_fn = self
            .group_fn
            .ok_or_else(|| Error::invalid_schema("GroupBy requires a group function"))?;
        if self.selections.is_empty() {
            return Err(Error::invalid_schema("GroupBy selects no parent fields"));
        }
        Ok(input_handle(GroupBy {
            name: self.name,
            parent: OutputManager::new(),
            child: OutputManager::new(),
            group_fn,
            group_deps: FieldBitSet::new(),
            index: Rc::new(RefCell::new(GroupIndex::default())),
            selections: self.selections,
            bound: Vec::new(),
            child_group_field: self.child_group_field,
            child_gid_id: 0,
            change: StateChangeSet::new(),
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
    use crate::cursor::RowReader;
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

    fn values_table() -> Table {
        TableBuilder::new("values")
            .unwrap()
            .add_field("Id", FieldType::Int32)
            .unwrap()
            .add_field("Value1", FieldType::Int32)
            .unwrap()
            .add_field("Value2", FieldType::Int32)
            .unwrap()
            .build()
            .unwrap()
    }

    fn add_row(table: &mut Table, id: i32, v1: i32, v2: i32) -> RowId {
        table.begin_add().unwrap();
        table.set_value_by_name("Id", Value::Int32(id)).unwrap();
        table.set_value_by_name("Value1", Value::Int32(v1)).unwrap();
        table.set_value_by_name("Value2", Value::Int32(v2)).unwrap();
        table.end_add().unwrap()
    }

    fn sum_count_group_by() -> Rc<RefCell<GroupBy>> {
        GroupByBuilder::new("by_value1")
            .unwrap()
            .group_by_field("Value1")
            .group_id_field("GroupId")
            .unwrap()
            .count_field("Count")
            .unwrap()
            .aggregate("Sum", SumAggregation::new("Value2"))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_incremental_sum_and_count() {
        let mut table = values_table();
        let group_by = sum_count_group_by();
        table.output().attach(group_by.clone());
        let recorder = input_handle(Recorder::default());
        group_by.borrow().output().attach(recorder.clone());

        add_row(&mut table, 10, 4, 10);
        table.fire_changes();
        let reader = RowReader::new(group_by.borrow().schema().unwrap());
        let parent = 0;
        assert_eq!(recorder.borrow().calls[1], "add:[0]");
        assert_eq!(reader.get(parent, "GroupId").unwrap(), Value::Int64(4));
        assert_eq!(reader.get(parent, "Count").unwrap(), Value::Int64(1));
        assert_eq!(reader.get(parent, "Sum").unwrap(), Value::Int64(10));

        add_row(&mut table, 11, 4, 17);
        table.fire_changes();
        // second member: parent change on Count and Sum
        assert_eq!(recorder.borrow().calls[2], "chg:[0]:[1, 2]");
        assert_eq!(reader.get(parent, "Count").unwrap(), Value::Int64(2));
        assert_eq!(reader.get(parent, "Sum").unwrap(), Value::Int64(27));
    }

    #[test]
    fn test_member_change_adjusts_aggregate() {
        let mut table = values_table();
        let group_by = sum_count_group_by();
        table.output().attach(group_by.clone());
        let recorder = input_handle(Recorder::default());
        group_by.borrow().output().attach(recorder.clone());

        let r0 = add_row(&mut table, 10, 4, 10);
        add_row(&mut table, 11, 4, 17);
        table.fire_changes();

        table.begin_change(r0).unwrap();
        table.set_value_by_name("Value2", Value::Int32(3)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();

        let reader = RowReader::new(group_by.borrow().schema().unwrap());
        assert_eq!(reader.get(0, "Sum").unwrap(), Value::Int64(20));
        assert_eq!(recorder.borrow().calls.last().unwrap(), "chg:[0]:[2]");
    }

    #[test]
    fn test_negative_group_values() {
        let mut table = values_table();
        let group_by = sum_count_group_by();
        table.output().attach(group_by.clone());
        let recorder = input_handle(Recorder::default());
        group_by.borrow().output().attach(recorder.clone());

        let r0 = add_row(&mut table, 10, -3, 10);
        add_row(&mut table, 11, -3, 7);
        add_row(&mut table, 12, 4, 1);
        table.fire_changes();

        assert_eq!(group_by.borrow().group_count(), 2);
        let reader = RowReader::new(group_by.borrow().schema().unwrap());
        assert_eq!(reader.get(0, "GroupId").unwrap(), Value::Int64(-3));
        assert_eq!(reader.get(0, "Count").unwrap(), Value::Int64(2));
        assert_eq!(reader.get(0, "Sum").unwrap(), Value::Int64(17));
        assert_eq!(reader.get(1, "GroupId").unwrap(), Value::Int64(4));

        // crossing zero is an ordinary regroup
        table.begin_change(r0).unwrap();
        table.set_value_by_name("Value1", Value::Int32(4)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();
        assert_eq!(reader.get(0, "Count").unwrap(), Value::Int64(1));
        assert_eq!(reader.get(1, "Count").unwrap(), Value::Int64(2));
        assert_eq!(reader.get(1, "Sum").unwrap(), Value::Int64(11));
    }

    #[test]
    fn test_change_outside_dependencies_is_silent() {
        let mut table = values_table();
        let group_by = sum_count_group_by();
        table.output().attach(group_by.clone());
        let recorder = input_handle(Recorder::default());
        group_by.borrow().output().attach(recorder.clone());

        let r0 = add_row(&mut table, 10, 4, 10);
        table.fire_changes();
        let calls_before = recorder.borrow().calls.len();

        table.begin_change(r0).unwrap();
        table.set_value_by_name("Id", Value::Int32(99)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();
        assert_eq!(recorder.borrow().calls.len(), calls_before);
    }

    #[test]
    fn test_regroup_moves_row_between_groups() {
        let mut table = values_table();
        let group_by = sum_count_group_by();
        table.output().attach(group_by.clone());
        let recorder = input_handle(Recorder::default());
        group_by.borrow().output().attach(recorder.clone());

        let r0 = add_row(&mut table, 10, 4, 10);
        add_row(&mut table, 11, 4, 17);
        add_row(&mut table, 12, 5, 1);
        table.fire_changes();
        assert_eq!(group_by.borrow().group_count(), 2);

        // r0 moves from group 4 to group 5
        table.begin_change(r0).unwrap();
        table.set_value_by_name("Value1", Value::Int32(5)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();

        let reader = RowReader::new(group_by.borrow().schema().unwrap());
        assert_eq!(reader.get(0, "Sum").unwrap(), Value::Int64(17));
        assert_eq!(reader.get(0, "Count").unwrap(), Value::Int64(1));
        assert_eq!(reader.get(1, "Sum").unwrap(), Value::Int64(11));
        assert_eq!(reader.get(1, "Count").unwrap(), Value::Int64(2));
    }

    #[test]
    fn test_last_member_removal_removes_group() {
        let mut table = values_table();
        let group_by = sum_count_group_by();
        table.output().attach(group_by.clone());
        let recorder = input_handle(Recorder::default());
        group_by.borrow().output().attach(recorder.clone());

        let r0 = add_row(&mut table, 10, 4, 10);
        table.fire_changes();
        table.remove(r0).unwrap();
        table.fire_changes();

        assert_eq!(recorder.borrow().calls.last().unwrap(), "rem:[0]");
        assert_eq!(group_by.borrow().group_count(), 0);

        // the parent row id is recycled for the next group
        add_row(&mut table, 13, 7, 2);
        table.fire_changes();
        let reader = RowReader::new(group_by.borrow().schema().unwrap());
        assert_eq!(reader.get(0, "GroupId").unwrap(), Value::Int64(7));
        assert_eq!(reader.get(0, "Sum").unwrap(), Value::Int64(2));
    }

    #[test]
    fn test_string_grouping_through_mapping() {
        let mut table = TableBuilder::new("trades")
            .unwrap()
            .add_field("Symbol", FieldType::String)
            .unwrap()
            .add_field("Quantity", FieldType::Int32)
            .unwrap()
            .build()
            .unwrap();
        let group_by = GroupByBuilder::new("by_symbol")
            .unwrap()
            .group_by_field("Symbol")
            .forward("Symbol")
            .unwrap()
            .aggregate("Total", SumAggregation::new("Quantity"))
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(group_by.clone());

        for (symbol, quantity) in [("AAPL", 10), ("MSFT", 5), ("AAPL", 7)] {
            table.begin_add().unwrap();
            table.set_value_by_name("Symbol", Value::from(symbol)).unwrap();
            table
                .set_value_by_name("Quantity", Value::Int32(quantity))
                .unwrap();
            table.end_add().unwrap();
        }
        table.fire_changes();

        assert_eq!(group_by.borrow().group_count(), 2);
        let reader = RowReader::new(group_by.borrow().schema().unwrap());
        assert_eq!(reader.get(0, "Symbol").unwrap(), Value::from("AAPL"));
        assert_eq!(reader.get(0, "Total").unwrap(), Value::Int64(17));
        assert_eq!(reader.get(1, "Symbol").unwrap(), Value::from("MSFT"));
        assert_eq!(reader.get(1, "Total").unwrap(), Value::Int64(5));
    }

    #[test]
    fn test_child_output_mirrors_rowspace() {
        let mut table = values_table();
        let group_by = sum_count_group_by();
        table.output().attach(group_by.clone());
        let recorder = input_handle(Recorder::default());
        group_by.borrow().child_output().attach(recorder.clone());

        let r0 = add_row(&mut table, 10, 4, 10);
        let r1 = add_row(&mut table, 11, 5, 17);
        table.fire_changes();
        assert_eq!(
            recorder.borrow().calls[1],
            format!("add:[{}, {}]", r0, r1)
        );

        let child = RowReader::new(group_by.borrow().child_output().schema().unwrap());
        assert_eq!(child.get(r0, "GroupId").unwrap(), Value::Int64(4));
        assert_eq!(child.get(r1, "GroupId").unwrap(), Value::Int64(5));
        assert_eq!(child.get(r0, "Value2").unwrap(), Value::Int32(10));

        // regrouping restamps the child row
        table.begin_change(r0).unwrap();
        table.set_value_by_name("Value1", Value::Int32(5)).unwrap();
        table.end_change().unwrap();
        table.fire_changes();
        assert_eq!(child.get(r0, "GroupId").unwrap(), Value::Int64(5));
        // the child change names Value1 and the group-id stamp
        assert_eq!(
            recorder.borrow().calls.last().unwrap(),
            &format!("chg:[{}]:[1, 3]", r0)
        );

        table.remove(r1).unwrap();
        table.fire_changes();
        assert_eq!(
            recorder.borrow().calls.last().unwrap(),
            &format!("rem:[{}]", r1)
        );
    }

    #[test]
    fn test_builder_validation() {
        assert!(GroupByBuilder::new("g")
            .unwrap()
            .count_field("Count")
            .unwrap()
            .build()
            .is_err()); // no group function
        assert!(GroupByBuilder::new("g")
            .unwrap()
            .group_by_field("x")
            .build()
            .is_err()); // no parent fields
        let err = GroupByBuilder::new("g")
            .unwrap()
            .group_by_field("x")
            .count_field("n")
            .unwrap()
            .count_field("n")
            .unwrap_err();
        assert_eq!(err, Error::duplicate_field("g", "n"));
    }
}
