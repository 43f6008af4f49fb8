//! Incremental aggregation functions.
//!
//! An aggregation maintains one value per group and is driven by member
//! deltas: `row_added`, `row_changed` and `row_removed` adjust the group
//! accumulator without revisiting other members. To support change and
//! remove deltas, value-consuming aggregations cache each member row's
//! last contribution.

use alloc::string::String;
use alloc::vec::Vec;
use rowflow_core::schema::{Field, FieldResolver};
use rowflow_core::{FieldType, Result, RowId, Value};

/// One outbound field per group, maintained incrementally.
///
/// `group` arguments are the parent output row ids of the owning group-by,
/// dense and reused, so implementations index plain vectors by them.
pub trait AggregationFunction {
    /// The outbound type of the aggregated field. Valid after `bind`.
    fn field_type(&self) -> FieldType;

    /// Resolves the inbound fields the aggregation consumes.
    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()>;

    /// Drops the bound fields. Called on schema retraction and before a
    /// rebind.
    fn unbind(&mut self) {}

    /// Discards all accumulated state.
    fn reset(&mut self);

    /// A row joined the group.
    fn row_added(&mut self, group: RowId, row: RowId);

    /// A member row's consumed fields changed.
    fn row_changed(&mut self, group: RowId, row: RowId);

    /// A row left the group.
    fn row_removed(&mut self, group: RowId, row: RowId);

    /// The group was removed; its accumulator can be zeroed.
    fn group_removed(&mut self, group: RowId);

    /// Returns the current value for a group.
    fn group_value(&self, group: RowId) -> Value;
}

/// Sums one numeric inbound field per group.
///
/// Integer inputs accumulate in `i64` and produce an `Int64` field; float
/// inputs accumulate in `f64` and produce a `Float64` one. The split keeps
/// large integer sums exact instead of rounding through the float
/// mantissa.
pub struct SumAggregation {
    field_name: String,
    field: Option<Field>,
    output_type: FieldType,
    int_sums: Vec<i64>,
    int_contributions: Vec<i64>,
    float_sums: Vec<f64>,
    float_contributions: Vec<f64>,
}

impl SumAggregation {
    /// Creates a sum over the named field.
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            field: None,
            output_type: FieldType::Int64,
            int_sums: Vec::new(),
            int_contributions: Vec::new(),
            float_sums: Vec::new(),
            float_contributions: Vec::new(),
        }
    }

    fn read_int(&self, row: RowId) -> i64 {
        self.field
            .as_ref()
            .expect("aggregation bound before use")
            .value_at(row)
            .as_i64()
            .unwrap_or(0)
    }

    fn read_float(&self, row: RowId) -> f64 {
        self.field
            .as_ref()
            .expect("aggregation bound before use")
            .value_at(row)
            .as_f64()
            .unwrap_or(0.0)
    }

    fn slot_int(&mut self, group: RowId, row: RowId) {
        if group >= self.int_sums.len() {
            self.int_sums.resize(group + 1, 0);
        }
        if row >= self.int_contributions.len() {
            self.int_contributions.resize(row + 1, 0);
        }
    }

    fn slot_float(&mut self, group: RowId, row: RowId) {
        if group >= self.float_sums.len() {
            self.float_sums.resize(group + 1, 0.0);
        }
        if row >= self.float_contributions.len() {
            self.float_contributions.resize(row + 1, 0.0);
        }
    }

    fn is_float(&self) -> bool {
        self.output_type == FieldType::Float64
    }
}

impl AggregationFunction for SumAggregation {
    fn field_type(&self) -> FieldType {
        self.output_type
    }

    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()> {
        let field = resolver.get_field(&self.field_name)?;
        self.output_type = if field.field_type() == FieldType::Float64 {
            FieldType::Float64
        } else {
            FieldType::Int64
        };
        self.field = Some(field);
        Ok(())
    }

    fn unbind(&mut self) {
        self.field = None;
        self.reset();
    }

    fn reset(&mut self) {
        self.int_sums.clear();
        self.int_contributions.clear();
        self.float_sums.clear();
        self.float_contributions.clear();
    }

    fn row_added(&mut self, group: RowId, row: RowId) {
        if self.is_float() {
            self.slot_float(group, row);
            let c = self.read_float(row);
            self.float_sums[group] += c;
            self.float_contributions[row] = c;
        } else {
            self.slot_int(group, row);
            let c = self.read_int(row);
            self.int_sums[group] += c;
            self.int_contributions[row] = c;
        }
    }

    fn row_changed(&mut self, group: RowId, row: RowId) {
        if self.is_float() {
            self.slot_float(group, row);
            let c = self.read_float(row);
            self.float_sums[group] += c - self.float_contributions[row];
            self.float_contributions[row] = c;
        } else {
            self.slot_int(group, row);
            let c = self.read_int(row);
            self.int_sums[group] += c - self.int_contributions[row];
            self.int_contributions[row] = c;
        }
    }

    fn row_removed(&mut self, group: RowId, row: RowId) {
        if self.is_float() {
            self.slot_float(group, row);
            self.float_sums[group] -= self.float_contributions[row];
            self.float_contributions[row] = 0.0;
        } else {
            self.slot_int(group, row);
            self.int_sums[group] -= self.int_contributions[row];
            self.int_contributions[row] = 0;
        }
    }

    fn group_removed(&mut self, group: RowId) {
        if let Some(sum) = self.int_sums.get_mut(group) {
            *sum = 0;
        }
        if let Some(sum) = self.float_sums.get_mut(group) {
            *sum = 0.0;
        }
    }

    fn group_value(&self, group: RowId) -> Value {
        if self.is_float() {
            Value::Float64(self.float_sums.get(group).copied().unwrap_or(0.0))
        } else {
            Value::Int64(self.int_sums.get(group).copied().unwrap_or(0))
        }
    }
}

/// Averages one numeric inbound field per group. Always `Float64`.
pub struct AvgAggregation {
    field_name: String,
    field: Option<Field>,
    sums: Vec<f64>,
    counts: Vec<usize>,
    contributions: Vec<f64>,
}

impl AvgAggregation {
    /// Creates an average over the named field.
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            field: None,
            sums: Vec::new(),
            counts: Vec::new(),
            contributions: Vec::new(),
        }
    }

    fn read(&self, row: RowId) -> f64 {
        self.field
            .as_ref()
            .expect("aggregation bound before use")
            .value_at(row)
            .as_f64()
            .unwrap_or(0.0)
    }

    fn slot(&mut self, group: RowId, row: RowId) {
        if group >= self.sums.len() {
            self.sums.resize(group + 1, 0.0);
            self.counts.resize(group + 1, 0);
        }
        if row >= self.contributions.len() {
            self.contributions.resize(row + 1, 0.0);
        }
    }
}

impl AggregationFunction for AvgAggregation {
    fn field_type(&self) -> FieldType {
        FieldType::Float64
    }

    fn bind(&mut self, resolver: &mut FieldResolver<'_>) -> Result<()> {
        self.field = Some(resolver.get_field(&self.field_name)?);
        Ok(())
    }

    fn unbind(&mut self) {
        self.field = None;
        self.reset();
    }

    fn reset(&mut self) {
        self.sums.clear();
        self.counts.clear();
        self.contributions.clear();
    }

    fn row_added(&mut self, group: RowId, row: RowId) {
        self.slot(group, row);
        let c = self.read(row);
        self.sums[group] += c;
        self.counts[group] += 1;
        self.contributions[row] = c;
    }

    fn row_changed(&mut self, group: RowId, row: RowId) {
        self.slot(group, row);
        let c = self.read(row);
        self.sums[group] += c - self.contributions[row];
        self.contributions[row] = c;
    }

    fn row_removed(&mut self, group: RowId, row: RowId) {
        self.slot(group, row);
        self.sums[group] -= self.contributions[row];
        self.counts[group] -= 1;
        self.contributions[row] = 0.0;
    }

    fn group_removed(&mut self, group: RowId) {
        if group < self.sums.len() {
            self.sums[group] = 0.0;
            self.counts[group] = 0;
        }
    }

    fn group_value(&self, group: RowId) -> Value {
        let count = self.counts.get(group).copied().unwrap_or(0);
        if count == 0 {
            return Value::Float64(0.0);
        }
        Value::Float64(self.sums[group] / count as f64)
    }
}
