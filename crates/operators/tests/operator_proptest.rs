//! Property-based tests for operator state maintenance.
//!
//! These drive operators with randomly generated mutation sequences and
//! compare the resulting rowspaces against simple recomputed models.

use proptest::prelude::*;
use rowflow_core::{FieldType, RowId, Value};
use rowflow_operators::{
    FilterBuilder, GroupByBuilder, JoinBuilder, RowReader, SumAggregation, Table,
    TableBuilder, ValuePredicate,
};
use std::collections::HashMap;

/// One random table mutation: 0 = add, 1 = change, 2 = remove.
fn ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<(u8, i32)>> {
    prop::collection::vec((0u8..3, -100i32..100), 1..max_ops)
}

fn value_table() -> Table {
    TableBuilder::new("values")
        .unwrap()
        .add_field("V", FieldType::Int32)
        .unwrap()
        .build()
        .unwrap()
}

/// Applies one mutation against the table, keeping the model in sync.
fn apply(
    table: &mut Table,
    op: u8,
    v: i32,
    live: &mut Vec<RowId>,
    model: &mut HashMap<RowId, i32>,
) {
    match op {
        0 => {
            table.begin_add().unwrap();
            table.set_value_by_name("V", Value::Int32(v)).unwrap();
            let row = table.end_add().unwrap();
            live.push(row);
            model.insert(row, v);
        }
        1 if !live.is_empty() => {
            let row = live[v.unsigned_abs() as usize % live.len()];
            table.begin_change(row).unwrap();
            table.set_value_by_name("V", Value::Int32(v)).unwrap();
            table.end_change().unwrap();
            model.insert(row, v);
        }
        2 if !live.is_empty() => {
            let idx = v.unsigned_abs() as usize % live.len();
            let row = live.swap_remove(idx);
            table.remove(row).unwrap();
            model.remove(&row);
        }
        _ => {}
    }
}

proptest! {
    /// The filter's visible rowspace is exactly the live rows passing the
    /// predicate, whatever the mutation order.
    #[test]
    fn filter_rowspace_matches_model(ops in ops_strategy(60)) {
        let mut table = value_table();
        let filter = FilterBuilder::new("non_negative")
            .unwrap()
            .predicate(ValuePredicate::new("V", |v| v.as_i32().unwrap_or(0) >= 0))
            .build()
            .unwrap();
        table.output().attach(filter.clone());

        let mut live = vec![];
        let mut model = HashMap::new();
        for (op, v) in ops {
            apply(&mut table, op, v, &mut live, &mut model);
            table.fire_changes();
        }

        let mut expected: Vec<i32> = model.values().copied().filter(|v| *v >= 0).collect();
        expected.sort_unstable();

        let reader = RowReader::new(filter.borrow().schema().unwrap());
        let output = filter.borrow().output();
        let mut actual = vec![];
        output.for_each_row(|row| {
            actual.push(reader.get(row, "V").unwrap().as_i32().unwrap());
        });
        actual.sort_unstable();
        prop_assert_eq!(actual, expected);
    }

    /// Group counts always sum to the live row count, and per-group sums
    /// match a recomputed model.
    #[test]
    fn group_by_conserves_rows_and_sums(
        ops in prop::collection::vec((0u8..3, -5i32..5, -50i32..50), 1..60),
    ) {
        let mut table = TableBuilder::new("values")
            .unwrap()
            .add_field("Key", FieldType::Int32)
            .unwrap()
            .add_field("Amount", FieldType::Int32)
            .unwrap()
            .build()
            .unwrap();
        let group_by = GroupByBuilder::new("by_key")
            .unwrap()
            .group_by_field("Key")
            .group_id_field("GroupId")
            .unwrap()
            .count_field("Count")
            .unwrap()
            .aggregate("Sum", SumAggregation::new("Amount"))
            .unwrap()
            .build()
            .unwrap();
        table.output().attach(group_by.clone());

        let mut live: Vec<RowId> = vec![];
        let mut model: HashMap<RowId, (i32, i32)> = HashMap::new();
        for (op, key, amount) in ops {
            match op {
                0 => {
                    table.begin_add().unwrap();
                    table.set_value_by_name("Key", Value::Int32(key)).unwrap();
                    table.set_value_by_name("Amount", Value::Int32(amount)).unwrap();
                    let row = table.end_add().unwrap();
                    live.push(row);
                    model.insert(row, (key, amount));
                }
                1 if !live.is_empty() => {
                    // may move the row between groups and adjust its amount
                    let row = live[key.unsigned_abs() as usize % live.len()];
                    table.begin_change(row).unwrap();
                    table.set_value_by_name("Key", Value::Int32(key)).unwrap();
                    table.set_value_by_name("Amount", Value::Int32(amount)).unwrap();
                    table.end_change().unwrap();
                    model.insert(row, (key, amount));
                }
                2 if !live.is_empty() => {
                    let idx = amount.unsigned_abs() as usize % live.len();
                    let row = live.swap_remove(idx);
                    table.remove(row).unwrap();
                    model.remove(&row);
                }
                _ => {}
            }
            table.fire_changes();
        }

        let mut expected: HashMap<i64, (i64, i64)> = HashMap::new();
        for (key, amount) in model.values() {
            let entry = expected.entry(*key as i64).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += *amount as i64;
        }

        let reader = RowReader::new(group_by.borrow().schema().unwrap());
        let output = group_by.borrow().output();
        let mut actual: HashMap<i64, (i64, i64)> = HashMap::new();
        let mut total = 0i64;
        output.for_each_row(|row| {
            let gid = reader.get(row, "GroupId").unwrap().as_i64().unwrap();
            let count = reader.get(row, "Count").unwrap().as_i64().unwrap();
            let sum = reader.get(row, "Sum").unwrap().as_i64().unwrap();
            actual.insert(gid, (count, sum));
            total += count;
        });
        prop_assert_eq!(total as usize, model.len());
        prop_assert_eq!(actual, expected);
    }

    /// An inner join holds exactly one row per (left, right) key match.
    #[test]
    fn inner_join_matches_cross_product_per_key(
        left_keys in prop::collection::vec(0i32..4, 0..25),
        right_keys in prop::collection::vec(0i32..4, 0..25),
        removals in 0usize..10,
    ) {
        let mut left = TableBuilder::new("left")
            .unwrap()
            .add_field("K", FieldType::Int32)
            .unwrap()
            .build()
            .unwrap();
        let mut right = TableBuilder::new("right")
            .unwrap()
            .add_field("K", FieldType::Int32)
            .unwrap()
            .build()
            .unwrap();
        let join = JoinBuilder::new("j").unwrap().key("K").build().unwrap();
        left.output().attach(join.left_input());
        right.output().attach(join.right_input());

        let mut left_rows = vec![];
        for key in &left_keys {
            left.begin_add().unwrap();
            left.set_value_by_name("K", Value::Int32(*key)).unwrap();
            left_rows.push((left.end_add().unwrap(), *key));
            left.fire_changes();
        }
        for key in &right_keys {
            right.begin_add().unwrap();
            right.set_value_by_name("K", Value::Int32(*key)).unwrap();
            right.end_add().unwrap();
            right.fire_changes();
        }

        // retract a prefix of the left rows again
        let removals = removals.min(left_rows.len());
        for (row, _) in left_rows.drain(..removals) {
            left.remove(row).unwrap();
            left.fire_changes();
        }

        let mut left_counts = HashMap::new();
        for (_, key) in &left_rows {
            *left_counts.entry(*key).or_insert(0usize) += 1;
        }
        let mut expected = 0usize;
        for key in &right_keys {
            expected += left_counts.get(key).copied().unwrap_or(0);
        }
        prop_assert_eq!(join.row_count(), expected);
    }
}
