//! rowflow-operators - Relational operators for the rowflow incremental
//! dataflow engine.
//!
//! Every operator is a [`FlowInput`](rowflow_dataflow::FlowInput) on its
//! inbound side and an `OutputManager` on its outbound side, so operators
//! compose into graphs by attaching outputs to inputs:
//!
//! - `Table`: the mutable source; batched writes, optional unique key
//! - `Filter`: predicate over rows, hot-swappable, dependency-aware
//! - `Projection`: field selection, renaming and calculated fields
//! - `GroupBy`: incremental grouping with pluggable aggregations and a
//!   parent/child output pair
//! - `Union`: disjoint multiplexing of many inputs into one rowspace
//! - `Join`: inner or left-outer equi-join of two inputs
//!
//! # Example
//!
//! ```rust
//! use rowflow_core::{FieldType, Value};
//! use rowflow_operators::{FilterBuilder, TableBuilder, ValuePredicate};
//!
//! let mut orders = TableBuilder::new("orders").unwrap()
//!     .add_field("Quantity", FieldType::Int32).unwrap()
//!     .build().unwrap();
//! let filter = FilterBuilder::new("large_orders").unwrap()
//!     .predicate(ValuePredicate::new("Quantity", |v| {
//!         v.as_i32().unwrap_or(0) >= 100
//!     }))
//!     .build().unwrap();
//! orders.output().attach(filter.clone());
//!
//! orders.begin_add().unwrap();
//! orders.set_value_by_name("Quantity", Value::Int32(250)).unwrap();
//! orders.end_add().unwrap();
//! orders.fire_changes();
//! assert_eq!(filter.borrow().row_count(), 1);
//! ```

#![no_std]

extern crate alloc;

mod cursor;
mod filter;
pub mod groupby;
mod join;
mod projection;
mod table;
mod union;

pub use cursor::{RowReader, RowWriter};
pub use filter::{Filter, FilterBuilder, RowPredicate, ValuePredicate};
pub use groupby::{
    AggregationFunction, AvgAggregation, GroupBy, GroupByBuilder, GroupFunction,
    SumAggregation, ValueGroupFunction,
};
pub use join::{Join, JoinBuilder, JoinMode, JoinPort, NameCollision};
pub use projection::{
    FieldOrdering, Projection, ProjectionBuilder, RowCalculation, ValueCalculation,
};
pub use table::{Table, TableBuilder};
pub use union::{Union, UnionBuilder, UnionPort};
