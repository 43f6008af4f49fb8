//! rowflow-core - Schema model and bookkeeping primitives for the rowflow
//! incremental dataflow engine.
//!
//! This crate provides the foundational types shared by all operators:
//!
//! - `FieldType` / `Value`: the logical type system and runtime values
//! - `schema`: field descriptors, schemas, writable stores, dependency
//!   resolution and field-id translation
//! - `FieldBitSet`: changed-field and dependency bitsets
//! - `RowAllocator` / `IndexedRowSet` / `OneToMany`: dense row-index
//!   structures with free-list reuse
//! - `Error`: error types for building and binding dataflow components
//!
//! # Example
//!
//! ```rust
//! use rowflow_core::schema::{FieldDescriptor, FieldStore, SchemaBuilder};
//! use rowflow_core::{FieldType, Value};
//!
//! let store = FieldStore::new(FieldType::Int64);
//! let schema = SchemaBuilder::new("orders")
//!     .add_field(FieldDescriptor::new("Qty", FieldType::Int64), store.as_field())
//!     .build()
//!     .unwrap();
//!
//! store.set_value_at(0, Value::Int64(5));
//! assert_eq!(schema.field("Qty").unwrap().field().value_at(0), Value::Int64(5));
//! ```

#![no_std]

extern crate alloc;

mod bitset;
mod error;
mod rows;
pub mod schema;
mod types;
mod value;

pub use bitset::{BitSet, FieldBitSet};
pub use error::{Error, Result};
pub use rows::{FieldId, IndexedRowSet, OneToMany, RowAllocator, RowId};
pub use types::FieldType;
pub use value::Value;
