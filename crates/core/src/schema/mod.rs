//! Schema model: fields, descriptors, schemas and field-id translation.

mod field;
mod mapping;
mod resolver;
#[allow(clippy::module_inception)]
mod schema;

pub use field::{Field, FieldDescriptor, FieldSource, FieldStore, Metadata};
pub use mapping::FieldMapping;
pub use resolver::FieldResolver;
pub use schema::{Schema, SchemaBuilder, SchemaField, SchemaRef};
