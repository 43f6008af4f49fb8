//! Dependency-recording field resolution.
//!
//! Predicates and calculations bind to a schema through a `FieldResolver`.
//! Every successful lookup is recorded into a dependency bitset, which the
//! owning operator later intersects with inbound changed-field sets to
//! decide whether re-evaluation is required.
//!
//! Contract: during `bind`, a plugin must resolve every field it might ever
//! read. A field read through a handle that was never resolved here is
//! invisible to dependency tracking, and changes to it will not trigger
//! re-evaluation. This is a contract violation by the plugin, not a
//! detectable runtime error.

use super::field::Field;
use super::schema::Schema;
use crate::bitset::FieldBitSet;
use crate::error::Result;

/// Resolves fields by name against a schema, recording each resolution as
/// a dependency.
pub struct FieldResolver<'a> {
    schema: &'a Schema,
    dependencies: &'a mut FieldBitSet,
}

impl<'a> FieldResolver<'a> {
    /// Creates a resolver over a schema, recording into `dependencies`.
    pub fn new(schema: &'a Schema, dependencies: &'a mut FieldBitSet) -> Self {
        Self {
            schema,
            dependencies,
        }
    }

    /// Returns the name of the schema being resolved against.
    pub fn schema_name(&self) -> &str {
        self.schema.name()
    }

    /// Resolves a field, recording the dependency on success.
    pub fn find_field(&mut self, name: &str) -> Option<Field> {
        let schema_field = self.schema.maybe_field(name)?;
        self.dependencies.field_changed(schema_field.id());
        Some(schema_field.field().clone())
    }

    /// Resolves a field, recording the dependency; missing names are a
    /// schema-consistency error.
    pub fn get_field(&mut self, name: &str) -> Result<Field> {
        let schema_field = self.schema.field(name)?;
        self.dependencies.field_changed(schema_field.id());
        Ok(schema_field.field().clone())
    }
}
