//! Field type definitions for the rowflow engine.
//!
//! This module defines the logical types a schema field can carry.

/// Supported field types in a rowflow schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Boolean type (true/false)
    Bool,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 64-bit floating point number
    Float64,
    /// UTF-8 string
    String,
}

impl FieldType {
    /// Returns whether this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int32 | FieldType::Int64 | FieldType::Float64)
    }

    /// Returns a short lowercase name for the type, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float64 => "float64",
            FieldType::String => "string",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_equality() {
        assert_eq!(FieldType::Int32, FieldType::Int32);
        assert_ne!(FieldType::Int32, FieldType::Int64);
    }

    #[test]
    fn test_numeric() {
        assert!(FieldType::Int32.is_numeric());
        assert!(FieldType::Int64.is_numeric());
        assert!(FieldType::Float64.is_numeric());
        assert!(!FieldType::Bool.is_numeric());
        assert!(!FieldType::String.is_numeric());
    }

    #[test]
    fn test_name() {
        assert_eq!(FieldType::Bool.name(), "bool");
        assert_eq!(FieldType::Float64.name(), "float64");
    }
}
