//! Error types for the rowflow engine.

use crate::types::FieldType;
use alloc::string::String;
use core::fmt;

/// Result type alias for rowflow operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for building and binding dataflow components.
///
/// Protocol misuse (for example notifying rows before a schema exists) is a
/// programmer error and panics instead of returning one of these variants.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// A field name appears more than once in a schema.
    DuplicateField {
        schema: String,
        field: String,
    },
    /// A field name is not present in the schema it was resolved against.
    FieldNotFound {
        schema: String,
        field: String,
    },
    /// Invalid schema or builder configuration.
    InvalidSchema {
        message: String,
    },
    /// A key value is already present in a keyed table.
    DuplicateKey {
        table: String,
    },
    /// A row or key was not found.
    RowNotFound {
        table: String,
    },
    /// A mutation call that does not fit the current table state.
    InvalidOperation {
        message: String,
    },
    /// A value written to a field of an incompatible type.
    TypeMismatch {
        expected: FieldType,
        got: FieldType,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateField { schema, field } => {
                write!(f, "Duplicate field {} in schema {}", field, schema)
            }
            Error::FieldNotFound { schema, field } => {
                write!(f, "Field {} not found in schema {}", field, schema)
            }
            Error::InvalidSchema { message } => {
                write!(f, "Invalid schema: {}", message)
            }
            Error::DuplicateKey { table } => {
                write!(f, "Duplicate key in table {}", table)
            }
            Error::RowNotFound { table } => {
                write!(f, "Row not found in table {}", table)
            }
            Error::InvalidOperation { message } => {
                write!(f, "Invalid operation: {}", message)
            }
            Error::TypeMismatch { expected, got } => {
                write!(f, "Type mismatch: expected {}, got {}", expected.name(), got.name())
            }
        }
    }
}

impl Error {
    /// Creates a duplicate field error.
    pub fn duplicate_field(schema: impl Into<String>, field: impl Into<String>) -> Self {
        Error::DuplicateField {
            schema: schema.into(),
            field: field.into(),
        }
    }

    /// Creates a field not found error.
    pub fn field_not_found(schema: impl Into<String>, field: impl Into<String>) -> Self {
        Error::FieldNotFound {
            schema: schema.into(),
            field: field.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a duplicate key error.
    pub fn duplicate_key(table: impl Into<String>) -> Self {
        Error::DuplicateKey {
            table: table.into(),
        }
    }

    /// Creates a row not found error.
    pub fn row_not_found(table: impl Into<String>) -> Self {
        Error::RowNotFound {
            table: table.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: FieldType, got: FieldType) -> Self {
        Error::TypeMismatch { expected, got }
    }
}
