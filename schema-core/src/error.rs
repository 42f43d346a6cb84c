//! Error types for graphjin-schema.
//!
//! Kept free of driver dependencies so planners can use the model on its own.

use thiserror::Error;

/// Schema model error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table not registered: {0}")]
    UnknownTable(String),

    #[error("Table already registered: {0}")]
    DuplicateTable(String),
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

impl serde::Serialize for SchemaError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
