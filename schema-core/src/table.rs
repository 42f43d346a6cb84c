//! Table descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a table in `(database, schema, name)` space.
///
/// An empty `database` means the default (unspecified) database. Two
/// descriptors denote the same table only when all three fields are equal,
/// compared case-sensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub schema: String,
    pub name: String,
}

/// Tagged view of a table's database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseRef<'a> {
    Default,
    Named(&'a str),
}

impl TableRef {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// A table in the default database.
    pub fn in_default(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(String::new(), schema, name)
    }

    pub fn database_ref(&self) -> DatabaseRef<'_> {
        if self.database.is_empty() {
            DatabaseRef::Default
        } else {
            DatabaseRef::Named(&self.database)
        }
    }

    pub fn is_default_database(&self) -> bool {
        self.database.is_empty()
    }

    pub fn matches(&self, database: &str, schema: &str, name: &str) -> bool {
        self.database == database && self.schema == schema && self.name == name
    }
}

/// Marker printed in place of the empty (default) database.
pub const DEFAULT_DATABASE_LABEL: &str = "<default>";

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let database = match self.database_ref() {
            DatabaseRef::Default => DEFAULT_DATABASE_LABEL,
            DatabaseRef::Named(name) => name,
        };
        write!(f, "{}.{}.{}", database, self.schema, self.name)
    }
}
