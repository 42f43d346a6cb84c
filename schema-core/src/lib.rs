//! GraphJin schema core - backend-independent table and relation model.
//!
//! This crate describes the tables a gateway can see across several databases
//! and the directed relations between them. Query planners read it to decide how
//! to stitch a selection together; the document driver reads it to decide
//! whether a keyset cursor can be carried across a join.
//!
//! # Main Components
//!
//! - **TableRef**: identifies a table in `(database, schema, name)` space
//! - **Relation**: a directed edge between two tables, tagged with a [`RelKind`]
//! - **SchemaCatalog**: an immutable bag of tables plus the relation multi-graph
//! - **SchemaStore**: publishes catalog snapshots so reloads are atomic for readers
//!
//! # Example
//!
//! ```rust
//! use graphjin_schema::{Relation, RelKind, RelSide, TableRef};
//!
//! let users = TableRef::new("main", "public", "users");
//! let events = TableRef::new("analytics", "public", "events");
//!
//! let rel = Relation::new(
//!     RelKind::DatabaseJoin,
//!     RelSide::new(users, ["id"]),
//!     RelSide::new(events, ["user_id"]),
//! );
//! assert!(rel.is_cross_database());
//! ```

pub mod catalog;
pub mod error;
pub mod relation;
pub mod table;

pub use catalog::{CatalogBuilder, ColumnDef, SchemaCatalog, SchemaStore, TableEntry};
pub use error::{SchemaError, SchemaResult};
pub use relation::{is_cross_database, RelKind, RelSide, Relation};
pub use table::{DatabaseRef, TableRef};
