//! Document database driver shim.
//!
//! This module lets a SQL-shaped consumer drive a document database: queries
//! arrive as a small JSON DSL, are bound to positional arguments, optionally
//! resumed from a keyset cursor, and come back as row iterators.
//!
//! # Request Flow
//!
//! - **Parse**: [`parse`] turns DSL text into a [`DslQuery`]
//! - **Substitute**: [`substitute`] replaces `"$N"` placeholders with arguments
//! - **Seek**: [`build_seek_filter`] derives a strictly-after filter from a cursor
//! - **Execute**: [`Connection::execute`] runs the query and returns [`Rows`]
//!
//! Parsing, substitution and cursor handling are pure; only execution and
//! introspection touch the backend, and both honour a [`CancellationToken`].

pub mod conn;
pub mod cursor;
pub mod dsl;
pub mod introspect;
pub mod params;
pub mod rows;
pub mod store;

pub use conn::{open, Connection, Connector};
pub use cursor::{
    apply_cursor, apply_seek, build_seek_filter, build_seek_filter_across, normalize_cursor,
    try_build_seek_filter, ColumnKind, CursorInfo, Direction, OrderBy, SeekFilter,
};
pub use dsl::{parse, DslQuery, FindOptions, IntrospectOptions, Operation};
pub use introspect::{infer_columns, ColumnRecord, INTROSPECTION_COLUMNS};
pub use params::substitute;
pub use rows::{DocumentRows, Row, Rows, SingleValueRows, TabularRows, DOCUMENT_COLUMN};
pub use store::{DocumentStore, DocumentStream, MemoryStore};
#[cfg(feature = "mongodb")]
pub use store::MongoStore;
pub use tokio_util::sync::CancellationToken;
