pub mod config;
pub mod driver;
pub mod error;

pub use config::Config;
pub use driver::{
    build_seek_filter, normalize_cursor, open, parse, substitute, CancellationToken, Connection,
    Connector, CursorInfo, DocumentStore, DslQuery, MemoryStore, Rows,
};
pub use error::{DriverError, DriverResult, ErrorKind};
pub use graphjin_schema as schema;
