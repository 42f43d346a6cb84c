//! Document store backends.
//!
//! The execution adapter talks to a document database only through the
//! [`DocumentStore`] trait. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: in-process collections, used for tests and seeded demos
//! - `MongoStore` (feature `mongodb`): the official MongoDB driver

pub mod eval;
mod memory;
#[cfg(feature = "mongodb")]
mod mongo;

pub use memory::MemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;

use bson::Document;
use futures::stream::BoxStream;

pub use super::dsl::FindOptions;
use crate::error::DriverResult;

/// Documents from an open backend cursor. Dropping the stream releases it.
pub type DocumentStream = BoxStream<'static, DriverResult<Document>>;

/// Trait for backends the driver can execute against.
///
/// Implementations must be shareable across tasks; each returned stream is
/// consumed by a single reader.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check that the backend is reachable.
    async fn ping(&self) -> DriverResult<()> {
        Ok(())
    }

    /// Collection names in `database`, sorted.
    async fn list_collections(&self, database: &str) -> DriverResult<Vec<String>>;

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DriverResult<DocumentStream>;

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<DocumentStream>;

    /// Up to `size` documents from `collection`, used for introspection.
    async fn sample(
        &self,
        database: &str,
        collection: &str,
        size: usize,
    ) -> DriverResult<Vec<Document>>;
}
