//! Connector, connection and the execution adapter.

use std::sync::Arc;

use bson::{doc, Document};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::cursor::apply_cursor;
use super::dsl::{parse, DslQuery, FindOptions, Operation, DEFAULT_SAMPLE_SIZE};
use super::introspect::introspect;
use super::params::substitute;
use super::rows::{cancellable, DocumentRows, Rows, SingleValueRows};
use super::store::DocumentStore;
use crate::error::{DriverError, DriverResult};

/// Factory for connections to one database of a document store.
///
/// Establishing a connection is serialized; the connections it hands out can
/// be used concurrently.
pub struct Connector {
    store: Arc<dyn DocumentStore>,
    database: String,
    sample_size: usize,
    connect_lock: Mutex<()>,
}

impl Connector {
    pub fn new(store: Arc<dyn DocumentStore>, database: impl Into<String>) -> Self {
        Self {
            store,
            database: database.into(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            connect_lock: Mutex::new(()),
        }
    }

    /// Sample size used by introspection when the query does not set one.
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(1);
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Check the backend is reachable and return a connection.
    pub async fn connect(&self, cancel: &CancellationToken) -> DriverResult<Connection> {
        let _guard = self.connect_lock.lock().await;
        cancellable(cancel, self.store.ping()).await?;
        tracing::info!("Connected to document database '{}'", self.database);
        Ok(Connection::open(Arc::clone(&self.store), self.database.clone())
            .with_sample_size(self.sample_size))
    }
}

/// Open a connection without a reachability check.
pub fn open(store: Arc<dyn DocumentStore>, database: impl Into<String>) -> Connection {
    Connection::open(store, database)
}

#[derive(Clone)]
pub struct Connection {
    store: Arc<dyn DocumentStore>,
    database: String,
    sample_size: usize,
}

impl Connection {
    pub fn open(store: Arc<dyn DocumentStore>, database: impl Into<String>) -> Self {
        Self {
            store,
            database: database.into(),
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(1);
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Parse, substitute and execute DSL text.
    pub async fn query(
        &self,
        text: &str,
        args: &[Value],
        cancel: &CancellationToken,
    ) -> DriverResult<Rows> {
        let query = substitute(&parse(text)?, args)?;
        self.execute(&query, cancel).await
    }

    /// Execute a substituted query.
    ///
    /// When the query carries `cursor_info` and a usable `cursor`, the seek
    /// filter is spliced in first.
    pub async fn execute(&self, query: &DslQuery, cancel: &CancellationToken) -> DriverResult<Rows> {
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        query.validate()?;

        let mut query = query.clone();
        if apply_cursor(&mut query) {
            tracing::debug!(
                "Resuming {} on {} after cursor",
                query.operation,
                query.collection_name()
            );
        }

        match query.operation {
            Operation::Find => {
                let filter = query.filter_document()?;
                let mut options = query.find_options()?;
                if options.sort.is_none() {
                    if let Some(info) = query.cursor_info.as_ref().filter(|i| !i.order_by.is_empty()) {
                        options.sort = Some(info.sort_document());
                    }
                }
                let collection = query.collection_name();
                let stream = cancellable(
                    cancel,
                    self.store.find(&self.database, collection, filter, options),
                )
                .await?;
                Ok(Rows::Documents(DocumentRows::new(collection, stream, cancel.clone())))
            }
            Operation::Aggregate => {
                let mut pipeline = query.pipeline_documents()?;
                pipeline.extend(option_stages(query.find_options()?));
                let collection = query.collection_name();
                let stream = cancellable(
                    cancel,
                    self.store.aggregate(&self.database, collection, pipeline),
                )
                .await?;
                Ok(Rows::Documents(DocumentRows::new(collection, stream, cancel.clone())))
            }
            Operation::IntrospectColumns => {
                let mut options = query.introspect_options()?;
                if !query.options.contains_key("sample_size") {
                    options.sample_size = self.sample_size;
                }
                let rows = introspect(self.store.as_ref(), &self.database, &options, cancel).await?;
                Ok(Rows::Tabular(rows))
            }
        }
    }

    /// Execute and fold document rows into one single-value row holding the
    /// JSON array of results. Tabular results are returned unchanged.
    pub async fn execute_single(
        &self,
        query: &DslQuery,
        cancel: &CancellationToken,
    ) -> DriverResult<Rows> {
        match self.execute(query, cancel).await? {
            Rows::Documents(mut rows) => {
                let mut docs = Vec::new();
                while let Some(doc) = rows.next_document().await? {
                    docs.push(doc);
                }
                rows.close();
                Ok(Rows::SingleValue(SingleValueRows::new(&Value::Array(docs))?))
            }
            other => Ok(other),
        }
    }
}

/// `find`-style options expressed as trailing aggregate stages.
fn option_stages(options: FindOptions) -> Vec<Document> {
    let mut stages = Vec::new();
    if let Some(sort) = options.sort {
        stages.push(doc! {"$sort": sort});
    }
    if let Some(skip) = options.skip {
        stages.push(doc! {"$skip": i64::try_from(skip).unwrap_or(i64::MAX)});
    }
    if let Some(limit) = options.limit.map(i64::abs).filter(|n| *n > 0) {
        stages.push(doc! {"$limit": limit});
    }
    if let Some(projection) = options.projection {
        stages.push(doc! {"$project": projection});
    }
    stages
}
