//! Row iterators returned by the execution adapter.
//!
//! Every variant exposes the same surface: `columns`, `next` and `close`.
//! `close` is idempotent and releases the backend cursor the first time it
//! runs; `next` after `close` or after the end of the stream returns `None`.

use std::collections::VecDeque;
use std::future::Future;

use bson::{Bson, Document};
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::store::DocumentStream;
use crate::error::{DriverError, DriverResult};

/// Column name of document and single-value rows.
pub const DOCUMENT_COLUMN: &str = "json";

pub type Row = Vec<Value>;

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> DriverResult<T>
where
    F: Future<Output = DriverResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DriverError::Cancelled),
        res = fut => res,
    }
}

/// Render a document as relaxed extended JSON.
pub fn document_to_json(doc: Document) -> Value {
    Bson::Document(doc).into_relaxed_extjson()
}

pub enum Rows {
    Documents(DocumentRows),
    SingleValue(SingleValueRows),
    Tabular(TabularRows),
}

impl Rows {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Rows::Documents(_) | Rows::SingleValue(_) => vec![DOCUMENT_COLUMN],
            Rows::Tabular(t) => t.columns.iter().map(String::as_str).collect(),
        }
    }

    pub async fn next(&mut self) -> DriverResult<Option<Row>> {
        match self {
            Rows::Documents(r) => r.next().await,
            Rows::SingleValue(r) => Ok(r.next()),
            Rows::Tabular(r) => Ok(r.next()),
        }
    }

    pub fn close(&mut self) {
        match self {
            Rows::Documents(r) => r.close(),
            Rows::SingleValue(r) => r.close(),
            Rows::Tabular(r) => r.close(),
        }
    }

    /// Drain the remaining rows and close.
    pub async fn collect(mut self) -> DriverResult<Vec<Row>> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await? {
            out.push(row);
        }
        self.close();
        Ok(out)
    }
}

enum Step {
    Cancelled,
    Item(Option<DriverResult<Document>>),
}

/// One JSON-serialized document per row, read from a backend cursor.
pub struct DocumentRows {
    collection: String,
    stream: Option<DocumentStream>,
    cancel: CancellationToken,
}

impl DocumentRows {
    pub fn new(collection: impl Into<String>, stream: DocumentStream, cancel: CancellationToken) -> Self {
        Self {
            collection: collection.into(),
            stream: Some(stream),
            cancel,
        }
    }

    /// Next document as JSON, before it is serialized into a row.
    pub async fn next_document(&mut self) -> DriverResult<Option<Value>> {
        let step = {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            let cancel = &self.cancel;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                item = stream.next() => Step::Item(item),
            }
        };

        match step {
            Step::Cancelled => {
                self.close();
                Err(DriverError::Cancelled)
            }
            Step::Item(None) => {
                self.close();
                Ok(None)
            }
            Step::Item(Some(Err(e))) => {
                tracing::warn!("Cursor on {} failed: {}", self.collection, e);
                self.close();
                Err(e)
            }
            Step::Item(Some(Ok(doc))) => Ok(Some(document_to_json(doc))),
        }
    }

    pub async fn next(&mut self) -> DriverResult<Option<Row>> {
        match self.next_document().await? {
            Some(doc) => Ok(Some(vec![Value::String(serde_json::to_string(&doc)?)])),
            None => Ok(None),
        }
    }

    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("Released cursor on {}", self.collection);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

/// Exactly one row carrying a pre-aggregated JSON payload.
pub struct SingleValueRows {
    payload: Option<String>,
}

impl SingleValueRows {
    pub fn new(payload: &Value) -> DriverResult<Self> {
        Ok(Self {
            payload: Some(serde_json::to_string(payload)?),
        })
    }

    pub fn next(&mut self) -> Option<Row> {
        self.payload.take().map(|p| vec![Value::String(p)])
    }

    pub fn close(&mut self) {
        self.payload = None;
    }
}

/// Named columns with heterogeneous values.
pub struct TabularRows {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

impl TabularRows {
    pub fn new<I, S>(columns: I, rows: Vec<Row>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: rows.into(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn next(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    pub fn close(&mut self) {
        self.rows.clear();
    }
}
