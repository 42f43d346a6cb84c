use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bson::{Bson, Document};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;

use super::eval::{matches, project, sort_documents};
use super::{DocumentStore, DocumentStream, FindOptions};
use crate::driver::dsl::to_document;
use crate::error::{DriverError, DriverResult};

type Collections = BTreeMap<String, Vec<Document>>;

/// In-memory document store.
///
/// Collections keep insertion order. Open cursors are counted so callers can
/// check that every cursor handed out was released.
#[derive(Default)]
pub struct MemoryStore {
    databases: RwLock<HashMap<String, Collections>>,
    cursors: Arc<CursorCounters>,
}

#[derive(Default)]
struct CursorCounters {
    open: AtomicUsize,
    released: AtomicUsize,
}

struct CursorGuard(Arc<CursorCounters>);

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a seed object `{collection: [documents…]}`.
    /// Extended JSON (`{"$oid": …}`, `{"$date": …}`) is accepted.
    pub fn from_seed(database: &str, seed: &Value) -> DriverResult<Self> {
        let store = Self::new();
        store.load_seed(database, seed)?;
        Ok(store)
    }

    pub fn load_seed(&self, database: &str, seed: &Value) -> DriverResult<()> {
        let Value::Object(collections) = seed else {
            return Err(DriverError::MalformedInput(
                "seed must map collection names to document arrays".to_string(),
            ));
        };
        for (name, docs) in collections {
            let Value::Array(docs) = docs else {
                return Err(DriverError::MalformedInput(format!(
                    "seed collection '{}' must be an array",
                    name
                )));
            };
            self.create_collection(database, name);
            for doc in docs {
                let Value::Object(map) = doc else {
                    return Err(DriverError::MalformedInput(format!(
                        "seed collection '{}' contains a non-object",
                        name
                    )));
                };
                self.insert(database, name, to_document(map)?);
            }
            tracing::debug!("Seeded {}.{} with {} documents", database, name, docs.len());
        }
        Ok(())
    }

    pub fn create_collection(&self, database: &str, collection: &str) {
        self.databases
            .write()
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
    }

    pub fn insert(&self, database: &str, collection: &str, doc: Document) {
        self.databases
            .write()
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    pub fn insert_many(
        &self,
        database: &str,
        collection: &str,
        docs: impl IntoIterator<Item = Document>,
    ) {
        let mut dbs = self.databases.write();
        dbs.entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
    }

    /// Cursors handed out and not yet dropped.
    pub fn open_cursors(&self) -> usize {
        self.cursors.open.load(Ordering::SeqCst)
    }

    /// Cursors released so far.
    pub fn released_cursors(&self) -> usize {
        self.cursors.released.load(Ordering::SeqCst)
    }

    fn snapshot(&self, database: &str, collection: &str) -> Vec<Document> {
        self.databases
            .read()
            .get(database)
            .and_then(|c| c.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    fn cursor(&self, docs: Vec<Document>) -> DocumentStream {
        self.cursors.open.fetch_add(1, Ordering::SeqCst);
        let guard = CursorGuard(Arc::clone(&self.cursors));
        stream::iter(docs)
            .map(move |doc| {
                let _held = &guard;
                Ok(doc)
            })
            .boxed()
    }
}

fn as_count(stage: &str, value: &Bson) -> DriverResult<usize> {
    let n = match value {
        Bson::Int32(n) => *n as i64,
        Bson::Int64(n) => *n,
        Bson::Double(n) if n.fract() == 0.0 => *n as i64,
        _ => -1,
    };
    usize::try_from(n)
        .map_err(|_| DriverError::backend_msg(format!("{} needs a non-negative integer", stage)))
}

fn run_stage(docs: Vec<Document>, stage: &Document) -> DriverResult<Vec<Document>> {
    let mut entries = stage.iter();
    let (name, arg) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(DriverError::backend_msg(
                "pipeline stage must have exactly one field",
            ))
        }
    };

    match (name.as_str(), arg) {
        ("$match", Bson::Document(filter)) => {
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                if matches(&doc, filter)? {
                    out.push(doc);
                }
            }
            Ok(out)
        }
        ("$sort", Bson::Document(spec)) => {
            let mut docs = docs;
            sort_documents(&mut docs, spec);
            Ok(docs)
        }
        ("$skip", n) => Ok(docs.into_iter().skip(as_count("$skip", n)?).collect()),
        ("$limit", n) => Ok(docs.into_iter().take(as_count("$limit", n)?).collect()),
        ("$project", Bson::Document(spec)) => Ok(docs.iter().map(|d| project(d, spec)).collect()),
        ("$count", Bson::String(field)) => {
            if docs.is_empty() {
                return Ok(Vec::new());
            }
            let count = i64::try_from(docs.len()).unwrap_or(i64::MAX);
            let mut out = Document::new();
            out.insert(field.clone(), count);
            Ok(vec![out])
        }
        (other, _) => Err(DriverError::backend_msg(format!(
            "unsupported pipeline stage {}",
            other
        ))),
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn list_collections(&self, database: &str) -> DriverResult<Vec<String>> {
        Ok(self
            .databases
            .read()
            .get(database)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DriverResult<DocumentStream> {
        let mut docs = Vec::new();
        for doc in self.snapshot(database, collection) {
            if matches(&doc, &filter)? {
                docs.push(doc);
            }
        }
        if let Some(sort) = &options.sort {
            sort_documents(&mut docs, sort);
        }
        let skip = options.skip.unwrap_or(0) as usize;
        // A negative limit means the same as its absolute value; zero is unlimited.
        let limit = options
            .limit
            .map(|n| n.unsigned_abs() as usize)
            .filter(|n| *n > 0)
            .unwrap_or(usize::MAX);
        let docs: Vec<Document> = docs
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|d| match &options.projection {
                Some(spec) => project(&d, spec),
                None => d,
            })
            .collect();
        Ok(self.cursor(docs))
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<DocumentStream> {
        let mut docs = self.snapshot(database, collection);
        for stage in &pipeline {
            docs = run_stage(docs, stage)?;
        }
        Ok(self.cursor(docs))
    }

    async fn sample(
        &self,
        database: &str,
        collection: &str,
        size: usize,
    ) -> DriverResult<Vec<Document>> {
        let mut docs = self.snapshot(database, collection);
        docs.truncate(size);
        Ok(docs)
    }
}
