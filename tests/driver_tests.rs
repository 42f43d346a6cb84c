//! Driver Execution Tests
//!
//! Tests for:
//! - Parsing, parameter binding and execution through `Connection::query`
//! - Find and aggregate options
//! - Single-value result folding
//! - Backend failures at open time and mid-stream
//! - Cancellation before execution and during iteration
//! - Connector reachability checks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bson::{doc, Document};
use futures::stream::{self, StreamExt};
use graphjin_mongo::driver::{
    CancellationToken, Connection, Connector, DocumentStore, DocumentStream, DslQuery, FindOptions,
    MemoryStore, Operation,
};
use graphjin_mongo::{DriverError, DriverResult, ErrorKind, Rows};
use serde_json::{json, Value};

fn seeded() -> Arc<MemoryStore> {
    let seed = json!({
        "users": [
            {"_id": 1, "name": "ann", "status": "active", "age": 34},
            {"_id": 2, "name": "bob", "status": "idle", "age": 27},
            {"_id": 3, "name": "cid", "status": "active", "age": 41},
            {"_id": 4, "name": "dee", "status": "active", "age": 19}
        ],
        "orders": []
    });
    Arc::new(MemoryStore::from_seed("app", &seed).unwrap())
}

async fn documents(rows: Rows) -> Vec<Value> {
    rows.collect()
        .await
        .unwrap()
        .into_iter()
        .map(|row| serde_json::from_str(row[0].as_str().unwrap()).unwrap())
        .collect()
}

fn names(docs: &[Value]) -> Vec<&str> {
    docs.iter().map(|d| d["name"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn test_query_binds_parameters() {
    let store = seeded();
    let conn = Connection::open(store.clone(), "app");
    let cancel = CancellationToken::new();

    let rows = conn
        .query(
            r#"{"operation":"find","collection":"users",
                "filter":{"status":"$1","age":{"$gt":"$2"}},
                "options":{"sort":{"age":-1}}}"#,
            &[json!("active"), json!(20)],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(rows.columns(), vec!["json"]);

    let docs = documents(rows).await;
    assert_eq!(names(&docs), vec!["cid", "ann"]);
    assert_eq!(store.open_cursors(), 0);
}

#[tokio::test]
async fn test_query_missing_parameter() {
    let conn = Connection::open(seeded(), "app");
    let cancel = CancellationToken::new();

    let err = conn
        .query(
            r#"{"operation":"find","collection":"users","filter":{"age":"$2"}}"#,
            &[json!(1)],
            &cancel,
        )
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::MissingParameter);
}

#[tokio::test]
async fn test_query_rejects_bad_input() {
    let conn = Connection::open(seeded(), "app");
    let cancel = CancellationToken::new();

    let cases = [
        ("not json", ErrorKind::MalformedInput),
        (r#"{"collection":"users"}"#, ErrorKind::MissingOperation),
        (r#"{"operation":"find"}"#, ErrorKind::MissingOperation),
        (r#"{"operation":"delete","collection":"users"}"#, ErrorKind::UnsupportedOperation),
        (r#"{"operation":"find","collection":"users","options":{"limit":"ten"}}"#, ErrorKind::MalformedInput),
    ];
    for (text, kind) in cases {
        let err = conn.query(text, &[], &cancel).await.err().unwrap();
        assert_eq!(err.kind(), kind, "{}", text);
    }
}

#[tokio::test]
async fn test_find_options() {
    let conn = Connection::open(seeded(), "app");
    let cancel = CancellationToken::new();

    let rows = conn
        .query(
            r#"{"operation":"find","collection":"users",
                "options":{"sort":{"age":1},"skip":1,"limit":-2,"projection":{"name":1}}}"#,
            &[],
            &cancel,
        )
        .await
        .unwrap();
    let docs = documents(rows).await;
    assert_eq!(docs, vec![json!({"_id": 2, "name": "bob"}), json!({"_id": 1, "name": "ann"})]);
}

#[tokio::test]
async fn test_options_bound_from_parameters() {
    let conn = Connection::open(seeded(), "app");
    let cancel = CancellationToken::new();
    let dsl = r#"{"operation":"find","collection":"users",
        "options":{"sort":{"age":1},"limit":"$1","skip":"$2"}}"#;

    let rows = conn.query(dsl, &[json!(2), json!(1)], &cancel).await.unwrap();
    assert_eq!(names(&documents(rows).await), vec!["bob", "ann"]);

    let err = conn
        .query(dsl, &[json!("two"), json!(1)], &cancel)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);

    let rows = conn
        .query(
            r#"{"operation":"aggregate","collection":"users",
                "pipeline":[{"$match":{"status":"active"}}],
                "options":{"sort":{"age":-1},"limit":"$1"}}"#,
            &[json!(1)],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(names(&documents(rows).await), vec!["cid"]);
}

#[tokio::test]
async fn test_aggregate_with_options() {
    let conn = Connection::open(seeded(), "app");
    let cancel = CancellationToken::new();

    let rows = conn
        .query(
            r#"{"operation":"aggregate","collection":"users",
                "pipeline":[{"$match":{"status":"active"}}],
                "options":{"sort":{"name":-1},"limit":2}}"#,
            &[],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(names(&documents(rows).await), vec!["dee", "cid"]);

    let rows = conn
        .query(
            r#"{"operation":"aggregate","collection":"users",
                "pipeline":[{"$match":{"status":"active"}},{"$count":"n"}]}"#,
            &[],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(documents(rows).await, vec![json!({"n": 3})]);
}

#[tokio::test]
async fn test_execute_single_folds_documents() {
    let conn = Connection::open(seeded(), "app");
    let cancel = CancellationToken::new();

    let mut query = DslQuery::new(Operation::Find);
    query.collection = Some("users".to_string());
    query.filter = Some(json!({"status": "idle"}).as_object().unwrap().clone());

    let mut rows = conn.execute_single(&query, &cancel).await.unwrap();
    let row = rows.next().await.unwrap().unwrap();
    let payload: Value = serde_json::from_str(row[0].as_str().unwrap()).unwrap();
    assert_eq!(payload[0]["name"], "bob");
    assert_eq!(payload.as_array().unwrap().len(), 1);
    assert!(rows.next().await.unwrap().is_none());

    query.collection = Some("orders".to_string());
    query.filter = None;
    let rows = conn.execute_single(&query, &cancel).await.unwrap();
    let all = rows.collect().await.unwrap();
    assert_eq!(all, vec![vec![json!("[]")]]);
}

#[tokio::test]
async fn test_unsupported_stage_is_backend_error() {
    let store = seeded();
    let conn = Connection::open(store.clone(), "app");
    let cancel = CancellationToken::new();

    let err = conn
        .query(
            r#"{"operation":"aggregate","collection":"users","pipeline":[{"$facet":{}}]}"#,
            &[],
            &cancel,
        )
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::BackendError);
    assert_eq!(store.open_cursors(), 0);
}

#[tokio::test]
async fn test_missing_collection_is_empty() {
    let conn = Connection::open(seeded(), "app");
    let cancel = CancellationToken::new();

    let rows = conn
        .query(r#"{"operation":"find","collection":"nope"}"#, &[], &cancel)
        .await
        .unwrap();
    assert!(documents(rows).await.is_empty());
}

/// Releases its flag when the stream holding it is dropped.
struct Released(Arc<AtomicBool>);

impl Drop for Released {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A store whose cursors fail after the first document, or never yield.
struct FlakyStore {
    released: Arc<AtomicBool>,
    hang: bool,
    reachable: bool,
}

impl FlakyStore {
    fn new(hang: bool) -> Self {
        Self {
            released: Arc::new(AtomicBool::new(false)),
            hang,
            reachable: true,
        }
    }

    fn stream(&self) -> DocumentStream {
        let guard = Released(Arc::clone(&self.released));
        if self.hang {
            return stream::pending()
                .map(move |doc: DriverResult<Document>| {
                    let _held = &guard;
                    doc
                })
                .boxed();
        }
        let items = vec![
            Ok(doc! {"_id": 1}),
            Err(DriverError::backend_msg("connection reset")),
            Ok(doc! {"_id": 2}),
        ];
        stream::iter(items)
            .map(move |doc| {
                let _held = &guard;
                doc
            })
            .boxed()
    }
}

#[async_trait::async_trait]
impl DocumentStore for FlakyStore {
    async fn ping(&self) -> DriverResult<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(DriverError::backend_msg("no route to host"))
        }
    }

    async fn list_collections(&self, _database: &str) -> DriverResult<Vec<String>> {
        Ok(vec!["events".to_string()])
    }

    async fn find(
        &self,
        _database: &str,
        _collection: &str,
        _filter: Document,
        _options: FindOptions,
    ) -> DriverResult<DocumentStream> {
        Ok(self.stream())
    }

    async fn aggregate(
        &self,
        _database: &str,
        _collection: &str,
        _pipeline: Vec<Document>,
    ) -> DriverResult<DocumentStream> {
        Ok(self.stream())
    }

    async fn sample(
        &self,
        _database: &str,
        _collection: &str,
        _size: usize,
    ) -> DriverResult<Vec<Document>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_mid_stream_failure_releases_cursor() {
    let store = Arc::new(FlakyStore::new(false));
    let released = Arc::clone(&store.released);
    let conn = Connection::open(store, "app");
    let cancel = CancellationToken::new();

    let mut rows = conn
        .query(r#"{"operation":"find","collection":"events"}"#, &[], &cancel)
        .await
        .unwrap();
    assert!(rows.next().await.unwrap().is_some());

    let err = rows.next().await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::BackendError);
    assert!(released.load(Ordering::SeqCst));

    // Closed cursors stay exhausted and close stays idempotent.
    assert!(rows.next().await.unwrap().is_none());
    rows.close();
    rows.close();
}

#[tokio::test]
async fn test_cancelled_before_execute() {
    let store = seeded();
    let conn = Connection::open(store.clone(), "app");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = conn
        .query(r#"{"operation":"find","collection":"users"}"#, &[], &cancel)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DriverError::Cancelled));
    assert_eq!(store.released_cursors(), 0);
}

#[tokio::test]
async fn test_cancel_during_iteration() {
    let store = Arc::new(FlakyStore::new(true));
    let released = Arc::clone(&store.released);
    let conn = Connection::open(store, "app");
    let cancel = CancellationToken::new();

    let mut rows = conn
        .query(r#"{"operation":"aggregate","collection":"events"}"#, &[], &cancel)
        .await
        .unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = rows.next().await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_connector_checks_reachability() {
    let cancel = CancellationToken::new();

    let connector = Connector::new(seeded(), "app");
    let conn = connector.connect(&cancel).await.unwrap();
    assert_eq!(conn.database(), "app");

    let mut unreachable = FlakyStore::new(false);
    unreachable.reachable = false;
    let connector = Connector::new(Arc::new(unreachable), "app");
    let err = connector.connect(&cancel).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::BackendError);
    assert!(err.to_string().contains("no route to host"));
}

#[tokio::test]
async fn test_connections_run_concurrently() {
    let conn = Connection::open(seeded(), "app");
    let mut handles = Vec::new();
    for status in ["active", "idle", "active", "idle"] {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let rows = conn
                .query(
                    r#"{"operation":"find","collection":"users","filter":{"status":"$1"}}"#,
                    &[json!(status)],
                    &cancel,
                )
                .await
                .unwrap();
            (status, rows.collect().await.unwrap().len())
        }));
    }
    for handle in handles {
        let (status, count) = handle.await.unwrap();
        assert_eq!(count, if status == "active" { 3 } else { 1 });
    }
}
