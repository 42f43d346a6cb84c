//! Sampling-based column introspection.
//!
//! Document collections have no declared schema, so columns are inferred from
//! up to `sample_size` documents per collection. Only top-level fields are
//! reported; nested documents show up as a single `object` column.

use std::collections::HashMap;

use bson::{Bson, Document};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::dsl::IntrospectOptions;
use super::rows::{cancellable, Row, TabularRows};
use super::store::DocumentStore;
use crate::error::DriverResult;

/// Output columns, in order.
pub const INTROSPECTION_COLUMNS: [&str; 11] = [
    "table_schema",
    "table_name",
    "column_name",
    "data_type",
    "is_nullable",
    "is_primary_key",
    "is_unique_key",
    "is_array",
    "fkey_schema",
    "fkey_table",
    "fkey_column",
];

const ID_COLUMN: &str = "_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRecord {
    pub table_schema: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_unique_key: bool,
    pub is_array: bool,
    pub fkey_schema: String,
    pub fkey_table: String,
    pub fkey_column: String,
}

impl ColumnRecord {
    pub fn into_row(self) -> Row {
        vec![
            Value::String(self.table_schema),
            Value::String(self.table_name),
            Value::String(self.column_name),
            Value::String(self.data_type),
            Value::Bool(self.is_nullable),
            Value::Bool(self.is_primary_key),
            Value::Bool(self.is_unique_key),
            Value::Bool(self.is_array),
            Value::String(self.fkey_schema),
            Value::String(self.fkey_table),
            Value::String(self.fkey_column),
        ]
    }
}

/// Type class reported for a value. `None` for null.
pub fn type_class(value: &Bson) -> Option<&'static str> {
    let class = match value {
        Bson::Null | Bson::Undefined => return None,
        Bson::Int32(_) | Bson::Int64(_) => "integer",
        Bson::Double(_) | Bson::Decimal128(_) => "double",
        Bson::String(_) | Bson::Symbol(_) => "string",
        Bson::Boolean(_) => "boolean",
        Bson::DateTime(_) | Bson::Timestamp(_) => "timestamp",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectid",
        _ => "string",
    };
    Some(class)
}

#[derive(Default)]
struct FieldStats {
    name: String,
    seen: usize,
    nulls: usize,
    array: bool,
    // (class, count) in order of first observation
    types: Vec<(&'static str, usize)>,
}

impl FieldStats {
    fn observe(&mut self, value: &Bson) {
        self.seen += 1;
        if matches!(value, Bson::Array(_)) {
            self.array = true;
        }
        match type_class(value) {
            None => self.nulls += 1,
            Some(class) => match self.types.iter_mut().find(|(c, _)| *c == class) {
                Some((_, n)) => *n += 1,
                None => self.types.push((class, 1)),
            },
        }
    }

    /// Resolved type and whether the samples disagreed.
    fn resolve(&self) -> (&'static str, bool) {
        match self.types.as_slice() {
            [] => ("string", false),
            [(only, _)] => (*only, false),
            many => {
                if many.iter().all(|(c, _)| *c == "integer" || *c == "double") {
                    return ("double", true);
                }
                let mut best = many[0];
                for &(class, n) in &many[1..] {
                    if n > best.1 {
                        best = (class, n);
                    }
                }
                (best.0, true)
            }
        }
    }
}

/// Infer the column catalog of one collection from sampled documents.
pub fn infer_columns(database: &str, collection: &str, docs: &[Document]) -> Vec<ColumnRecord> {
    let mut fields: Vec<FieldStats> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for doc in docs {
        for (key, value) in doc {
            let i = *index.entry(key.clone()).or_insert_with(|| {
                fields.push(FieldStats {
                    name: key.clone(),
                    ..Default::default()
                });
                fields.len() - 1
            });
            fields[i].observe(value);
        }
    }

    // `_id` first, everything else in first-observation order
    if let Some(pos) = fields.iter().position(|f| f.name == ID_COLUMN) {
        let id = fields.remove(pos);
        fields.insert(0, id);
    }

    fields
        .into_iter()
        .map(|f| {
            let (data_type, conflicting) = f.resolve();
            let is_id = f.name == ID_COLUMN;
            ColumnRecord {
                table_schema: database.to_string(),
                table_name: collection.to_string(),
                data_type: data_type.to_string(),
                is_nullable: f.seen < docs.len() || f.nulls > 0 || conflicting,
                is_primary_key: is_id,
                is_unique_key: is_id,
                is_array: f.array,
                column_name: f.name,
                fkey_schema: String::new(),
                fkey_table: String::new(),
                fkey_column: String::new(),
            }
        })
        .collect()
}

/// Sample every target collection and build the tabular catalog.
pub async fn introspect(
    store: &dyn DocumentStore,
    database: &str,
    options: &IntrospectOptions,
    cancel: &CancellationToken,
) -> DriverResult<TabularRows> {
    let collections = match &options.collections {
        Some(names) => names.clone(),
        None => cancellable(cancel, store.list_collections(database)).await?,
    };

    let mut rows = Vec::new();
    for collection in &collections {
        let docs = cancellable(
            cancel,
            store.sample(database, collection, options.sample_size),
        )
        .await?;
        let records = infer_columns(database, collection, &docs);
        tracing::debug!(
            "Introspected {}.{}: {} documents, {} columns",
            database,
            collection,
            docs.len(),
            records.len()
        );
        rows.extend(records.into_iter().map(ColumnRecord::into_row));
    }

    Ok(TabularRows::new(INTROSPECTION_COLUMNS, rows))
}
