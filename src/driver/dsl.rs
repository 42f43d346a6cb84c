//! Query DSL parsing.
//!
//! A query is a JSON object naming an `operation` plus the operation's inputs:
//!
//! ```json
//! {"operation": "aggregate", "collection": "users",
//!  "pipeline": [{"$match": {"age": {"$gt": "$1"}}}],
//!  "params": ["$1"]}
//! ```
//!
//! Unknown top-level fields are kept in [`DslQuery::extra`] so a newer upper
//! layer can talk to an older driver.

use std::fmt;
use std::str::FromStr;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::cursor::CursorInfo;
use super::params::placeholder_index;
use crate::error::{DriverError, DriverResult};

pub const DEFAULT_SAMPLE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Aggregate,
    Find,
    IntrospectColumns,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Aggregate => "aggregate",
            Operation::Find => "find",
            Operation::IntrospectColumns => "introspect_columns",
        }
    }

    fn needs_collection(self) -> bool {
        !matches!(self, Operation::IntrospectColumns)
    }
}

impl FromStr for Operation {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aggregate" => Ok(Operation::Aggregate),
            "find" => Ok(Operation::Find),
            "introspect_columns" => Ok(Operation::IntrospectColumns),
            other => Err(DriverError::UnsupportedOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed query request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslQuery {
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_info: Option<CursorInfo>,
    /// Raw cursor for this page, or a placeholder bound to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `find` / `aggregate` options converted for the document store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectOptions {
    pub sample_size: usize,
    /// Restrict introspection to these collections. `None` means all.
    pub collections: Option<Vec<String>>,
}

impl Default for IntrospectOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            collections: None,
        }
    }
}

/// Parse DSL text into a [`DslQuery`].
pub fn parse(text: &str) -> DriverResult<DslQuery> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DriverError::MalformedInput(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DriverError::MalformedInput(
            "query must be a JSON object".to_string(),
        ));
    };

    match obj.get("operation") {
        Some(Value::String(s)) => {
            s.parse::<Operation>()?;
        }
        _ => return Err(DriverError::MissingOperation),
    }

    let query: DslQuery = serde_json::from_value(Value::Object(obj))
        .map_err(|e| DriverError::MalformedInput(e.to_string()))?;
    query.validate_unbound()?;
    Ok(query)
}

impl DslQuery {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            collection: None,
            pipeline: Vec::new(),
            filter: None,
            options: Map::new(),
            params: Vec::new(),
            cursor_info: None,
            cursor: None,
            extra: Map::new(),
        }
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.operation.needs_collection()
            && self.collection.as_deref().map_or(true, str::is_empty)
        {
            return Err(DriverError::MissingField("collection"));
        }
        match self.operation {
            Operation::IntrospectColumns => {
                self.introspect_options()?;
            }
            Operation::Find | Operation::Aggregate => {
                self.find_options()?;
            }
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), but option values that are still
    /// `"$N"` placeholders pass; their types are checked once bound.
    pub fn validate_unbound(&self) -> DriverResult<()> {
        let mut bound = self.clone();
        bound
            .options
            .retain(|_, v| v.as_str().and_then(placeholder_index).is_none());
        bound.validate()
    }

    /// The collection this query targets. Empty for introspection.
    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or_default()
    }

    pub fn to_json(&self) -> DriverResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn find_options(&self) -> DriverResult<FindOptions> {
        let mut opts = FindOptions::default();
        if let Some(v) = self.options.get("limit") {
            opts.limit = Some(v.as_i64().ok_or_else(|| bad_option("limit", "an integer"))?);
        }
        if let Some(v) = self.options.get("skip") {
            opts.skip = Some(
                v.as_u64()
                    .ok_or_else(|| bad_option("skip", "a non-negative integer"))?,
            );
        }
        if let Some(v) = self.options.get("sort") {
            opts.sort = Some(option_document("sort", v)?);
        }
        if let Some(v) = self.options.get("projection") {
            opts.projection = Some(option_document("projection", v)?);
        }
        Ok(opts)
    }

    pub fn introspect_options(&self) -> DriverResult<IntrospectOptions> {
        let mut opts = IntrospectOptions::default();
        if let Some(v) = self.options.get("sample_size") {
            opts.sample_size = v
                .as_u64()
                .filter(|n| *n > 0)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| bad_option("sample_size", "a positive integer"))?;
        }
        match self.options.get("collections") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    let name = item
                        .as_str()
                        .ok_or_else(|| bad_option("collections", "a list of names"))?;
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
                opts.collections = Some(names);
            }
            Some(_) => return Err(bad_option("collections", "a list of names")),
        }
        Ok(opts)
    }

    /// The filter as a BSON document; empty when absent.
    pub fn filter_document(&self) -> DriverResult<Document> {
        match &self.filter {
            Some(map) => to_document(map),
            None => Ok(Document::new()),
        }
    }

    pub fn pipeline_documents(&self) -> DriverResult<Vec<Document>> {
        self.pipeline.iter().map(to_document).collect()
    }

    /// The raw cursor string, if one is set and non-blank.
    pub fn cursor_str(&self) -> Option<&str> {
        self.cursor
            .as_ref()
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

fn bad_option(key: &str, expected: &str) -> DriverError {
    DriverError::MalformedInput(format!("option '{}' must be {}", key, expected))
}

fn option_document(key: &str, value: &Value) -> DriverResult<Document> {
    match value {
        Value::Object(map) => to_document(map),
        _ => Err(bad_option(key, "an object")),
    }
}

/// Convert a JSON object (extended JSON accepted) into a BSON document.
pub fn to_document(map: &Map<String, Value>) -> DriverResult<Document> {
    match Bson::try_from(Value::Object(map.clone())) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(DriverError::MalformedInput(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
        Err(e) => Err(DriverError::MalformedInput(e.to_string())),
    }
}
