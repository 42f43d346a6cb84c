//! Keyset pagination cursors.
//!
//! The wire form is `<prefix><select_id>:<v1>:…:<vN>`, where the values are
//! the last row's `order_by` columns. A cursor that cannot be applied never
//! fails the query; it degrades to "no cursor" so the caller scans from the
//! start.

use bson::Document;
use graphjin_schema::Relation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::dsl::{DslQuery, Operation};
use crate::error::{DriverError, DriverResult};

/// Prefix the gateway puts on cursors when a query carries no explicit one.
pub const FALLBACK_PREFIX: &str = "gj-";

pub const ID_FIELD: &str = "_id";

/// Marks an undeclared cursor field as a string, e.g. `'10001`.
pub const STRING_QUOTE: char = '\'';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

impl Direction {
    fn seek_operator(self) -> &'static str {
        match self {
            Direction::Asc => "$gt",
            Direction::Desc => "$lt",
        }
    }

    fn sort_order(self) -> i32 {
        match self {
            Direction::Asc => 1,
            Direction::Desc => -1,
        }
    }
}

/// Declared type of a cursor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Integer,
    Float,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ColumnKind>,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, direction: Direction) -> Self {
        Self {
            column: column.into(),
            direction,
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: ColumnKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// The document field this column reads; `id` addresses `_id`.
    pub fn field(&self) -> &str {
        if self.column == "id" {
            ID_FIELD
        } else {
            &self.column
        }
    }
}

/// Paging context for one query site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorInfo {
    pub select_id: u64,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
}

/// A match-stage body selecting rows strictly after a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekFilter(Map<String, Value>);

impl SeekFilter {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// `{"$match": <filter>}`
    pub fn into_match_stage(self) -> Map<String, Value> {
        let mut stage = Map::new();
        stage.insert("$match".to_string(), Value::Object(self.0));
        stage
    }
}

impl CursorInfo {
    pub fn new(select_id: u64, prefix: impl Into<String>, order_by: Vec<OrderBy>) -> Self {
        Self {
            select_id,
            prefix: prefix.into(),
            order_by,
        }
    }

    /// Sort specification matching `order_by`.
    pub fn sort_document(&self) -> Document {
        let mut doc = Document::new();
        for col in &self.order_by {
            doc.insert(col.field(), col.direction.sort_order());
        }
        doc
    }

    /// Render the cursor that resumes after `row`.
    ///
    /// Returns `None` when an order-by value is missing or cannot be written
    /// into the colon-separated form.
    pub fn encode(&self, row: &Value) -> Option<String> {
        if self.order_by.is_empty() {
            return None;
        }
        let mut out = format!("{}{}", self.prefix, self.select_id);
        let last = self.order_by.len() - 1;
        for (i, col) in self.order_by.iter().enumerate() {
            let value = lookup(row, col.field())?;
            let mut text = render_value(value)?;
            // Undeclared columns are typed from the text on the way back, so
            // strings that would read as another type are quoted.
            if col.kind.is_none() && i != last {
                if let Value::String(s) = value {
                    if parse_untyped(s) != *value {
                        text = format!("{}{}", STRING_QUOTE, s);
                    }
                }
            }
            out.push(':');
            out.push_str(&text);
        }
        Some(out)
    }
}

/// Strip whitespace and the cursor prefix, leaving `<select_id>:<values…>`.
pub fn normalize_cursor(info: &CursorInfo, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if !info.prefix.is_empty() {
        // An explicit prefix that fails to match is not second-guessed.
        return trimmed
            .strip_prefix(info.prefix.as_str())
            .unwrap_or(trimmed)
            .to_string();
    }
    strip_fallback_prefix(trimmed).unwrap_or(trimmed).to_string()
}

fn strip_fallback_prefix(s: &str) -> Option<&str> {
    let rest = s.strip_prefix(FALLBACK_PREFIX)?;
    let (token, tail) = rest.split_once(':')?;
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(tail)
}

/// Build the seek filter for `raw`, or `None` when there is no usable cursor.
pub fn build_seek_filter(info: &CursorInfo, raw: &str) -> Option<SeekFilter> {
    match try_build_seek_filter(info, raw) {
        Ok(filter) => filter,
        Err(e) => {
            tracing::warn!(
                "Ignoring cursor for select {} ({}): {}",
                info.select_id,
                e.kind(),
                e
            );
            None
        }
    }
}

/// Like [`build_seek_filter`], but never seeks across a cross-database join.
pub fn build_seek_filter_across(
    info: &CursorInfo,
    raw: &str,
    via: &Relation,
) -> Option<SeekFilter> {
    if via.is_cross_database() {
        tracing::debug!(
            "Cursor for select {} not derivable across {} -> {}",
            info.select_id,
            via.left.table,
            via.right.table
        );
        return None;
    }
    build_seek_filter(info, raw)
}

/// Checked variant of [`build_seek_filter`].
///
/// `Ok(None)` means the cursor was empty; an unusable cursor is reported as
/// `CursorInvalid` or `TypeMismatch`.
pub fn try_build_seek_filter(info: &CursorInfo, raw: &str) -> DriverResult<Option<SeekFilter>> {
    let normalized = normalize_cursor(info, raw);
    if normalized.is_empty() {
        return Ok(None);
    }

    let mut fields = normalized.split(':');
    let head = fields.next().unwrap_or_default();
    let select_id: u64 = head
        .parse()
        .map_err(|_| DriverError::CursorInvalid(format!("bad select id '{}'", head)))?;
    if select_id != info.select_id {
        return Err(DriverError::CursorInvalid(format!(
            "issued for select {}, not {}",
            select_id, info.select_id
        )));
    }

    let values: Vec<&str> = fields.collect();
    if info.order_by.is_empty() {
        return Err(DriverError::CursorInvalid("no order_by columns".to_string()));
    }
    if values.len() != info.order_by.len() {
        return Err(DriverError::CursorInvalid(format!(
            "expected {} values, found {}",
            info.order_by.len(),
            values.len()
        )));
    }

    let last = info.order_by.len() - 1;
    let mut parsed = Vec::with_capacity(values.len());
    for (i, (text, col)) in values.iter().zip(&info.order_by).enumerate() {
        parsed.push(parse_field(text, col, i == last)?);
    }

    let filter = seek_clauses(&info.order_by, &parsed);
    let rendered = Value::Object(filter.clone());
    tracing::debug!("Seek filter for select {}: {}", info.select_id, rendered);
    Ok(Some(SeekFilter(filter)))
}

fn parse_field(text: &str, col: &OrderBy, identity: bool) -> DriverResult<Value> {
    let kind = col
        .kind
        .or(if identity { Some(ColumnKind::Integer) } else { None });
    let mismatch = |expected: &str| {
        DriverError::TypeMismatch(format!(
            "cursor value '{}' for column '{}' is not {}",
            text, col.column, expected
        ))
    };

    match kind {
        Some(ColumnKind::Integer) => text
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| mismatch("an integer")),
        Some(ColumnKind::Float) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| mismatch("a number")),
        Some(ColumnKind::String) => Ok(Value::String(text.to_string())),
        None => Ok(parse_untyped(text)),
    }
}

/// Value of an undeclared cursor field: quoted string, integer, float,
/// boolean, then plain string.
fn parse_untyped(text: &str) -> Value {
    if let Some(quoted) = text.strip_prefix(STRING_QUOTE) {
        return Value::String(quoted.to_string());
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

/// Row-value comparison `(c1..cN) > (v1..vN)` under per-column directions,
/// expanded into a disjunction of equality prefixes.
fn seek_clauses(order_by: &[OrderBy], values: &[Value]) -> Map<String, Value> {
    let compare = |k: usize| {
        let col = &order_by[k];
        single(
            col.field(),
            single(col.direction.seek_operator(), values[k].clone()),
        )
    };

    if order_by.len() == 1 {
        return match compare(0) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
    }

    let mut clauses = Vec::with_capacity(order_by.len());
    clauses.push(compare(0));
    for k in 1..order_by.len() {
        let mut and: Vec<Value> = (0..k)
            .map(|j| single(order_by[j].field(), values[j].clone()))
            .collect();
        and.push(compare(k));
        clauses.push(single("$and", Value::Array(and)));
    }

    let mut filter = Map::new();
    filter.insert("$or".to_string(), Value::Array(clauses));
    filter
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(row, |cur, part| cur.get(part))
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) if !s.contains(':') => Some(s.clone()),
        // Relaxed extended JSON wrappers
        Value::Object(map) if map.len() == 1 => match map.iter().next() {
            Some((k, Value::String(s))) if k == "$oid" || k == "$numberLong" => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Splice `filter` into `query`: a leading `$match` stage for aggregates, an
/// `$and` with the existing filter for finds.
pub fn apply_seek(query: &mut DslQuery, filter: SeekFilter) {
    match query.operation {
        Operation::Aggregate => query.pipeline.insert(0, filter.into_match_stage()),
        Operation::Find => {
            let merged = match query.filter.take() {
                Some(existing) if !existing.is_empty() => {
                    let mut map = Map::new();
                    map.insert(
                        "$and".to_string(),
                        Value::Array(vec![Value::Object(existing), filter.to_value()]),
                    );
                    map
                }
                _ => filter.into_map(),
            };
            query.filter = Some(merged);
        }
        Operation::IntrospectColumns => {}
    }
}

/// Apply the query's own `cursor` under its `cursor_info`. Returns whether a
/// seek filter was spliced in.
pub fn apply_cursor(query: &mut DslQuery) -> bool {
    let Some(info) = query.cursor_info.as_ref() else {
        return false;
    };
    let Some(raw) = query.cursor_str() else {
        return false;
    };
    match build_seek_filter(info, raw) {
        Some(filter) => {
            apply_seek(query, filter);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use graphjin_schema::{RelKind, RelSide, TableRef};
    use serde_json::json;

    fn price_id_desc() -> CursorInfo {
        CursorInfo::new(
            12,
            "",
            vec![
                OrderBy::new("price", Direction::Desc),
                OrderBy::new("id", Direction::Desc),
            ],
        )
    }

    fn id_asc() -> CursorInfo {
        CursorInfo::new(4, "", vec![OrderBy::new("id", Direction::Asc)])
    }

    #[test]
    fn test_normalize_exact_prefix() {
        let info = CursorInfo::new(12, "gj-123:", vec![]);
        assert_eq!(normalize_cursor(&info, "gj-123:12:100:99"), "12:100:99");
        assert_eq!(normalize_cursor(&info, "  gj-123:12:100:99\n"), "12:100:99");
    }

    #[test]
    fn test_normalize_fallback_prefix() {
        let info = CursorInfo::default();
        assert_eq!(normalize_cursor(&info, "gj-65a8b3c0:12:100:99"), "12:100:99");
        assert_eq!(normalize_cursor(&info, "12:100:99"), "12:100:99");
        // not hex
        assert_eq!(normalize_cursor(&info, "gj-xyz:12:1"), "gj-xyz:12:1");
        assert_eq!(normalize_cursor(&info, "gj-:12:1"), "gj-:12:1");
        assert_eq!(normalize_cursor(&info, "   "), "");
    }

    #[test]
    fn test_normalize_no_fallback_when_prefix_set() {
        let info = CursorInfo::new(12, "gj-123:", vec![]);
        assert_eq!(normalize_cursor(&info, "gj-abc:12:1"), "gj-abc:12:1");
    }

    #[test]
    fn test_normalize_strips_prefix_roundtrip() {
        let info = CursorInfo::new(1, "page-", vec![]);
        for s in ["1:2", "7:a:b", "0"] {
            let raw = format!("{}{}", info.prefix, s);
            assert_eq!(normalize_cursor(&info, &raw), s);
        }

        let info = CursorInfo::default();
        for (hex, s) in [("0", "1:2"), ("deadBEEF", "9:x:10")] {
            let raw = format!("gj-{}:{}", hex, s);
            assert_eq!(normalize_cursor(&info, &raw), s);
        }
    }

    #[test]
    fn test_two_column_descending_seek() {
        let filter = build_seek_filter(&price_id_desc(), "gj-65a8b3c0:12:100.5:99").unwrap();
        assert_eq!(
            filter.to_value(),
            json!({"$or": [
                {"price": {"$lt": 100.5}},
                {"$and": [{"price": 100.5}, {"_id": {"$lt": 99}}]}
            ]})
        );
    }

    #[test]
    fn test_single_column_ascending_seek() {
        let filter = build_seek_filter(&id_asc(), "gj-abc:4:10").unwrap();
        assert_eq!(filter.to_value(), json!({"_id": {"$gt": 10}}));
        assert_eq!(
            Value::Object(filter.into_match_stage()),
            json!({"$match": {"_id": {"$gt": 10}}})
        );
    }

    #[test]
    fn test_unusable_cursors_yield_no_filter() {
        let info = id_asc();
        assert!(build_seek_filter(&info, "").is_none());
        assert!(build_seek_filter(&info, "gj-abc:").is_none());
        assert!(build_seek_filter(&info, "gj-abc:5:10").is_none());
        assert!(build_seek_filter(&info, "gj-abc:4:10:11").is_none());
        assert!(build_seek_filter(&info, "gj-abc:4:ten").is_none());

        assert!(try_build_seek_filter(&info, "").unwrap().is_none());
        assert!(try_build_seek_filter(&info, "gj-abc:").unwrap().is_none());
        assert_eq!(
            try_build_seek_filter(&info, "gj-abc:4").unwrap_err().kind(),
            ErrorKind::CursorInvalid
        );
        assert_eq!(
            try_build_seek_filter(&info, "gj-abc:5:10").unwrap_err().kind(),
            ErrorKind::CursorInvalid
        );
        assert_eq!(
            try_build_seek_filter(&info, "gj-abc:4:ten").unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );
    }

    #[test]
    fn test_declared_kinds() {
        let info = CursorInfo::new(
            1,
            "",
            vec![
                OrderBy::new("sku", Direction::Asc).with_kind(ColumnKind::String),
                OrderBy::new("weight", Direction::Asc).with_kind(ColumnKind::Float),
                OrderBy::new("id", Direction::Asc),
            ],
        );
        let filter = build_seek_filter(&info, "1:007:2:5").unwrap().to_value();
        let clauses = filter["$or"].as_array().unwrap();
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[0], json!({"sku": {"$gt": "007"}}));
        assert_eq!(clauses[1]["$and"][1], json!({"weight": {"$gt": 2.0}}));
        assert_eq!(
            clauses[2],
            json!({"$and": [{"sku": "007"}, {"weight": 2.0}, {"_id": {"$gt": 5}}]})
        );

        assert_eq!(
            try_build_seek_filter(&info, "1:a:heavy:5").unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );
    }

    #[test]
    fn test_encode_matches_seek() {
        let info = CursorInfo::new(
            12,
            "gj-65a8b3c0:",
            vec![
                OrderBy::new("price", Direction::Desc),
                OrderBy::new("id", Direction::Desc),
            ],
        );
        let row = json!({"_id": 99, "price": 100.5, "name": "lamp"});
        let cursor = info.encode(&row).unwrap();
        assert_eq!(cursor, "gj-65a8b3c0:12:100.5:99");
        assert!(build_seek_filter(&info, &cursor).is_some());

        assert!(info.encode(&json!({"_id": 1})).is_none());
        assert!(info.encode(&json!({"_id": 1, "price": "a:b"})).is_none());
        assert!(info.encode(&json!({"_id": 1, "price": [1]})).is_none());
    }

    #[test]
    fn test_encode_keeps_string_type() {
        let info = CursorInfo::new(
            1,
            "",
            vec![
                OrderBy::new("zip", Direction::Asc),
                OrderBy::new("id", Direction::Asc),
            ],
        );
        let cursor = info.encode(&json!({"_id": 1, "zip": "10001"})).unwrap();
        assert_eq!(cursor, "1:'10001:1");
        let filter = build_seek_filter(&info, &cursor).unwrap().to_value();
        assert_eq!(filter["$or"][0], json!({"zip": {"$gt": "10001"}}));
        assert_eq!(filter["$or"][1]["$and"][0], json!({"zip": "10001"}));

        // Leading quotes and boolean-looking strings survive the trip as well.
        for text in ["'quoted", "true", "1e3", "lamp"] {
            let cursor = info.encode(&json!({"_id": 1, "zip": text})).unwrap();
            let filter = build_seek_filter(&info, &cursor).unwrap().to_value();
            assert_eq!(filter["$or"][0]["zip"]["$gt"], json!(text), "{}", cursor);
        }

        let cursor = info.encode(&json!({"_id": 1, "zip": true})).unwrap();
        let filter = build_seek_filter(&info, &cursor).unwrap().to_value();
        assert_eq!(filter["$or"][0], json!({"zip": {"$gt": true}}));

        // Declared string columns are written as-is.
        let typed = CursorInfo::new(
            1,
            "",
            vec![
                OrderBy::new("zip", Direction::Asc).with_kind(ColumnKind::String),
                OrderBy::new("id", Direction::Asc),
            ],
        );
        assert_eq!(typed.encode(&json!({"_id": 1, "zip": "10001"})).unwrap(), "1:10001:1");
    }

    #[test]
    fn test_sort_document() {
        assert_eq!(
            price_id_desc().sort_document(),
            bson::doc! {"price": -1, "_id": -1}
        );
    }

    #[test]
    fn test_no_seek_across_databases() {
        let rel = |db: &str| {
            Relation::new(
                RelKind::DatabaseJoin,
                RelSide::new(TableRef::new("main", "public", "users"), ["id"]),
                RelSide::new(TableRef::new(db, "public", "events"), ["user_id"]),
            )
        };
        let info = id_asc();
        assert!(build_seek_filter_across(&info, "gj-abc:4:10", &rel("analytics")).is_none());
        assert!(build_seek_filter_across(&info, "gj-abc:4:10", &rel("main")).is_some());
    }

    #[test]
    fn test_apply_seek() {
        let filter = build_seek_filter(&id_asc(), "4:10").unwrap();

        let mut agg = DslQuery::new(Operation::Aggregate);
        agg.collection = Some("users".to_string());
        agg.pipeline.push(json!({"$sort": {"_id": 1}}).as_object().unwrap().clone());
        apply_seek(&mut agg, filter.clone());
        assert_eq!(agg.pipeline.len(), 2);
        assert_eq!(Value::Object(agg.pipeline[0].clone()), json!({"$match": {"_id": {"$gt": 10}}}));

        let mut find = DslQuery::new(Operation::Find);
        apply_seek(&mut find, filter.clone());
        assert_eq!(find.filter.clone().map(Value::Object), Some(json!({"_id": {"$gt": 10}})));

        let mut find = DslQuery::new(Operation::Find);
        find.filter = json!({"active": true}).as_object().cloned();
        apply_seek(&mut find, filter);
        assert_eq!(
            find.filter.map(Value::Object),
            Some(json!({"$and": [{"active": true}, {"_id": {"$gt": 10}}]}))
        );
    }
}
