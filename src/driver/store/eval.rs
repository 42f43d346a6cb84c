//! BSON evaluation helpers for the in-memory store.
//!
//! This module contains the pieces the memory store needs to behave like a
//! document database for the query shapes the driver emits:
//! - get_path: Extract nested field values from a document
//! - values_equal: Equality with numeric widening and array membership
//! - compare_values: Cross-type ordering for sorts
//! - matches: Evaluate a filter document
//! - project: Apply an inclusion/exclusion projection

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::error::{DriverError, DriverResult};

/// Extract a value by dot-separated path (e.g. `"address.city"`).
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(d) => d.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

#[inline]
fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Sort rank of a BSON type, lowest first.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 255,
        _ => 12,
    }
}

/// Compare two values for equality.
///
/// Numbers compare by value regardless of width.
#[inline]
pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (as_f64(left), as_f64(right)) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

/// Total order used by `$sort`.
pub fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        _ if ra == 2 => {
            let (x, y) = (as_f64(a).unwrap_or(f64::NAN), as_f64(b).unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::Array(x), Bson::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Equality as a filter sees it: a missing field equals null and an array
/// field matches when any element does.
fn field_equals(field: Option<&Bson>, expected: &Bson) -> bool {
    match field {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

/// Ordered comparison only holds between values of the same type class.
fn field_compares(field: Option<&Bson>, expected: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let check = |v: &Bson| type_rank(v) == type_rank(expected) && accept(compare_values(v, expected));
    match field {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

fn sub_filters<'a>(op: &str, value: &'a Bson) -> DriverResult<Vec<&'a Document>> {
    match value {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(d) => Ok(d),
                _ => Err(DriverError::backend_msg(format!("{} entries must be documents", op))),
            })
            .collect(),
        _ => Err(DriverError::backend_msg(format!("{} needs an array", op))),
    }
}

/// Evaluate `filter` against `doc`.
pub fn matches(doc: &Document, filter: &Document) -> DriverResult<bool> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, cond)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, cond)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in sub_filters(key, cond)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(DriverError::backend_msg(format!(
                    "unsupported query operator {}",
                    op
                )))
            }
            path => field_matches(get_path(doc, path), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_doc(cond: &Bson) -> Option<&Document> {
    match cond {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn field_matches(field: Option<&Bson>, cond: &Bson) -> DriverResult<bool> {
    let Some(ops) = is_operator_doc(cond) else {
        return Ok(field_equals(field, cond));
    };

    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => field_equals(field, arg),
            "$ne" => !field_equals(field, arg),
            "$gt" => field_compares(field, arg, Ordering::is_gt),
            "$gte" => field_compares(field, arg, Ordering::is_ge),
            "$lt" => field_compares(field, arg, Ordering::is_lt),
            "$lte" => field_compares(field, arg, Ordering::is_le),
            "$in" | "$nin" => {
                let Bson::Array(items) = arg else {
                    return Err(DriverError::backend_msg(format!("{} needs an array", op)));
                };
                let found = items.iter().any(|item| field_equals(field, item));
                if op == "$in" {
                    found
                } else {
                    !found
                }
            }
            "$exists" => field.is_some() == truthy(arg),
            other => {
                return Err(DriverError::backend_msg(format!(
                    "unsupported query operator {}",
                    other
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Stable sort by a `{field: 1 | -1}` specification.
pub fn sort_documents(docs: &mut [Document], spec: &Document) {
    let keys: Vec<(&str, bool)> = spec
        .iter()
        .map(|(k, v)| (k.as_str(), as_f64(v).map_or(true, |n| n >= 0.0)))
        .collect();
    docs.sort_by(|a, b| {
        for (path, ascending) in &keys {
            let null = Bson::Null;
            let x = get_path(a, path).unwrap_or(&null);
            let y = get_path(b, path).unwrap_or(&null);
            let ord = compare_values(x, y);
            if ord != Ordering::Equal {
                return if *ascending { ord } else { ord.reverse() };
            }
        }
        Ordering::Equal
    });
}

/// Apply a top-level projection.
///
/// `"$field"` string values copy another field, as `$project` allows.
pub fn project(doc: &Document, spec: &Document) -> Document {
    let inclusion = spec.iter().any(|(k, v)| {
        k != "_id" && (truthy(v) || matches!(v, Bson::String(s) if s.starts_with('$')))
    });

    if !inclusion {
        let mut out = doc.clone();
        for (k, v) in spec {
            if !truthy(v) {
                out.remove(k);
            }
        }
        return out;
    }

    let mut out = Document::new();
    let keep_id = spec.get("_id").map_or(true, truthy);
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (k, v) in spec {
        if k == "_id" {
            continue;
        }
        match v {
            Bson::String(s) if s.starts_with('$') => {
                if let Some(value) = get_path(doc, &s[1..]) {
                    out.insert(k.clone(), value.clone());
                }
            }
            v if truthy(v) => {
                if let Some(value) = get_path(doc, k) {
                    out.insert(k.clone(), value.clone());
                }
            }
            _ => {}
        }
    }
    out
}
