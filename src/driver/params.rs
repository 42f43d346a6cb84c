//! Positional parameter substitution.
//!
//! Placeholders are JSON strings `"$N"` (1-based) used as values anywhere in
//! `pipeline`, `filter`, `options` or `cursor`. Keys are never rewritten and
//! `"$0"`, `"$01"` or field paths like `"$age"` are left alone.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::dsl::DslQuery;
use crate::error::{DriverError, DriverResult};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$([1-9][0-9]*)$").expect("placeholder pattern is valid"));

/// The 1-based index named by a placeholder string.
pub fn placeholder_index(s: &str) -> Option<usize> {
    let caps = PLACEHOLDER.captures(s)?;
    // Indices too large for usize cannot be satisfied by any argument list.
    Some(caps[1].parse::<usize>().unwrap_or(usize::MAX))
}

/// Return a copy of `query` with every placeholder replaced by its argument.
pub fn substitute(query: &DslQuery, args: &[Value]) -> DriverResult<DslQuery> {
    let mut out = query.clone();
    for stage in &mut out.pipeline {
        substitute_map(stage, args)?;
    }
    if let Some(filter) = &mut out.filter {
        substitute_map(filter, args)?;
    }
    substitute_map(&mut out.options, args)?;
    if let Some(cursor) = &mut out.cursor {
        substitute_value(cursor, args)?;
    }
    Ok(out)
}

fn substitute_map(map: &mut Map<String, Value>, args: &[Value]) -> DriverResult<()> {
    for value in map.values_mut() {
        substitute_value(value, args)?;
    }
    Ok(())
}

fn substitute_value(value: &mut Value, args: &[Value]) -> DriverResult<()> {
    match value {
        Value::String(s) => {
            if let Some(index) = placeholder_index(s) {
                let arg = args.get(index - 1).ok_or(DriverError::MissingParameter {
                    index,
                    provided: args.len(),
                })?;
                *value = arg.clone();
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_value(item, args)?;
            }
        }
        Value::Object(map) => substitute_map(map, args)?,
        _ => {}
    }
    Ok(())
}
