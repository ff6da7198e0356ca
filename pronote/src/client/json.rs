//! Explicit path lookups over decoded responses.
//!
//! `get` is for values that may legitimately be absent; `at` and the typed
//! helpers are for values the protocol requires and fail with a
//! [`PronoteError::Parsing`] naming the path.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::{PronoteError, Result};

pub fn get<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

pub fn at<'a>(value: &'a Value, path: &[&str]) -> Result<&'a Value> {
    get(value, path).ok_or_else(|| PronoteError::parsing("missing value", path))
}

pub fn str_at<'a>(value: &'a Value, path: &[&str]) -> Result<&'a str> {
    at(value, path)?
        .as_str()
        .ok_or_else(|| PronoteError::parsing("expected a string", path))
}

pub fn str_opt<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    get(value, path).and_then(Value::as_str)
}

/// `true` only when the value exists and is the JSON boolean `true`
pub fn flag(value: &Value, path: &[&str]) -> bool {
    matches!(get(value, path), Some(Value::Bool(true)))
}

/// Integer stored either as a JSON number or a numeric string
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `dataSec.data` of a decoded response
pub fn data(response: &Value) -> Result<&Value> {
    at(response, &["dataSec", "data"])
}

/// Collect every integer tab id of a nested tab list.
///
/// Arrays and objects are walked recursively; numbers are kept, anything
/// else is ignored.
pub fn flatten_tabs(value: &Value) -> BTreeSet<i64> {
    let mut out = BTreeSet::new();
    collect_tabs(value, &mut out);
    out
}

fn collect_tabs(value: &Value, out: &mut BTreeSet<i64>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_tabs(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_tabs(item, out)),
        Value::Number(n) => {
            if let Some(id) = n.as_i64() {
                out.insert(id);
            }
        }
        _ => {}
    }
}
