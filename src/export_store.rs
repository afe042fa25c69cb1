//! Per-request store of values exported with `@export(as: "...")`.
//!
//! Exports are scoped by response path: a value is visible to every field
//! positioned at or below the object that exported it. List indices are not
//! part of the scope, so a value exported inside a list element is visible to
//! every element of that list.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::response_path::{PathSegment, ResponsePath};

pub const EXPORTS_PREFIX: &str = "exports.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRecord {
    pub key: String,
    pub depth: usize,
}

#[derive(Default)]
struct ExportState {
    records: HashMap<String, ExportRecord>,
    values: HashMap<String, Value>,
}

#[derive(Default)]
pub struct ExportStore {
    state: RwLock<ExportState>,
}

impl ExportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `name`, exported by the field at `path`.
    pub fn store(&self, name: &str, value: Value, path: &ResponsePath) {
        let scope = captured_scope(path);
        let storage_key = storage_key(name, &scope);
        tracing::debug!(export = name, key = %storage_key, "storing exported value");

        let mut state = self.state.write();
        state.records.insert(
            name.to_string(),
            ExportRecord {
                key: name.to_string(),
                depth: scope.len(),
            },
        );
        state.values.insert(storage_key, value);
    }

    /// Resolves `exports.<name>[.<nested.path>]` as seen from `path`.
    ///
    /// Returns `None` when nothing matching has been exported (yet).
    pub fn load(&self, reference: &str, path: &ResponsePath) -> Option<Value> {
        let (name, nested) = parse_reference(reference)?;

        let state = self.state.read();
        let depth = state.records.get(name)?.depth;

        let segments = path.segments();
        if segments.len() < depth {
            return None;
        }

        let value = state.values.get(&storage_key(name, &segments[..depth]))?;
        match nested {
            Some(nested) => lookup_nested(value, nested).cloned(),
            None => Some(value.clone()),
        }
    }

    pub fn record(&self, name: &str) -> Option<ExportRecord> {
        self.state.read().records.get(name).cloned()
    }
}

/// Splits `exports.<name>.<nested>` into `(name, Some(nested))`.
pub fn parse_reference(reference: &str) -> Option<(&str, Option<&str>)> {
    let rest = reference.strip_prefix(EXPORTS_PREFIX)?;
    let (name, nested) = match rest.split_once('.') {
        Some((name, nested)) => (name, Some(nested)),
        None => (rest, None),
    };

    if name.is_empty() || nested.is_some_and(str::is_empty) {
        return None;
    }
    Some((name, nested))
}

/// Walks `a.b.0.c` through objects and arrays.
pub fn lookup_nested<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// The scope of an export is the exporting field's parent object, cut before
// the first list index counted from the root.
fn captured_scope(path: &ResponsePath) -> Vec<PathSegment> {
    let parent = path.parent().cloned().unwrap_or_default();
    parent
        .segments()
        .into_iter()
        .take_while(|segment| matches!(segment, PathSegment::Key(_)))
        .collect()
}

fn storage_key(name: &str, prefix: &[PathSegment]) -> String {
    let prefix = prefix
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".");
    format!("{}:{}", name, prefix)
}
