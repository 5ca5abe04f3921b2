//! Input-record parsing: normalize the caller's mapping, apply `set*`
//! defaults, retrieve per-column scan values and the index key tuple.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::header::{DefaultGate, Dictionary};
use crate::matchers::{canonical, CellValue, JsonMap};

static EMPTY_MAP: Lazy<JsonMap> = Lazy::new(JsonMap::new);

/// A query input transformed against a table's column dictionary.
#[derive(Debug, Clone)]
pub struct ParsedInput {
    /// Normalized input mapping, defaults applied.
    pub hash: JsonMap,
    /// Per-input-column retrieved value; absent keys have no entry.
    pub scan_cols: BTreeMap<usize, Value>,
    /// Canonical key tuple at the index's key columns, when every key column
    /// retrieved a keyable value.
    pub key: Option<Vec<String>>,
}

/// Deep-copying parse: the caller's mapping is left untouched.
pub fn parse_input(dict: &Dictionary, key_cols: Option<&[usize]>, source: &JsonMap) -> ParsedInput {
    let mut hash = source.clone();
    apply_defaults(dict, &mut hash);
    build(dict, key_cols, hash)
}

/// In-place parse: `set*` defaults are written back into the caller's map.
pub fn parse_input_mut(
    dict: &Dictionary,
    key_cols: Option<&[usize]>,
    source: &mut JsonMap,
) -> ParsedInput {
    apply_defaults(dict, source);
    build(dict, key_cols, source.clone())
}

/// Iterate `defaults` entries in column-index order; assign when the gate
/// holds for the current value of the named field.
pub fn apply_defaults(dict: &Dictionary, hash: &mut JsonMap) {
    for entry in dict.defaults.values() {
        let fire = match entry.gate {
            DefaultGate::Always => true,
            DefaultGate::Nil => is_nil(hash.get(&entry.name)),
            DefaultGate::Blank => is_blank(hash.get(&entry.name)),
        };
        if !fire {
            continue;
        }
        let value = match &entry.function {
            CellValue::Constant(v) => v.clone(),
            CellValue::Producer { func, .. } => func(hash, &EMPTY_MAP),
            // Empty default cell assigns nothing.
            _ => continue,
        };
        hash.insert(entry.name.clone(), value);
    }
}

fn build(dict: &Dictionary, key_cols: Option<&[usize]>, hash: JsonMap) -> ParsedInput {
    let mut scan_cols = BTreeMap::new();
    for (&idx, col) in dict.ins.iter() {
        let Some(name) = &col.name else { continue };
        if let Some(v) = hash.get(name) {
            scan_cols.insert(idx, v.clone());
        }
    }
    let key = key_cols.and_then(|cols| {
        let mut tuple = Vec::with_capacity(cols.len());
        for c in cols {
            tuple.push(canonical(scan_cols.get(c)?)?);
        }
        Some(tuple)
    });
    ParsedInput { hash, scan_cols, key }
}

pub fn is_nil(v: Option<&Value>) -> bool {
    matches!(v, None | Some(Value::Null))
}

pub fn is_blank(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}
