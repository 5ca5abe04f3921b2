use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::header::{ColumnType, Dictionary, Options};
use crate::input::ParsedInput;
use crate::matchers::{canonical, compile_cell, loose_eq, CellValue, MatchContext, Matcher};

static NULL_VALUE: Lazy<Value> = Lazy::new(|| Value::Null);

static PATH_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A:?([A-Za-z_]\w*)\z").expect("path segment regex"));

/// Per-row classification of input columns into constants and predicates,
/// plus the row's path segments. A column index belongs to at most one of
/// `constants`/`procs`; empty input cells belong to neither.
#[derive(Debug, Clone, Default)]
pub struct ScanRow {
    pub constants: Vec<usize>,
    pub procs: Vec<usize>,
    pub path: Vec<String>,
}

impl ScanRow {
    /// Does this row match the parsed input? Constants compare by canonical
    /// equality against the column's retrieved value; predicates run against
    /// `(value, hash)`. Output cells are not consulted here.
    pub fn matches(&self, cells: &[CellValue], input: &ParsedInput) -> bool {
        for &ci in &self.constants {
            let CellValue::Constant(want) = &cells[ci] else {
                return false;
            };
            match input.scan_cols.get(&ci) {
                Some(v) => {
                    if !loose_eq(want, v) {
                        return false;
                    }
                }
                // Absent key: only a typed nil constant accepts it.
                None => {
                    if !want.is_null() {
                        return false;
                    }
                }
            }
        }
        for &ci in &self.procs {
            let CellValue::Predicate { func, .. } = &cells[ci] else {
                return false;
            };
            let v = input.scan_cols.get(&ci).unwrap_or(&NULL_VALUE);
            if !func(v, &input.hash) {
                return false;
            }
        }
        true
    }
}

/// Compile one data row against the column dictionary. Returns the compiled
/// cells (indexed by column position) plus the input-side and output-side
/// scan rows. Updates per-column `indexed` flags on the dictionary as cells
/// disqualify their column from index keys.
pub fn compile_row(
    row: &[String],
    dict: &mut Dictionary,
    matchers: &[Box<dyn Matcher>],
    options: &Options,
) -> EngineResult<(Vec<CellValue>, ScanRow, ScanRow)> {
    let last_col = dict
        .ins
        .keys()
        .chain(dict.outs.keys())
        .chain(dict.path.keys())
        .chain(dict.sets.keys())
        .max()
        .copied()
        .map(|m| m + 1)
        .unwrap_or(0);
    let width = row.len().max(last_col);
    let mut cells: Vec<CellValue> = vec![CellValue::Empty; width];
    let mut scan_row = ScanRow::default();
    let mut outs_row = ScanRow::default();

    for (&idx, col) in dict.ins.iter_mut() {
        let raw = row.get(idx).map(String::as_str).unwrap_or("");
        let guard_like = col.ctype == ColumnType::Guard || col.anonymous();
        let compiled = if col.effective_text_only(options.text_only) {
            if raw.trim().is_empty() {
                CellValue::Empty
            } else {
                CellValue::Constant(Value::String(raw.trim().to_string()))
            }
        } else {
            let ctx = MatchContext {
                regexp_implicit: options.regexp_implicit,
                outs: false,
                anonymous: guard_like,
            };
            compile_cell(raw, matchers, &ctx)?
        };
        match compiled {
            CellValue::Empty => {
                // Wildcard; an empty cell also disqualifies the column as an
                // index key.
                col.indexed = false;
            }
            CellValue::Constant(v) => {
                if guard_like {
                    return Err(EngineError::cell(
                        "constant_in_guard".to_string(),
                        format!("cell '{}' is a constant; guard cells must be expressions", raw.trim()),
                    ));
                }
                if canonical(&v).is_none() {
                    col.indexed = false;
                }
                scan_row.constants.push(idx);
                cells[idx] = CellValue::Constant(v);
            }
            CellValue::Predicate { kind, func } => {
                col.indexed = false;
                scan_row.procs.push(idx);
                cells[idx] = CellValue::Predicate { kind, func };
            }
            CellValue::Producer { .. } => {
                return Err(EngineError::internal(
                    "producer_in_input".to_string(),
                    format!("input cell '{}' compiled to an output producer", raw.trim()),
                ));
            }
        }
    }

    for (&idx, col) in dict.outs.iter() {
        let raw = row.get(idx).map(String::as_str).unwrap_or("");
        let is_if = col.ctype == ColumnType::If;
        let compiled = if col.effective_text_only(options.text_only) {
            if raw.trim().is_empty() {
                CellValue::Empty
            } else {
                CellValue::Constant(Value::String(raw.trim().to_string()))
            }
        } else {
            let ctx = MatchContext {
                regexp_implicit: options.regexp_implicit,
                outs: true,
                anonymous: is_if,
            };
            compile_cell(raw, matchers, &ctx)?
        };
        match compiled {
            CellValue::Empty => {}
            CellValue::Constant(v) => {
                if is_if {
                    return Err(EngineError::cell(
                        "constant_in_if".to_string(),
                        format!("cell '{}' is a constant; if: cells must be expressions", raw.trim()),
                    ));
                }
                outs_row.constants.push(idx);
                cells[idx] = CellValue::Constant(v);
            }
            CellValue::Producer { kind, func } => {
                outs_row.procs.push(idx);
                cells[idx] = CellValue::Producer { kind, func };
            }
            CellValue::Predicate { .. } => {
                return Err(EngineError::internal(
                    "predicate_in_output".to_string(),
                    format!("output cell '{}' compiled to an input predicate", raw.trim()),
                ));
            }
        }
    }

    for (&idx, _col) in dict.path.iter() {
        let raw = row.get(idx).map(String::as_str).unwrap_or("").trim().to_string();
        if raw.is_empty() {
            continue;
        }
        let caps = PATH_SEGMENT_RE.captures(&raw).ok_or_else(|| {
            EngineError::cell(
                "bad_path_segment".to_string(),
                format!("path cell '{}' is not a key name", raw),
            )
        })?;
        scan_row.path.push(caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default());
    }

    // `set*` cells never participate in matching; their first-row cells are
    // compiled separately into dictionary defaults.

    Ok((cells, scan_row, outs_row))
}
