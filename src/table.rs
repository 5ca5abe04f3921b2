use std::collections::HashMap;
use tracing::debug;

use crate::decision;
use crate::error::{EngineError, EngineResult};
use crate::header::{parse_header, ColumnType, DefaultEntry, DefaultGate, Dictionary, Options};
use crate::matchers::{build_matchers, canonical, compile_cell, CellValue, JsonMap, MatchContext};
use crate::scan::{compile_row, ScanRow};

/// A contiguous run of row indices; `(start, None)` is an isolated row.
pub type RowRange = (usize, Option<usize>);

/// Map from a tuple of constant key-column values to the row ranges sharing
/// that key. Built eagerly at parse time.
#[derive(Debug, Clone)]
pub struct Index {
    pub columns: Vec<usize>,
    pub hash: HashMap<Vec<String>, Vec<RowRange>>,
}

impl Index {
    pub fn lookup(&self, key: &[String]) -> Option<&[RowRange]> {
        self.hash.get(key).map(|v| v.as_slice())
    }
}

/// Rows sharing one path (sequence of keys into a nested input record), in
/// declaration order.
#[derive(Debug, Clone)]
pub struct PathGroup {
    pub segments: Vec<String>,
    pub ranges: Vec<RowRange>,
}

/// A compiled decision table. Immutable after `parse`; shareable across
/// threads without synchronization.
#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Dictionary,
    pub options: Options,
    pub rows: Vec<Vec<CellValue>>,
    pub scan_rows: Vec<ScanRow>,
    pub outs_rows: Vec<ScanRow>,
    pub index: Option<Index>,
    pub paths: Option<Vec<PathGroup>>,
    /// True iff any output column contains a producer in at least one row.
    pub outs_functions: bool,
}

impl Table {
    /// Evaluate an input record. The caller's map is deep-copied at the
    /// boundary; a record matching no row yields the empty mapping.
    pub fn decide(&self, input: &JsonMap) -> JsonMap {
        decision::make(self, input)
    }

    /// Like [`Table::decide`] but mutates the caller's map in place: `set*`
    /// defaults are written back into it.
    pub fn decide_mut(&self, input: &mut JsonMap) -> JsonMap {
        decision::make_mut(self, input)
    }
}

/// Compile a two-dimensional grid of strings into a decision table.
pub fn parse(grid: Vec<Vec<String>>, options: Options) -> EngineResult<Table> {
    let header = parse_header(&grid, &options)?;
    let options = header.options;
    let mut dictionary = header.dictionary;
    let keep_cols = header.keep_cols;
    let matchers = build_matchers(&options.matcher_kinds());

    let mut rows: Vec<Vec<CellValue>> = Vec::new();
    let mut scan_rows: Vec<ScanRow> = Vec::new();
    let mut outs_rows: Vec<ScanRow> = Vec::new();

    for (row_no, raw) in grid[header.data_start..].iter().enumerate() {
        // Project the kept header columns; short rows pad with empty cells.
        let row: Vec<String> = keep_cols
            .iter()
            .map(|&c| raw.get(c).map(|s| s.trim().to_string()).unwrap_or_default())
            .collect();
        if let Some(extra) = raw.get(keep_cols.iter().max().map(|m| m + 1).unwrap_or(0)..) {
            if extra.iter().any(|c| !c.trim().is_empty()) {
                return Err(EngineError::structure(
                    "row_too_wide".to_string(),
                    format!("data row {} has cells beyond the header width", row_no),
                ));
            }
        }
        let (cells, scan_row, outs_row) = compile_row(&row, &mut dictionary, &matchers, &options)?;

        if rows.is_empty() {
            compile_defaults(&row, &mut dictionary, &matchers, &options)?;
        }
        rows.push(cells);
        scan_rows.push(scan_row);
        outs_rows.push(outs_row);
    }

    let outs_functions = outs_rows.iter().any(|r| !r.procs.is_empty());

    let (index, paths) = if dictionary.path.is_empty() {
        (build_index(&dictionary, &rows), None)
    } else {
        (None, Some(build_paths(&scan_rows)))
    };

    debug!(
        target: "tabula::parser",
        "compiled table: {} rows, index={}, paths={}, outs_functions={}",
        rows.len(),
        index.as_ref().map(|i| i.columns.len()).unwrap_or(0),
        paths.as_ref().map(|p| p.len()).unwrap_or(0),
        outs_functions
    );

    Ok(Table { columns: dictionary, options, rows, scan_rows, outs_rows, index, paths, outs_functions })
}

/// Compile `set*` default functions from the first data row.
fn compile_defaults(
    first_row: &[String],
    dict: &mut Dictionary,
    matchers: &[Box<dyn crate::matchers::Matcher>],
    options: &Options,
) -> EngineResult<()> {
    let sets: Vec<(usize, ColumnType, String)> = dict
        .sets
        .iter()
        .map(|(&i, c)| (i, c.ctype, c.name.clone().unwrap_or_default()))
        .collect();
    for (idx, ctype, name) in sets {
        let raw = first_row.get(idx).map(String::as_str).unwrap_or("");
        let ctx = MatchContext {
            regexp_implicit: options.regexp_implicit,
            outs: true,
            anonymous: false,
        };
        let function = compile_cell(raw, matchers, &ctx)?;
        let gate = match ctype {
            ColumnType::Set => DefaultGate::Always,
            ColumnType::SetNil => DefaultGate::Nil,
            ColumnType::SetBlank => DefaultGate::Blank,
            other => {
                return Err(EngineError::internal(
                    "bad_set_type".to_string(),
                    format!("unreachable default column type {:?}", other),
                ))
            }
        };
        dict.defaults.insert(idx, DefaultEntry { name, function, gate });
    }
    Ok(())
}

/// Key columns are `in` columns whose every cell is a keyable constant;
/// contiguous rows sharing a key tuple collapse into ranges.
fn build_index(dict: &Dictionary, rows: &[Vec<CellValue>]) -> Option<Index> {
    if rows.is_empty() {
        return None;
    }
    let columns: Vec<usize> = dict
        .ins
        .iter()
        .filter(|(_, col)| col.indexed && col.ctype == ColumnType::In && !col.anonymous())
        .map(|(&i, _)| i)
        .collect();
    if columns.is_empty() {
        return None;
    }

    let mut hash: HashMap<Vec<String>, Vec<RowRange>> = HashMap::new();
    for (r, cells) in rows.iter().enumerate() {
        let mut key = Vec::with_capacity(columns.len());
        for &c in &columns {
            match &cells[c] {
                CellValue::Constant(v) => match canonical(v) {
                    Some(s) => key.push(s),
                    None => return None,
                },
                // An indexed column only holds constants; anything else is a
                // bookkeeping bug upstream.
                _ => return None,
            }
        }
        push_run(hash.entry(key).or_default(), r);
    }
    debug!("[PARSE INDEX] key columns {:?}, {} distinct keys", columns, hash.len());
    Some(Index { columns, hash })
}

/// Group rows by their declared path, preserving declaration order and
/// collapsing contiguous row runs.
fn build_paths(scan_rows: &[ScanRow]) -> Vec<PathGroup> {
    let mut groups: Vec<PathGroup> = Vec::new();
    for (r, scan) in scan_rows.iter().enumerate() {
        if let Some(group) = groups.iter_mut().find(|g| g.segments == scan.path) {
            push_run(&mut group.ranges, r);
        } else {
            groups.push(PathGroup { segments: scan.path.clone(), ranges: vec![(r, None)] });
        }
    }
    groups
}

/// Append row `r` to the run list, extending the last range when contiguous.
fn push_run(runs: &mut Vec<RowRange>, r: usize) {
    let extends = matches!(runs.last(), Some(&(start, end)) if end.unwrap_or(start) + 1 == r);
    if extends {
        if let Some(last) = runs.last_mut() {
            last.1 = Some(r);
        }
    } else {
        runs.push((r, None));
    }
}
