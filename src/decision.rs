use serde_json::Value;
use tracing::debug;

use crate::header::ColumnType;
use crate::input::{parse_input, parse_input_mut, ParsedInput};
use crate::matchers::{truthy, CellValue, JsonMap};
use crate::table::{PathGroup, RowRange, Table};

/// Per-query result accumulator. Created per call, discarded on return; the
/// table is only borrowed.
struct Decision<'a> {
    table: &'a Table,
    first_match: bool,
    multi_result: bool,
    picked: Vec<JsonMap>,
}

impl<'a> Decision<'a> {
    fn new(table: &'a Table) -> Self {
        Decision {
            table,
            first_match: table.options.first_match,
            multi_result: !table.options.first_match && table.outs_functions,
            picked: Vec::new(),
        }
    }
}

/// Evaluate `source` against the table, deep-copying at the boundary.
pub fn make(table: &Table, source: &JsonMap) -> JsonMap {
    if let Some(paths) = &table.paths {
        return scan_paths(table, paths, source);
    }
    let key_cols = table.index.as_ref().map(|i| i.columns.as_slice());
    let input = parse_input(&table.columns, key_cols, source);
    decide(table, &input)
}

/// Evaluate in place: defaults are written back into the caller's map.
pub fn make_mut(table: &Table, source: &mut JsonMap) -> JsonMap {
    if let Some(paths) = &table.paths {
        return scan_paths(table, paths, source);
    }
    let key_cols = table.index.as_ref().map(|i| i.columns.as_slice());
    let input = parse_input_mut(&table.columns, key_cols, source);
    decide(table, &input)
}

fn decide(table: &Table, input: &ParsedInput) -> JsonMap {
    let mut decision = Decision::new(table);

    if let Some(index) = &table.index {
        let Some(key) = &input.key else {
            // A missing or un-keyable value on a key column cannot match any
            // row: every key-column cell is a constant.
            return JsonMap::new();
        };
        let Some(ranges) = index.lookup(key) else {
            return JsonMap::new();
        };
        debug!(target: "tabula::decide", "indexed scan, {} ranges", ranges.len());
        if let Some(early) = decision.scan_ranges(ranges, input) {
            return early;
        }
    } else {
        let all = (0, table.rows.len().checked_sub(1));
        if table.rows.is_empty() {
            return JsonMap::new();
        }
        if let Some(early) = decision.scan_ranges(&[all], input) {
            return early;
        }
    }
    decision.finish()
}

fn scan_paths(table: &Table, groups: &[PathGroup], source: &JsonMap) -> JsonMap {
    let mut decision = Decision::new(table);
    for group in groups {
        let Some(sub) = descend(source, &group.segments) else {
            continue;
        };
        // Each distinct path is parsed once per query; groups are merged by
        // segments at parse time.
        let input = parse_input(&table.columns, None, sub);
        if let Some(early) = decision.scan_ranges(&group.ranges, &input) {
            return early;
        }
    }
    decision.finish()
}

fn descend<'a>(source: &'a JsonMap, segments: &[String]) -> Option<&'a JsonMap> {
    let mut current = source;
    for seg in segments {
        current = current.get(seg)?.as_object()?;
    }
    Some(current)
}

impl<'a> Decision<'a> {
    /// Iterate the given row ranges in order. Returns `Some(result)` when a
    /// first-match scan accepts a row; accumulate scans always return `None`
    /// and collect into `picked`.
    fn scan_ranges(&mut self, ranges: &[RowRange], input: &ParsedInput) -> Option<JsonMap> {
        for &(start, end) in ranges {
            for r in start..=end.unwrap_or(start) {
                if !self.table.scan_rows[r].matches(&self.table.rows[r], input) {
                    continue;
                }
                let Some(attrs) = assemble_row(self.table, input, r) else {
                    // Rejected by an `if:` guard; scanning resumes.
                    continue;
                };
                if self.first_match {
                    debug!(target: "tabula::decide", "first match at row {}", r);
                    return Some(attrs);
                }
                self.picked.push(attrs);
            }
        }
        None
    }

    /// Assemble the accumulate-mode result: scalars for a single picked row,
    /// sequences in pick order otherwise.
    fn finish(self) -> JsonMap {
        let mut picked = self.picked;
        match picked.len() {
            0 => JsonMap::new(),
            1 => picked.remove(0),
            _ => {
                if self.multi_result {
                    debug!(target: "tabula::decide", "multi-result over {} rows", picked.len());
                }
                let mut out = JsonMap::new();
                for col in self.table.columns.outs.values() {
                    let Some(name) = &col.name else { continue };
                    let vals: Vec<Value> =
                        picked.iter().filter_map(|attrs| attrs.get(name).cloned()).collect();
                    if !vals.is_empty() {
                        out.insert(name.clone(), Value::Array(vals));
                    }
                }
                out
            }
        }
    }
}

/// Build one matched row's output attrs: constants first, then value
/// producers (which read the input hash), then `if:` guards against the
/// attrs under construction. Returns `None` when an `if:` guard rejects.
fn assemble_row(table: &Table, input: &ParsedInput, r: usize) -> Option<JsonMap> {
    let mut attrs = JsonMap::new();
    let outs_row = &table.outs_rows[r];
    let cells = &table.rows[r];

    for &ci in &outs_row.constants {
        let Some(col) = table.columns.outs.get(&ci) else { continue };
        if let (Some(name), CellValue::Constant(v)) = (&col.name, &cells[ci]) {
            attrs.insert(name.clone(), v.clone());
        }
    }
    for &ci in &outs_row.procs {
        let Some(col) = table.columns.outs.get(&ci) else { continue };
        if col.ctype == ColumnType::If {
            continue;
        }
        if let (Some(name), CellValue::Producer { func, .. }) = (&col.name, &cells[ci]) {
            let v = func(&input.hash, &attrs);
            attrs.insert(name.clone(), v);
        }
    }
    for &ci in &outs_row.procs {
        let Some(col) = table.columns.outs.get(&ci) else { continue };
        if col.ctype != ColumnType::If {
            continue;
        }
        if let CellValue::Producer { func, .. } = &cells[ci] {
            let verdict = func(&input.hash, &attrs);
            if !truthy(Some(&verdict)) {
                return None;
            }
        }
    }
    Some(attrs)
}
