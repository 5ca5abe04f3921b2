//! Header parsing: pre-header option rows, the header row itself, and the
//! typed column dictionary the rest of the compile pipeline works from.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::ident::{normalize_column_name, validate_column_name};
use crate::matchers::{CellValue, JsonMap, MatcherKind, DEFAULT_MATCHERS};

/// Table-level options. `matchers: None` means the default list; an empty
/// list disables matching entirely (equivalent to `text_only`).
#[derive(Debug, Clone)]
pub struct Options {
    pub first_match: bool,
    pub regexp_implicit: bool,
    pub text_only: bool,
    pub matchers: Option<Vec<MatcherKind>>,
}

impl Default for Options {
    fn default() -> Self {
        Options { first_match: true, regexp_implicit: false, text_only: false, matchers: None }
    }
}

impl Options {
    /// Matcher list in dispatch order, after applying `text_only`.
    pub fn matcher_kinds(&self) -> Vec<MatcherKind> {
        if self.text_only {
            return Vec::new();
        }
        match &self.matchers {
            Some(kinds) => kinds.clone(),
            None => DEFAULT_MATCHERS.to_vec(),
        }
    }

    /// Build options from a JSON map, validating keys. Accepts
    /// `"matchers": false` (disable), an array of matcher names, or null.
    pub fn from_map(map: &JsonMap) -> EngineResult<Options> {
        let mut opts = Options::default();
        for (key, value) in map {
            match key.as_str() {
                "first_match" => opts.first_match = expect_bool(key, value)?,
                "regexp_implicit" => opts.regexp_implicit = expect_bool(key, value)?,
                "text_only" => opts.text_only = expect_bool(key, value)?,
                "matchers" => match value {
                    Value::Null => opts.matchers = None,
                    Value::Bool(false) => opts.matchers = Some(Vec::new()),
                    Value::Array(names) => {
                        let mut kinds = Vec::with_capacity(names.len());
                        for n in names {
                            let name = n.as_str().ok_or_else(|| {
                                EngineError::option(
                                    "bad_option_value".to_string(),
                                    format!("matcher entries must be strings, got {}", n),
                                )
                            })?;
                            let kind = MatcherKind::from_name(name).ok_or_else(|| {
                                EngineError::cell(
                                    "unknown_matcher".to_string(),
                                    format!("unknown matcher type '{}'", name),
                                )
                            })?;
                            kinds.push(kind);
                        }
                        opts.matchers = Some(kinds);
                    }
                    other => {
                        return Err(EngineError::option(
                            "bad_option_value".to_string(),
                            format!("option 'matchers' does not accept {}", other),
                        ))
                    }
                },
                other => {
                    return Err(EngineError::option(
                        "unknown_option".to_string(),
                        format!("unknown option '{}'", other),
                    ))
                }
            }
        }
        Ok(opts)
    }
}

fn expect_bool(key: &str, value: &Value) -> EngineResult<bool> {
    value.as_bool().ok_or_else(|| {
        EngineError::option(
            "bad_option_value".to_string(),
            format!("option '{}' expects a boolean, got {}", key, value),
        )
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    In,
    Out,
    Guard,
    If,
    Set,
    SetNil,
    SetBlank,
    Path,
}

/// One header-column entry.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: Option<String>,
    pub ctype: ColumnType,
    pub text_only: Option<bool>,
    pub eval: Option<bool>,
    pub indexed: bool,
}

impl Column {
    /// Effective text-only flag for a column, combining the table option.
    pub fn effective_text_only(&self, table_text_only: bool) -> bool {
        table_text_only || self.text_only == Some(true)
    }

    pub fn anonymous(&self) -> bool {
        self.name.is_none()
    }
}

/// Gate deciding when a `set*` default applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultGate {
    Always,
    Nil,
    Blank,
}

/// Compiled default assignment for one `set*` column. The function cell is
/// taken from the column's first data row.
#[derive(Debug, Clone)]
pub struct DefaultEntry {
    pub name: String,
    pub function: CellValue,
    pub gate: DefaultGate,
}

/// Typed column dictionary keyed by 0-based column position. Input and
/// output columns interleave freely; `ins` names need not be unique.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    pub ins: BTreeMap<usize, Column>,
    pub outs: BTreeMap<usize, Column>,
    pub path: BTreeMap<usize, Column>,
    pub sets: BTreeMap<usize, Column>,
    pub defaults: BTreeMap<usize, DefaultEntry>,
}

/// Result of locating and parsing the header.
#[derive(Debug, Clone)]
pub struct Header {
    pub options: Options,
    pub dictionary: Dictionary,
    /// Index of the first data row in the original grid.
    pub data_start: usize,
    /// Original column positions kept after empty-header-column stripping.
    pub keep_cols: Vec<usize>,
}

static HEADER_CELL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\A(in/text|out/text|set/nil|set/blank|in|out|set|path|cond|guard|if)\s*:\s*(.*)\z")
        .expect("header cell regex")
});

fn is_header_row(row: &[String]) -> bool {
    row.iter().any(|c| HEADER_CELL_RE.is_match(c.trim()))
}

/// Apply one recognized pre-header option word. Unrecognized cells are
/// comment text and are skipped.
fn apply_option_word(cell: &str, opts: &mut Options) -> bool {
    match cell.trim().to_ascii_lowercase().as_str() {
        "first_match" => opts.first_match = true,
        "accumulate" => opts.first_match = false,
        "regexp_implicit" => opts.regexp_implicit = true,
        "text_only" | "string_search" => opts.text_only = true,
        _ => return false,
    }
    true
}

/// Scan the grid for option rows and the header row, then build the column
/// dictionary. Option words embedded in the grid override passed options.
pub fn parse_header(grid: &[Vec<String>], base: &Options) -> EngineResult<Header> {
    let mut options = base.clone();
    let mut header_idx = None;
    for (i, row) in grid.iter().enumerate() {
        if is_header_row(row) {
            header_idx = Some(i);
            break;
        }
        for cell in row {
            if !cell.trim().is_empty() && apply_option_word(cell, &mut options) {
                debug!("[PARSE HEADER] option row sets '{}'", cell.trim());
            }
        }
    }
    let Some(header_idx) = header_idx else {
        return Err(EngineError::structure(
            "missing_header".to_string(),
            "no header row found in grid".to_string(),
        ));
    };

    let header = &grid[header_idx];
    let mut keep_cols = Vec::new();
    let mut dictionary = Dictionary::default();
    let mut out_names: Vec<String> = Vec::new();

    for (orig_idx, raw) in header.iter().enumerate() {
        let cell = raw.trim();
        if cell.is_empty() {
            // Blank header cell: the column is stripped from every row.
            continue;
        }
        let caps = HEADER_CELL_RE.captures(cell).ok_or_else(|| {
            EngineError::cell(
                "bad_header_cell".to_string(),
                format!("header cell '{}' is not a recognized column declaration", cell),
            )
        })?;
        let type_word = caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
        let raw_name = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        let (ctype, text_only) = match type_word.as_str() {
            "in" => (ColumnType::In, None),
            "in/text" => (ColumnType::In, Some(true)),
            "cond" => (ColumnType::In, Some(false)),
            "out" => (ColumnType::Out, None),
            "out/text" => (ColumnType::Out, Some(true)),
            "guard" => (ColumnType::Guard, None),
            "if" => (ColumnType::If, None),
            "set" => (ColumnType::Set, None),
            "set/nil" => (ColumnType::SetNil, None),
            "set/blank" => (ColumnType::SetBlank, None),
            "path" => (ColumnType::Path, None),
            other => {
                return Err(EngineError::internal(
                    "bad_column_type".to_string(),
                    format!("unreachable column type '{}'", other),
                ))
            }
        };

        let name = match normalize_column_name(raw_name) {
            Some(n) => {
                validate_column_name(&n)?;
                Some(n)
            }
            None => None,
        };

        match ctype {
            ColumnType::Guard | ColumnType::If => {
                if name.is_some() {
                    return Err(EngineError::cell(
                        "unexpected_column_name".to_string(),
                        format!("'{}' columns are anonymous; '{}' carries a name", type_word, cell),
                    ));
                }
            }
            ColumnType::Path => {}
            // `cond` may be anonymous; every other type requires a name.
            _ => {
                if name.is_none() && type_word != "cond" {
                    return Err(EngineError::cell(
                        "missing_column_name".to_string(),
                        format!("header cell '{}' requires a column name", cell),
                    ));
                }
            }
        }

        let idx = keep_cols.len();
        keep_cols.push(orig_idx);
        let eval = matches!(ctype, ColumnType::Guard | ColumnType::If).then_some(true);
        let column = Column { name: name.clone(), ctype, text_only, eval, indexed: true };

        match ctype {
            ColumnType::In | ColumnType::Guard => {
                dictionary.ins.insert(idx, column);
            }
            ColumnType::Out | ColumnType::If => {
                if let Some(n) = &name {
                    if out_names.iter().any(|x| x == n) {
                        return Err(EngineError::structure(
                            "duplicate_out_name".to_string(),
                            format!("output column name '{}' appears more than once", n),
                        ));
                    }
                    out_names.push(n.clone());
                }
                dictionary.outs.insert(idx, column);
            }
            ColumnType::Path => {
                dictionary.path.insert(idx, column);
            }
            ColumnType::Set | ColumnType::SetNil | ColumnType::SetBlank => {
                dictionary.sets.insert(idx, column);
            }
        }
    }

    debug!(
        target: "tabula::parser",
        "header at row {}: {} ins, {} outs, {} sets, {} path cols",
        header_idx,
        dictionary.ins.len(),
        dictionary.outs.len(),
        dictionary.sets.len(),
        dictionary.path.len()
    );

    Ok(Header { options, dictionary, data_start: header_idx + 1, keep_cols })
}
