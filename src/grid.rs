//! Grid ingestion: turn CSV text or files into the two-dimensional string
//! grid the table parser consumes.

use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::header::Options;
use crate::table::{parse, Table};

/// Tokenize CSV text into a grid of trimmed cells. Rows may have ragged
/// lengths; the table parser pads them to the header width.
pub fn grid_from_csv_str(text: &str) -> EngineResult<Vec<Vec<String>>> {
    // Tolerate a UTF-8 BOM from spreadsheet exports.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            EngineError::cell("csv_read".to_string(), format!("CSV record error: {}", e))
        })?;
        grid.push(record.iter().map(|c| c.trim().to_string()).collect());
    }
    Ok(grid)
}

/// Parse a decision table from CSV text.
pub fn parse_csv_str(text: &str, options: Options) -> EngineResult<Table> {
    parse(grid_from_csv_str(text)?, options)
}

/// Parse a decision table from a CSV file. Any read or compile failure is
/// wrapped with the filename.
pub fn parse_csv_file<P: AsRef<Path>>(path: P, options: Options) -> EngineResult<Table> {
    let display = path.as_ref().display().to_string();
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        EngineError::wrap_file(
            &display,
            EngineError::cell("csv_read".to_string(), format!("cannot read file: {}", e)),
        )
    })?;
    parse_csv_str(&text, options).map_err(|e| match e {
        already @ EngineError::FileWrapped { .. } => already,
        other => EngineError::wrap_file(&display, other),
    })
}
