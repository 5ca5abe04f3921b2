//! Column-name normalization and validation utilities
//! ---------------------------------------------------
//! Single source of truth for turning raw header-cell names into the
//! canonical form used as keys in decision results and input lookups.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, EngineResult};

static COLUMN_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A[A-Za-z_][\w:/!?]*\z").expect("column name regex"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Normalize a raw header name: trim, then collapse interior whitespace runs
/// to a single `_`. Returns `None` for an absent name.
pub fn normalize_column_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(WHITESPACE_RE.replace_all(trimmed, "_").into_owned())
}

/// Validate a normalized column name. Names must start with a letter or `_`
/// and may continue with word characters plus `:`, `/`, `!`, `?`.
pub fn validate_column_name(name: &str) -> EngineResult<()> {
    if COLUMN_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(EngineError::cell(
            "bad_column_name".to_string(),
            format!("column name '{}' contains invalid characters", name),
        ))
    }
}
