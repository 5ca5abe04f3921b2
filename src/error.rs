//! Unified engine error model.
//! This module provides the common error enum used across the parse pipeline
//! (header, matchers, table build) and the grid ingestion layer, along with
//! constructor helpers per kind.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineError {
    CellValidation { code: String, message: String },
    TableStructure { code: String, message: String },
    OptionValidation { code: String, message: String },
    FileWrapped { code: String, message: String },
    Internal { code: String, message: String },
}

impl EngineError {
    pub fn code_str(&self) -> &str {
        match self {
            EngineError::CellValidation { code, .. }
            | EngineError::TableStructure { code, .. }
            | EngineError::OptionValidation { code, .. }
            | EngineError::FileWrapped { code, .. }
            | EngineError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            EngineError::CellValidation { message, .. }
            | EngineError::TableStructure { message, .. }
            | EngineError::OptionValidation { message, .. }
            | EngineError::FileWrapped { message, .. }
            | EngineError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn cell<S: Into<String>>(code: S, msg: S) -> Self { EngineError::CellValidation { code: code.into(), message: msg.into() } }
    pub fn structure<S: Into<String>>(code: S, msg: S) -> Self { EngineError::TableStructure { code: code.into(), message: msg.into() } }
    pub fn option<S: Into<String>>(code: S, msg: S) -> Self { EngineError::OptionValidation { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { EngineError::Internal { code: code.into(), message: msg.into() } }

    /// Wrap any engine error raised while parsing a file source; the filename is
    /// folded into the message so callers can see where the bad cell came from.
    pub fn wrap_file(path: &str, inner: EngineError) -> Self {
        EngineError::FileWrapped {
            code: inner.code_str().to_string(),
            message: format!("{}: {}", path, inner.message()),
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
