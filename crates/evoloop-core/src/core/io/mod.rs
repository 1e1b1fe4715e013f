//! CSV input and output for labels, round ledgers, representation tables, and reports.
//!
//! Readers accept any [`std::io::Read`] together with a source name used in error
//! messages; the `*_path` variants open files. Row numbers in errors are 1-based line
//! numbers including the header.

pub mod labels;
pub mod ledger;
pub mod reports;
pub mod table;

use crate::core::error::ValidationError;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Invalid entry in '{path}' at line {line}: {source}")]
    Validation {
        path: String,
        line: usize,
        source: ValidationError,
    },
    #[error("Malformed row in '{path}' at line {line}: {message}")]
    Malformed {
        path: String,
        line: usize,
        message: String,
    },
}

pub(crate) fn path_label(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub(crate) fn open_file(path: &Path) -> Result<std::fs::File, IoError> {
    std::fs::File::open(path).map_err(|e| IoError::Io {
        path: path_label(path),
        source: e,
    })
}

pub(crate) fn create_file(path: &Path) -> Result<std::fs::File, IoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| IoError::Io {
            path: path_label(parent),
            source: e,
        })?;
    }
    std::fs::File::create(path).map_err(|e| IoError::Io {
        path: path_label(path),
        source: e,
    })
}

/// Line number of a deserialized record, falling back to the data row index.
pub(crate) fn line_of(position: Option<&csv::Position>, row_index: usize) -> usize {
    position
        .map(|p| p.line() as usize)
        .unwrap_or(row_index + 2)
}
