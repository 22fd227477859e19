//! Error types for tabmerge-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tabmerge-core
///
/// Per-file and per-table problems (unreadable inputs, missing fields, key
/// mapping gaps, dedup conflicts) are reported as data in the run reports.
/// Only the variants below abort an operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file parsed but does not contain a usable table
    #[error("failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    /// CSV parsing error from the csv crate
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Workbook reading error from calamine
    #[error("workbook error in '{path}': {source}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    /// Workbook writing error from rust_xlsxwriter
    #[error("failed to build workbook: {0}")]
    WorkbookWrite(#[from] rust_xlsxwriter::XlsxError),

    /// The file extension is not a known spreadsheet format
    #[error("unsupported spreadsheet format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Directory traversal error
    #[error("failed to traverse directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// The folder to load does not exist or is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Destination could not be written (locked, missing directory, ...)
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A conflict resolution referenced a variant that does not exist
    #[error("conflict for key {key:?} has {available} variant(s), cannot pick #{choice}")]
    InvalidResolution {
        key: Vec<String>,
        choice: usize,
        available: usize,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
