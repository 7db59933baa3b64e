//! Error types for tree reading, chaining and filtering.

use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Failures reported by a storage engine.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not open file: '{path}'")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed source `{path}`: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("column `{0}` does not exist")]
    NoSuchColumn(String),

    #[error("column `{0}` is not active")]
    Inactive(String),

    #[error("row {row} out of range for table with {rows} rows")]
    RowOutOfRange { row: u64, rows: u64 },

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

/// Errors raised by buffers, tables, chains and filters.
#[derive(Debug, Error)]
pub enum TreeError {
    // --- Configuration ---
    #[error("unable to initialize chain: no files")]
    NoFiles,

    #[error("unable to initialize chain `{0}`")]
    ChainInit(String),

    #[error("column `{name}` has unsupported type `{type_spec}`")]
    UnsupportedColumn { name: String, type_spec: String },

    #[error("duplicate column name `{0}`")]
    DuplicateColumn(String),

    #[error("attempting to bind column `{0}` which does not exist in the source")]
    MissingColumn(String),

    #[error("column `{0}` already exists in the source")]
    ColumnExists(String),

    #[error("illegal column name: `{0}`")]
    IllegalName(String),

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("char column `{name}` of length {length} cannot hold a null terminator")]
    InvalidLength { name: String, length: usize },

    #[error("column `{0}` specified in `always_read` does not exist")]
    AlwaysReadMissing(String),

    #[error("view `{0}` is not declared")]
    NoSuchView(String),

    #[error("cannot declare `{0}` while the buffer is bound to a live table")]
    SchemaLocked(String),

    // --- Per-row access ---
    #[error("no such column `{0}`")]
    NoSuchColumn(String),

    #[error("index {index} out of range for `{name}` of size {size}")]
    IndexOutOfRange {
        name: String,
        index: usize,
        size: usize,
    },

    #[error("assigning negative value ({0}) to unsigned type")]
    NegativeUnsigned(i64),

    #[error("value {value} out of range for type `{type_name}`")]
    OutOfRange {
        value: String,
        type_name: &'static str,
    },

    #[error("string of length {length} is too long to fit in array of length {capacity} with null-termination")]
    StringTooLong { length: usize, capacity: usize },

    #[error("cannot convert {found} to `{expected}`")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("cannot assign to `{0}`")]
    NotAssignable(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl TreeError {
    /// True for errors that abort construction rather than a single access.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TreeError::NoFiles
                | TreeError::ChainInit(_)
                | TreeError::UnsupportedColumn { .. }
                | TreeError::DuplicateColumn(_)
                | TreeError::MissingColumn(_)
                | TreeError::ColumnExists(_)
                | TreeError::IllegalName(_)
                | TreeError::UnknownType(_)
                | TreeError::InvalidLength { .. }
                | TreeError::AlwaysReadMissing(_)
                | TreeError::SchemaLocked(_)
        )
    }
}
