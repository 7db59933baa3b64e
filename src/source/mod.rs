//! Storage engine interfaces
//!
//! The chain never touches files directly: it asks a [`StorageEngine`] to
//! open a path, looks up a named object in the resulting [`SourceFile`] and
//! reads single cells from a [`SourceTable`]. Three engines ship with the
//! crate: an in-memory one, JSON documents and CSV files.

pub mod csv_file;
pub mod json_file;
pub mod memory;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::data::registry;
use crate::data::value::Value;
use crate::error::SourceError;

pub use csv_file::CsvFileEngine;
pub use json_file::JsonFileEngine;
pub use memory::{MemoryEngine, MemoryTable};

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Update,
    Recreate,
}

impl OpenMode {
    /// Parse a mode string, accepting the `open()`-style aliases
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "" | "r" | "READ" => Some(OpenMode::Read),
            "r+" | "a" | "a+" | "UPDATE" => Some(OpenMode::Update),
            "w" | "w+" | "RECREATE" => Some(OpenMode::Recreate),
            _ => None,
        }
    }
}

/// Metadata for one column of a source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub leaf_type: String,
    pub length: usize,
    /// Number of underlying leaves; only single-leaf columns are supported
    pub leaves: usize,
}

impl ColumnInfo {
    /// Build from a type specification such as `F` or `I[4]`
    pub fn new(name: impl Into<String>, type_spec: &str) -> Self {
        let (leaf_type, length) = match type_spec.find('[') {
            Some(open) if type_spec.ends_with(']') => {
                let length = type_spec[open + 1..type_spec.len() - 1]
                    .parse()
                    .unwrap_or(1);
                (type_spec[..open].to_string(), length)
            }
            _ => (type_spec.to_string(), 1),
        };
        Self {
            name: name.into(),
            leaf_type,
            length,
            leaves: 1,
        }
    }

    pub fn with_leaves(mut self, leaves: usize) -> Self {
        self.leaves = leaves;
        self
    }

    pub fn is_supported(&self) -> bool {
        self.leaves == 1
    }

    /// Type specification understood by the registry
    pub fn type_spec(&self) -> String {
        if self.length > 1 {
            format!("{}[{}]", self.leaf_type, self.length)
        } else {
            self.leaf_type.clone()
        }
    }
}

/// An open table inside a source file
pub trait SourceTable {
    /// Column metadata in storage order
    fn columns(&self) -> Vec<ColumnInfo>;

    fn num_rows(&self) -> u64;

    fn has_column(&self, name: &str) -> bool {
        self.columns().iter().any(|c| c.name == name)
    }

    fn is_active(&self, name: &str) -> bool;

    /// Returns false when the column does not exist
    fn set_active(&mut self, name: &str, active: bool) -> bool;

    /// Read one column of one row
    fn read(&mut self, column: &str, row: u64) -> Result<Value, SourceError>;

    /// Add a new column (declare-only tables)
    fn create_column(&mut self, name: &str, type_spec: &str) -> Result<(), SourceError> {
        let _ = type_spec;
        Err(SourceError::Unsupported(format!(
            "cannot create column `{name}` in a read-only table"
        )))
    }

    fn set_cache_size(&mut self, _bytes: u64) {}

    fn set_cache_learn_entries(&mut self, _entries: u64) {}

    fn add_to_cache(&mut self, _column: &str) {}

    fn drop_from_cache(&mut self, _pattern: &str) {}
}

/// An object found in a source file
pub enum SourceObject {
    Table(Box<dyn SourceTable>),
    Other { kind: String },
}

/// An open file
pub trait SourceFile {
    fn path(&self) -> &Path;

    fn get(&mut self, name: &str) -> Option<SourceObject>;

    fn close(&mut self);

    fn bytes_read(&self) -> u64;

    fn read_calls(&self) -> u64;
}

/// Opens files by path
pub trait StorageEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn SourceFile>, SourceError>;
}

/// Picks the JSON or CSV engine from the file extension
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionEngine {
    json: JsonFileEngine,
    csv: CsvFileEngine,
}

impl ExtensionEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for ExtensionEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn SourceFile>, SourceError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => self.json.open(path, mode),
            Some("csv") => self.csv.open(path, mode),
            other => Err(SourceError::Unsupported(format!(
                "no engine for extension `{}` of '{}'",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }
}

/// Byte and call counters shared between a file and its tables
#[derive(Debug, Default)]
pub struct IoStats {
    bytes: Cell<u64>,
    calls: Cell<u64>,
}

impl IoStats {
    pub fn record(&self, value: &Value) {
        self.calls.set(self.calls.get() + 1);
        self.bytes.set(self.bytes.get() + value_size(value));
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.get()
    }

    pub fn calls(&self) -> u64 {
        self.calls.get()
    }
}

/// Approximate in-memory size of a value as stored on disk
pub fn value_size(value: &Value) -> u64 {
    match value {
        Value::Bool(_) => 1,
        Value::Text(s) => s.len() as u64 + 1,
        Value::Array(items) => items.iter().map(value_size).sum(),
        _ => 8,
    }
}

/// Expand `~` and `$VAR` / `${VAR}` in a path
pub fn expand_path(path: &str) -> PathBuf {
    static VAR: OnceLock<Regex> = OnceLock::new();
    let var = VAR.get_or_init(|| {
        Regex::new(r"\$(?:\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)\}|(?P<plain>[A-Za-z_][A-Za-z0-9_]*))")
            .expect("valid variable pattern")
    });
    let expanded = var.replace_all(path, |caps: &regex::Captures| {
        let name = caps
            .name("braced")
            .or_else(|| caps.name("plain"))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });
    if let Some(rest) = expanded.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest.trim_start_matches('/'));
            }
        }
    }
    PathBuf::from(expanded.into_owned())
}

/// Check that a declared type specification is known to the registry
pub(crate) fn check_type_spec(path: &Path, name: &str, type_spec: &str) -> Result<(), SourceError> {
    if registry::parse_type_spec(type_spec).is_none() {
        return Err(SourceError::Parse {
            path: path.to_path_buf(),
            message: format!("column `{name}` has unknown type `{type_spec}`"),
        });
    }
    Ok(())
}
