//! JSON documents as source files.
//!
//! A file is one JSON object mapping object names to either a table
//! (`columns` + row-major `rows`) or a non-table object carrying a `kind`:
//!
//! ```json
//! {
//!   "events": {
//!     "columns": [{"name": "pt", "type": "F"}, {"name": "hits", "type": "I[3]"}],
//!     "rows": [[12.5, [1, 2, 3]], [40.0, [4, 5, 6]]]
//!   },
//!   "summary": {"kind": "histogram"}
//! }
//! ```
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

use crate::data::value::Value;
use crate::error::SourceError;
use crate::source::{
    check_type_spec, ColumnInfo, IoStats, OpenMode, SourceFile, SourceObject, SourceTable,
    StorageEngine,
};

#[derive(Debug, Deserialize)]
struct ColumnDoc {
    name: String,
    #[serde(rename = "type")]
    type_spec: String,
    #[serde(default = "one")]
    leaves: usize,
}

fn one() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct TableDoc {
    columns: Vec<ColumnDoc>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ObjectDoc {
    Table(TableDoc),
    Other { kind: String },
}

#[derive(Debug)]
struct TableData {
    columns: Vec<ColumnInfo>,
    positions: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

enum JsonObject {
    Table(Rc<TableData>),
    Other(String),
}

/// Read-only engine over JSON documents
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileEngine;

impl JsonFileEngine {
    pub fn new() -> Self {
        Self
    }

    fn parse(path: &Path, contents: &str) -> Result<HashMap<String, JsonObject>, SourceError> {
        let parse_error = |message: String| SourceError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let docs: HashMap<String, ObjectDoc> =
            serde_json::from_str(contents).map_err(|e| parse_error(e.to_string()))?;

        let mut objects = HashMap::with_capacity(docs.len());
        for (name, doc) in docs {
            let object = match doc {
                ObjectDoc::Other { kind } => JsonObject::Other(kind),
                ObjectDoc::Table(table) => {
                    let mut columns = Vec::with_capacity(table.columns.len());
                    let mut positions = HashMap::new();
                    for (i, column) in table.columns.into_iter().enumerate() {
                        if column.leaves == 1 {
                            check_type_spec(path, &column.name, &column.type_spec)?;
                        }
                        if positions.insert(column.name.clone(), i).is_some() {
                            return Err(parse_error(format!(
                                "table `{name}` declares column `{}` twice",
                                column.name
                            )));
                        }
                        columns.push(
                            ColumnInfo::new(column.name, &column.type_spec)
                                .with_leaves(column.leaves),
                        );
                    }
                    if let Some(bad) = table.rows.iter().position(|r| r.len() != columns.len()) {
                        return Err(parse_error(format!(
                            "row {bad} of table `{name}` has {} values but {} columns",
                            table.rows[bad].len(),
                            columns.len()
                        )));
                    }
                    JsonObject::Table(Rc::new(TableData {
                        columns,
                        positions,
                        rows: table.rows,
                    }))
                }
            };
            objects.insert(name, object);
        }
        Ok(objects)
    }
}

impl StorageEngine for JsonFileEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn SourceFile>, SourceError> {
        if mode != OpenMode::Read {
            return Err(SourceError::Unsupported(format!(
                "JSON files can only be opened for reading ({mode:?} requested)"
            )));
        }
        debug!(target: "source", "Opening file '{}'", path.display());
        let contents = fs::read_to_string(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let objects = Self::parse(path, &contents)?;
        Ok(Box::new(JsonFile {
            path: path.to_path_buf(),
            objects,
            stats: Rc::new(IoStats::default()),
        }))
    }
}

struct JsonFile {
    path: PathBuf,
    objects: HashMap<String, JsonObject>,
    stats: Rc<IoStats>,
}

impl SourceFile for JsonFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&mut self, name: &str) -> Option<SourceObject> {
        match self.objects.get(name)? {
            JsonObject::Table(data) => Some(SourceObject::Table(Box::new(JsonTable {
                data: Rc::clone(data),
                inactive: BTreeSet::new(),
                stats: Rc::clone(&self.stats),
            }))),
            JsonObject::Other(kind) => Some(SourceObject::Other { kind: kind.clone() }),
        }
    }

    fn close(&mut self) {
        self.objects.clear();
    }

    fn bytes_read(&self) -> u64 {
        self.stats.bytes()
    }

    fn read_calls(&self) -> u64 {
        self.stats.calls()
    }
}

struct JsonTable {
    data: Rc<TableData>,
    inactive: BTreeSet<String>,
    stats: Rc<IoStats>,
}

impl SourceTable for JsonTable {
    fn columns(&self) -> Vec<ColumnInfo> {
        self.data.columns.clone()
    }

    fn num_rows(&self) -> u64 {
        self.data.rows.len() as u64
    }

    fn has_column(&self, name: &str) -> bool {
        self.data.positions.contains_key(name)
    }

    fn is_active(&self, name: &str) -> bool {
        self.has_column(name) && !self.inactive.contains(name)
    }

    fn set_active(&mut self, name: &str, active: bool) -> bool {
        if !self.has_column(name) {
            return false;
        }
        if active {
            self.inactive.remove(name);
        } else {
            self.inactive.insert(name.to_string());
        }
        true
    }

    fn read(&mut self, column: &str, row: u64) -> Result<Value, SourceError> {
        let position = *self
            .data
            .positions
            .get(column)
            .ok_or_else(|| SourceError::NoSuchColumn(column.to_string()))?;
        if self.inactive.contains(column) {
            return Err(SourceError::Inactive(column.to_string()));
        }
        let value = self
            .data
            .rows
            .get(row as usize)
            .map(|r| r[position].clone())
            .ok_or(SourceError::RowOutOfRange {
                row,
                rows: self.num_rows(),
            })?;
        self.stats.record(&value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_doc(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_table_and_other_object() {
        let file = write_doc(
            r#"{
                "events": {
                    "columns": [{"name": "pt", "type": "F"}, {"name": "hits", "type": "I[3]"}],
                    "rows": [[12.5, [1, 2, 3]], [40.0, [4, 5, 6]]]
                },
                "summary": {"kind": "histogram"}
            }"#,
        );
        let engine = JsonFileEngine::new();
        let mut source = engine.open(file.path(), OpenMode::Read).unwrap();
        let Some(SourceObject::Table(mut table)) = source.get("events") else {
            panic!("expected table");
        };
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.columns()[1].type_spec(), "I[3]");
        assert_eq!(table.read("pt", 1).unwrap(), Value::Float(40.0));
        assert_eq!(
            table.read("hits", 0).unwrap(),
            Value::from(vec![1i64, 2, 3])
        );
        assert!(matches!(
            source.get("summary"),
            Some(SourceObject::Other { kind }) if kind == "histogram"
        ));
        assert_eq!(source.read_calls(), 2);
        assert_eq!(source.bytes_read(), 8 + 24);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let file = write_doc(
            r#"{"events": {"columns": [{"name": "pt", "type": "F"}], "rows": [[1.0, 2.0]]}}"#,
        );
        assert!(matches!(
            JsonFileEngine::new().open(file.path(), OpenMode::Read),
            Err(SourceError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_and_write_modes() {
        let engine = JsonFileEngine::new();
        assert!(matches!(
            engine.open(Path::new("/definitely/not/here.json"), OpenMode::Read),
            Err(SourceError::Open { .. })
        ));
        let file = write_doc("{}");
        assert!(matches!(
            engine.open(file.path(), OpenMode::Recreate),
            Err(SourceError::Unsupported(_))
        ));
    }
}
