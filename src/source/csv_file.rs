//! CSV files as single-table sources.
//!
//! The table is named after the file stem. Header cells carry the column
//! type as `name:type` (for example `pt:F` or `hits:I[3]`) and array cells
//! separate their elements with `;`.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

use crate::data::cell::ScalarType;
use crate::data::registry;
use crate::data::value::Value;
use crate::error::SourceError;
use crate::source::{
    ColumnInfo, IoStats, OpenMode, SourceFile, SourceObject, SourceTable, StorageEngine,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFileEngine;

impl CsvFileEngine {
    pub fn new() -> Self {
        Self
    }
}

struct CsvData {
    columns: Vec<ColumnInfo>,
    positions: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

fn parse_scalar(elem: ScalarType, field: &str) -> Option<Value> {
    let field = field.trim();
    match elem {
        ScalarType::Bool => match field {
            "1" | "true" | "True" => Some(Value::Bool(true)),
            "0" | "false" | "False" | "" => Some(Value::Bool(false)),
            _ => None,
        },
        ScalarType::Float | ScalarType::Double => {
            if field.is_empty() {
                Some(Value::Float(0.0))
            } else {
                field.parse::<f64>().ok().map(Value::Float)
            }
        }
        _ if field.is_empty() => Some(Value::Int(0)),
        // unsigned columns keep negative input so the cell reports it
        _ => field
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| field.parse::<u64>().map(Value::UInt))
            .ok(),
    }
}

fn parse_field(elem: ScalarType, length: usize, field: &str) -> Option<Value> {
    if elem.is_char() {
        return Some(Value::Text(field.to_string()));
    }
    if length > 1 {
        let items = if field.trim().is_empty() {
            Vec::new()
        } else {
            field
                .split(';')
                .map(|item| parse_scalar(elem, item))
                .collect::<Option<Vec<_>>>()?
        };
        return Some(Value::Array(items));
    }
    parse_scalar(elem, field)
}

fn load(path: &Path) -> Result<CsvData, SourceError> {
    let parse_error = |message: String| SourceError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let file = File::open(path).map_err(|source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| parse_error(e.to_string()))?
        .clone();

    let mut columns = Vec::with_capacity(headers.len());
    let mut types = Vec::with_capacity(headers.len());
    let mut positions = HashMap::new();
    for (i, header) in headers.iter().enumerate() {
        let (name, type_spec) = header
            .rsplit_once(':')
            .ok_or_else(|| parse_error(format!("header `{header}` is not `name:type`")))?;
        let (elem, length) = registry::parse_type_spec(type_spec)
            .ok_or_else(|| parse_error(format!("column `{name}` has unknown type `{type_spec}`")))?;
        positions.insert(name.to_string(), i);
        columns.push(ColumnInfo::new(name, type_spec));
        types.push((elem, length.unwrap_or(1)));
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| parse_error(e.to_string()))?;
        let row = record
            .iter()
            .zip(&types)
            .zip(&columns)
            .map(|((field, (elem, length)), column)| {
                parse_field(*elem, *length, field).ok_or_else(|| {
                    parse_error(format!(
                        "row {line}: cannot parse `{field}` for column `{}`",
                        column.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }

    info!(
        target: "source",
        "Loaded CSV {}: {} rows, {} columns",
        path.display(),
        rows.len(),
        columns.len()
    );
    Ok(CsvData {
        columns,
        positions,
        rows,
    })
}

impl StorageEngine for CsvFileEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn SourceFile>, SourceError> {
        if mode != OpenMode::Read {
            return Err(SourceError::Unsupported(format!(
                "CSV files can only be opened for reading ({mode:?} requested)"
            )));
        }
        debug!(target: "source", "Opening file '{}'", path.display());
        let data = load(path)?;
        let table_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Box::new(CsvFile {
            path: path.to_path_buf(),
            table_name,
            data: Some(Rc::new(data)),
            stats: Rc::new(IoStats::default()),
        }))
    }
}

struct CsvFile {
    path: PathBuf,
    table_name: String,
    data: Option<Rc<CsvData>>,
    stats: Rc<IoStats>,
}

impl SourceFile for CsvFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&mut self, name: &str) -> Option<SourceObject> {
        if name != self.table_name {
            return None;
        }
        let data = Rc::clone(self.data.as_ref()?);
        Some(SourceObject::Table(Box::new(CsvTable {
            data,
            inactive: BTreeSet::new(),
            stats: Rc::clone(&self.stats),
        })))
    }

    fn close(&mut self) {
        self.data = None;
    }

    fn bytes_read(&self) -> u64 {
        self.stats.bytes()
    }

    fn read_calls(&self) -> u64 {
        self.stats.calls()
    }
}

struct CsvTable {
    data: Rc<CsvData>,
    inactive: BTreeSet<String>,
    stats: Rc<IoStats>,
}

impl SourceTable for CsvTable {
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
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_csv_table_named_after_stem() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.csv");
        fs::write(
            &path,
            "run:UI,pt:F,hits:I[3],tag:C[8]\n1,12.5,1;2;3,mu\n1,40,,e\n",
        )
        .unwrap();

        let mut file = CsvFileEngine::new().open(&path, OpenMode::Read).unwrap();
        assert!(file.get("other").is_none());
        let Some(SourceObject::Table(mut table)) = file.get("events") else {
            panic!("expected table");
        };
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.read("pt", 1).unwrap(), Value::Float(40.0));
        assert_eq!(table.read("hits", 0).unwrap(), Value::from(vec![1, 2, 3]));
        assert_eq!(table.read("hits", 1).unwrap(), Value::Array(vec![]));
        assert_eq!(table.read("tag", 0).unwrap(), Value::from("mu"));
    }

    #[test]
    fn test_bad_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.csv");
        fs::write(&path, "pt,eta\n1,2\n").unwrap();
        assert!(matches!(
            CsvFileEngine::new().open(&path, OpenMode::Read),
            Err(SourceError::Parse { .. })
        ));
    }
}
