use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::data::registry;
use crate::data::value::Value;
use crate::error::SourceError;
use crate::source::{
    ColumnInfo, IoStats, OpenMode, SourceFile, SourceObject, SourceTable, StorageEngine,
};

/// Column-major table data held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    columns: Vec<(ColumnInfo, Vec<Value>)>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column<V: Into<Value>>(
        mut self,
        name: &str,
        type_spec: &str,
        values: Vec<V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.columns.push((ColumnInfo::new(name, type_spec), values));
        self
    }

    /// Add a column backed by several leaves (unsupported by buffers)
    pub fn with_split_column(mut self, name: &str, type_spec: &str, leaves: usize) -> Self {
        let info = ColumnInfo::new(name, type_spec).with_leaves(leaves);
        let rows = self.num_rows() as usize;
        self.columns.push((info, vec![Value::Int(0); rows]));
        self
    }

    pub fn num_rows(&self) -> u64 {
        self.columns
            .iter()
            .map(|(_, values)| values.len())
            .max()
            .unwrap_or(0) as u64
    }

    pub fn column_values(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|(info, _)| info.name == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn column_infos(&self) -> Vec<ColumnInfo> {
        self.columns.iter().map(|(info, _)| info.clone()).collect()
    }
}

enum MemoryObject {
    Table(Rc<RefCell<MemoryTable>>),
    Other(String),
}

impl Clone for MemoryObject {
    fn clone(&self) -> Self {
        match self {
            MemoryObject::Table(t) => MemoryObject::Table(Rc::clone(t)),
            MemoryObject::Other(kind) => MemoryObject::Other(kind.clone()),
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    files: RefCell<HashMap<PathBuf, Vec<(String, MemoryObject)>>>,
    reads: RefCell<HashMap<String, u64>>,
    opened: RefCell<Vec<PathBuf>>,
    closed: RefCell<Vec<PathBuf>>,
    cached_columns: RefCell<BTreeSet<String>>,
    cache_size: Cell<Option<u64>>,
    learn_entries: Cell<Option<u64>>,
}

/// In-memory storage engine.
///
/// Clones share the same files and counters, so a test can hand one clone
/// to a chain and inspect reads through another.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Rc<MemoryInner>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, path: impl Into<PathBuf>, name: &str, table: MemoryTable) {
        self.add(path.into(), name, MemoryObject::Table(Rc::new(RefCell::new(table))));
    }

    /// Add a named object that is not a table
    pub fn add_object(&self, path: impl Into<PathBuf>, name: &str, kind: &str) {
        self.add(path.into(), name, MemoryObject::Other(kind.to_string()));
    }

    /// Register a file without any objects
    pub fn add_empty_file(&self, path: impl Into<PathBuf>) {
        self.inner.files.borrow_mut().entry(path.into()).or_default();
    }

    fn add(&self, path: PathBuf, name: &str, object: MemoryObject) {
        let mut files = self.inner.files.borrow_mut();
        let objects = files.entry(path).or_default();
        objects.retain(|(existing, _)| existing != name);
        objects.push((name.to_string(), object));
    }

    /// Snapshot of a table, including columns created through a chain
    pub fn table(&self, path: impl AsRef<Path>, name: &str) -> Option<MemoryTable> {
        let files = self.inner.files.borrow();
        files
            .get(path.as_ref())?
            .iter()
            .find_map(|(n, object)| match object {
                MemoryObject::Table(t) if n == name => Some(t.borrow().clone()),
                _ => None,
            })
    }

    /// Number of single-cell reads of a column across all files
    pub fn reads(&self, column: &str) -> u64 {
        self.inner.reads.borrow().get(column).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> u64 {
        self.inner.reads.borrow().values().sum()
    }

    pub fn reset_reads(&self) {
        self.inner.reads.borrow_mut().clear();
    }

    /// Paths passed to `open`, in order, including failed attempts
    pub fn opened(&self) -> Vec<PathBuf> {
        self.inner.opened.borrow().clone()
    }

    /// Paths of files that were closed, in order
    pub fn closed(&self) -> Vec<PathBuf> {
        self.inner.closed.borrow().clone()
    }

    pub fn cache_size(&self) -> Option<u64> {
        self.inner.cache_size.get()
    }

    pub fn learn_entries(&self) -> Option<u64> {
        self.inner.learn_entries.get()
    }

    pub fn cached_columns(&self) -> Vec<String> {
        self.inner.cached_columns.borrow().iter().cloned().collect()
    }
}

impl StorageEngine for MemoryEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn SourceFile>, SourceError> {
        self.inner.opened.borrow_mut().push(path.to_path_buf());
        let mut files = self.inner.files.borrow_mut();
        if mode == OpenMode::Recreate {
            files.insert(path.to_path_buf(), Vec::new());
        }
        let objects = match files.get(path) {
            Some(objects) => objects.clone(),
            None => {
                return Err(SourceError::Open {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
                })
            }
        };
        debug!(target: "source", "Opening memory file '{}'", path.display());
        Ok(Box::new(MemoryFile {
            path: path.to_path_buf(),
            objects,
            stats: Rc::new(IoStats::default()),
            engine: Rc::clone(&self.inner),
            closed: false,
        }))
    }
}

struct MemoryFile {
    path: PathBuf,
    objects: Vec<(String, MemoryObject)>,
    stats: Rc<IoStats>,
    engine: Rc<MemoryInner>,
    closed: bool,
}

impl SourceFile for MemoryFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&mut self, name: &str) -> Option<SourceObject> {
        if self.closed {
            return None;
        }
        let (_, object) = self.objects.iter().find(|(n, _)| n == name)?;
        Some(match object {
            MemoryObject::Table(data) => SourceObject::Table(Box::new(MemoryTableHandle {
                data: Rc::clone(data),
                inactive: BTreeSet::new(),
                stats: Rc::clone(&self.stats),
                engine: Rc::clone(&self.engine),
            })),
            MemoryObject::Other(kind) => SourceObject::Other { kind: kind.clone() },
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.engine.closed.borrow_mut().push(self.path.clone());
        }
        self.closed = true;
    }

    fn bytes_read(&self) -> u64 {
        self.stats.bytes()
    }

    fn read_calls(&self) -> u64 {
        self.stats.calls()
    }
}

struct MemoryTableHandle {
    data: Rc<RefCell<MemoryTable>>,
    inactive: BTreeSet<String>,
    stats: Rc<IoStats>,
    engine: Rc<MemoryInner>,
}

impl SourceTable for MemoryTableHandle {
    fn columns(&self) -> Vec<ColumnInfo> {
        self.data.borrow().column_infos()
    }

    fn num_rows(&self) -> u64 {
        self.data.borrow().num_rows()
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
        let data = self.data.borrow();
        let values = data
            .column_values(column)
            .ok_or_else(|| SourceError::NoSuchColumn(column.to_string()))?;
        if self.inactive.contains(column) {
            return Err(SourceError::Inactive(column.to_string()));
        }
        let value = values
            .get(row as usize)
            .cloned()
            .ok_or(SourceError::RowOutOfRange {
                row,
                rows: values.len() as u64,
            })?;
        *self
            .engine
            .reads
            .borrow_mut()
            .entry(column.to_string())
            .or_insert(0) += 1;
        self.stats.record(&value);
        Ok(value)
    }

    fn create_column(&mut self, name: &str, type_spec: &str) -> Result<(), SourceError> {
        if self.has_column(name) {
            return Err(SourceError::Unsupported(format!(
                "column `{name}` already exists"
            )));
        }
        let filler = registry::create_from_spec(type_spec)
            .ok()
            .flatten()
            .map(|cell| cell.value())
            .ok_or_else(|| SourceError::Unsupported(format!("unknown type `{type_spec}`")))?;
        let mut data = self.data.borrow_mut();
        let rows = data.num_rows() as usize;
        data.columns
            .push((ColumnInfo::new(name, type_spec), vec![filler; rows]));
        Ok(())
    }

    fn set_cache_size(&mut self, bytes: u64) {
        self.engine.cache_size.set(Some(bytes));
    }

    fn set_cache_learn_entries(&mut self, entries: u64) {
        self.engine.learn_entries.set(Some(entries));
    }

    fn add_to_cache(&mut self, column: &str) {
        self.engine
            .cached_columns
            .borrow_mut()
            .insert(column.to_string());
    }

    fn drop_from_cache(&mut self, pattern: &str) {
        let mut cached = self.engine.cached_columns.borrow_mut();
        if pattern == "*" {
            cached.clear();
        } else {
            cached.remove(pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.add_table(
            "f1",
            "events",
            MemoryTable::new()
                .with_column("pt", "F", vec![1.0, 2.0, 3.0])
                .with_column("n", "I", vec![1, 2, 3]),
        );
        engine.add_object("f1", "hist", "histogram");
        engine
    }

    #[test]
    fn test_open_missing_file_fails() {
        let engine = engine();
        assert!(matches!(
            engine.open(Path::new("nope"), OpenMode::Read),
            Err(SourceError::Open { .. })
        ));
        assert_eq!(engine.opened(), vec![PathBuf::from("nope")]);
    }

    #[test]
    fn test_read_counts_per_column() {
        let engine = engine();
        let mut file = engine.open(Path::new("f1"), OpenMode::Read).unwrap();
        let Some(SourceObject::Table(mut table)) = file.get("events") else {
            panic!("expected a table");
        };
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.read("pt", 1).unwrap(), Value::Float(2.0));
        assert_eq!(table.read("pt", 2).unwrap(), Value::Float(3.0));
        assert!(table.read("pt", 3).is_err());
        assert_eq!(engine.reads("pt"), 2);
        assert_eq!(engine.reads("n"), 0);
        assert_eq!(file.read_calls(), 2);
        assert!(matches!(file.get("hist"), Some(SourceObject::Other { .. })));
        assert!(file.get("missing").is_none());
    }

    #[test]
    fn test_inactive_column_is_not_read() {
        let engine = engine();
        let mut file = engine.open(Path::new("f1"), OpenMode::Read).unwrap();
        let Some(SourceObject::Table(mut table)) = file.get("events") else {
            panic!("expected a table");
        };
        assert!(table.set_active("n", false));
        assert!(!table.is_active("n"));
        assert!(matches!(table.read("n", 0), Err(SourceError::Inactive(_))));
        assert!(!table.set_active("nope", true));
    }

    #[test]
    fn test_create_column_persists_in_engine() {
        let engine = engine();
        let mut file = engine.open(Path::new("f1"), OpenMode::Update).unwrap();
        let Some(SourceObject::Table(mut table)) = file.get("events") else {
            panic!("expected a table");
        };
        table.create_column("weight", "D").unwrap();
        assert!(table.create_column("weight", "D").is_err());
        let snapshot = engine.table("f1", "events").unwrap();
        assert_eq!(snapshot.column_values("weight").unwrap().len(), 3);
    }
}
