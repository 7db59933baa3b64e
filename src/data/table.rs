//! A single source table and its row cursor.
//!
//! A [`Table`] pairs a [`SourceTable`] with the [`RowBuffer`] that receives
//! its rows. Rows are visited with [`Table::next_row`], which lends the
//! buffer for the current row:
//!
//! ```ignore
//! while let Some(row) = table.next_row()? {
//!     let pt = row.get_f64("pt")?;
//! }
//! ```

use regex::Regex;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::data::row_buffer::{RowBuffer, SharedSource};
use crate::error::{Result, TreeError};
use crate::source::{ColumnInfo, SourceTable};

/// How a buffer is bound to a table
#[derive(Debug, Clone)]
pub struct BindOptions {
    /// Only these buffer columns, when given
    pub allow: Option<Vec<String>>,
    /// Never these buffer columns
    pub deny: Vec<String>,
    /// Create the columns in the table instead of reading existing ones
    pub create: bool,
    /// Leave columns the table lacks unbound instead of failing
    pub ignore_missing: bool,
    /// In create mode, skip columns the table already has
    pub ignore_duplicates: bool,
    /// Carry object and collection declarations over
    pub transfer_views: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            allow: None,
            deny: Vec::new(),
            create: false,
            ignore_missing: false,
            ignore_duplicates: false,
            transfer_views: true,
        }
    }
}

/// Compile a shell-style pattern where `*` matches any run of characters
/// and `?` a single character
fn glob_regex(pattern: &str) -> Regex {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).expect("escaped glob is a valid regex")
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next: u64,
    yielded: bool,
}

pub struct Table {
    name: String,
    source: SharedSource,
    buffer: RowBuffer,
    read_on_demand: bool,
    always_read: Vec<String>,
    cursor: Option<Cursor>,
}

impl Table {
    pub fn new(name: impl Into<String>, source: Box<dyn SourceTable>) -> Self {
        Self {
            name: name.into(),
            source: Rc::new(RefCell::new(source)),
            buffer: RowBuffer::new(),
            read_on_demand: true,
            always_read: Vec::new(),
            cursor: None,
        }
    }

    /// Read columns lazily on first access (the default) or all bound
    /// columns on every row
    pub fn with_read_on_demand(mut self, read_on_demand: bool) -> Self {
        self.read_on_demand = read_on_demand;
        self
    }

    /// Columns read on every row even in on-demand mode
    pub fn with_always_read(mut self, columns: Vec<String>) -> Self {
        self.always_read = columns;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_on_demand(&self) -> bool {
        self.read_on_demand
    }

    pub fn columns(&self) -> Vec<ColumnInfo> {
        self.source.borrow().columns()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns().into_iter().map(|c| c.name).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.source.borrow().has_column(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.source.borrow().is_active(name)
    }

    /// Number of rows in the table
    pub fn len(&self) -> u64 {
        self.source.borrow().num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column names matching any of `patterns` and none of `exclude`
    pub fn glob<S: AsRef<str>>(&self, patterns: &[S], exclude: &[S]) -> Vec<String> {
        let names = self.column_names();
        let exclude: Vec<Regex> = exclude.iter().map(|p| glob_regex(p.as_ref())).collect();
        let mut matches: Vec<String> = Vec::new();
        for pattern in patterns {
            let re = glob_regex(pattern.as_ref());
            for name in names.iter().filter(|n| re.is_match(n)) {
                if !matches.contains(name) {
                    matches.push(name.clone());
                }
            }
        }
        matches.retain(|name| !exclude.iter().any(|re| re.is_match(name)));
        matches
    }

    fn set_status<S: AsRef<str>>(&mut self, patterns: &[S], active: bool, exclusive: bool) {
        if exclusive {
            for name in self.column_names() {
                self.source.borrow_mut().set_active(&name, !active);
            }
        }
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let names = if pattern.contains(['*', '?']) {
                self.glob(&[pattern], &[])
            } else {
                vec![pattern.to_string()]
            };
            for name in names {
                if !self.source.borrow_mut().set_active(&name, active) {
                    debug!(target: "table", "No column `{}` to {}", name, if active { "activate" } else { "deactivate" });
                }
            }
        }
    }

    /// Activate matching columns. With `exclusive`, deactivate all others.
    pub fn activate<S: AsRef<str>>(&mut self, patterns: &[S], exclusive: bool) {
        self.set_status(patterns, true, exclusive);
    }

    /// Deactivate matching columns. With `exclusive`, activate all others.
    pub fn deactivate<S: AsRef<str>>(&mut self, patterns: &[S], exclusive: bool) {
        self.set_status(patterns, false, exclusive);
    }

    /// Build a buffer from the schema of the active columns and bind it
    pub fn build_schema(&mut self, ignore_unsupported: bool) -> Result<()> {
        let mut schema = Vec::new();
        for column in self.columns() {
            if !self.is_active(&column.name) {
                continue;
            }
            if !column.is_supported() {
                if ignore_unsupported {
                    warn!(
                        target: "table",
                        "Column `{}` spans {} leaves and is not supported. Skipping",
                        column.name, column.leaves
                    );
                    continue;
                }
                return Err(TreeError::UnsupportedColumn {
                    type_spec: column.type_spec(),
                    name: column.name,
                });
            }
            let type_spec = column.type_spec();
            schema.push((column.name, type_spec));
        }
        let buffer = RowBuffer::from_schema(schema, ignore_unsupported)?;
        debug!(target: "table", "Built buffer with {} columns for `{}`", buffer.len(), self.name);
        self.bind_buffer(buffer, &BindOptions::default())
    }

    fn selected(buffer: &RowBuffer, options: &BindOptions) -> Vec<String> {
        buffer
            .names()
            .filter(|name| {
                options
                    .allow
                    .as_ref()
                    .map_or(true, |allow| allow.iter().any(|a| a == name))
            })
            .filter(|name| !options.deny.iter().any(|d| d == name))
            .map(str::to_string)
            .collect()
    }

    /// Validate a binding without changing anything
    pub fn check_binding(&self, buffer: &RowBuffer, options: &BindOptions) -> Result<()> {
        let source = self.source.borrow();
        for name in Self::selected(buffer, options) {
            let exists = source.has_column(&name);
            if options.create {
                if exists && !options.ignore_duplicates {
                    return Err(TreeError::ColumnExists(name));
                }
            } else if !exists && !options.ignore_missing {
                return Err(TreeError::MissingColumn(name));
            }
        }
        Ok(())
    }

    /// Bind `buffer` to this table, merging it into the current buffer.
    ///
    /// In create mode the selected columns are added to the table first.
    /// Columns the table lacks, inactive ones and those filtered out by
    /// `allow`/`deny` stay in the buffer but are never read.
    pub fn bind_buffer(&mut self, buffer: RowBuffer, options: &BindOptions) -> Result<()> {
        self.check_binding(&buffer, options)?;
        let selected = Self::selected(&buffer, options);
        if options.create {
            let mut source = self.source.borrow_mut();
            for name in &selected {
                if source.has_column(name) {
                    debug!(target: "table", "Column `{}` already exists. Skipping", name);
                    continue;
                }
                let type_spec = buffer.schema_of(name).unwrap_or_default();
                source.create_column(name, &type_spec)?;
            }
        }

        if self.buffer.is_empty() {
            self.buffer = buffer;
            if !options.transfer_views {
                self.buffer.clear_views();
            }
        } else {
            self.buffer.merge_from(buffer, options.transfer_views);
        }
        self.buffer.detach();
        self.buffer.unbind_all();

        let source = self.source.borrow();
        for name in selected {
            let readable = source.has_column(&name) && source.is_active(&name);
            if !readable {
                warn!(target: "table", "Column `{}` will not be read from `{}`", name, self.name);
            }
            self.buffer.set_bound(&name, readable);
        }
        self.cursor = None;
        Ok(())
    }

    pub fn buffer(&self) -> &RowBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut RowBuffer {
        &mut self.buffer
    }

    /// Give the buffer back, detached from this table
    pub fn into_buffer(mut self) -> RowBuffer {
        self.buffer.detach();
        self.buffer
    }

    pub fn set_cache_size(&mut self, bytes: u64) {
        self.source.borrow_mut().set_cache_size(bytes);
    }

    pub fn set_cache_learn_entries(&mut self, entries: u64) {
        self.source.borrow_mut().set_cache_learn_entries(entries);
    }

    fn start(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            warn!(target: "table", "Buffer for `{}` is empty. Building one from the table schema", self.name);
            self.build_schema(false)?;
        }
        self.buffer.attach(&self.source);
        if self.read_on_demand {
            let mut source = self.source.borrow_mut();
            source.drop_from_cache("*");
            for column in &self.always_read {
                if !source.has_column(column) || !self.buffer.contains(column) {
                    return Err(TreeError::AlwaysReadMissing(column.clone()));
                }
                source.add_to_cache(column);
            }
        }
        Ok(())
    }

    /// Move to the next row. Returns false once the table is exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        let cursor = match self.cursor {
            Some(cursor) => {
                if cursor.yielded {
                    self.buffer.reset_collections();
                }
                cursor
            }
            None => {
                self.start()?;
                Cursor {
                    next: 0,
                    yielded: false,
                }
            }
        };
        if cursor.next >= self.len() {
            self.cursor = Some(Cursor {
                yielded: false,
                ..cursor
            });
            return Ok(false);
        }

        self.buffer.advance_row(cursor.next);
        self.cursor = Some(Cursor {
            next: cursor.next + 1,
            yielded: true,
        });
        if self.read_on_demand {
            for column in &self.always_read {
                self.buffer.fetch(column)?;
            }
        } else {
            self.buffer.fetch_all()?;
        }
        Ok(true)
    }

    /// Lend the buffer for the next row, or `None` once exhausted
    pub fn next_row(&mut self) -> Result<Option<&mut RowBuffer>> {
        if self.advance()? {
            Ok(Some(&mut self.buffer))
        } else {
            Ok(None)
        }
    }

    /// Visit every remaining row
    pub fn for_each_row(&mut self, mut f: impl FnMut(&mut RowBuffer) -> Result<()>) -> Result<()> {
        while let Some(row) = self.next_row()? {
            f(row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::value::Value;
    use crate::source::{MemoryEngine, MemoryTable, OpenMode, SourceObject, StorageEngine};
    use std::path::Path;

    fn table(engine: &MemoryEngine) -> Table {
        engine.add_table(
            "events.mem",
            "events",
            MemoryTable::new()
                .with_column("pt", "F", vec![10.0, 20.0, 30.0])
                .with_column("eta", "F", vec![0.1, 0.2, 0.3])
                .with_column("run", "I", vec![1, 1, 2]),
        );
        let mut file = engine.open(Path::new("events.mem"), OpenMode::Read).unwrap();
        match file.get("events") {
            Some(SourceObject::Table(source)) => Table::new("events", source),
            _ => panic!("expected table"),
        }
    }

    #[test]
    fn test_glob() {
        let engine = MemoryEngine::new();
        let t = table(&engine);
        assert_eq!(t.glob(&["*t*"], &[]), vec!["pt", "eta"]);
        assert_eq!(t.glob(&["*t*"], &["e*"]), vec!["pt"]);
        assert_eq!(t.glob(&["r?n", "pt"], &[]), vec!["run", "pt"]);
    }

    #[test]
    fn test_activation() {
        let engine = MemoryEngine::new();
        let mut t = table(&engine);
        t.activate(&["pt"], true);
        assert!(t.is_active("pt"));
        assert!(!t.is_active("eta"));
        t.deactivate(&["*"], false);
        assert!(!t.is_active("pt"));
        t.activate(&["missing"], false);
    }

    #[test]
    fn test_on_demand_reads_only_accessed_columns() {
        let engine = MemoryEngine::new();
        let mut t = table(&engine);
        t.build_schema(false).unwrap();
        let mut seen = Vec::new();
        t.for_each_row(|row| {
            let first = row.get_f64("pt")?;
            let second = row.get_f64("pt")?;
            assert_eq!(first, second);
            seen.push(first);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![10.0, 20.0, 30.0]);
        assert_eq!(engine.reads("pt"), 3);
        assert_eq!(engine.reads("eta"), 0);
        assert!(t.next_row().unwrap().is_none());
    }

    #[test]
    fn test_each_accessed_column_read_once_per_row() {
        let engine = MemoryEngine::new();
        let mut t = table(&engine);
        t.build_schema(false).unwrap();
        let mut rows = 0;
        while let Some(row) = t.next_row().unwrap() {
            rows += 1;
            let pt = row.get_f64("pt").unwrap();
            assert_eq!(engine.reads("pt"), rows);
            assert_eq!(engine.reads("eta"), rows - 1);
            let eta = row.get_f64("eta").unwrap();
            assert_eq!(row.get_f64("pt").unwrap(), pt);
            assert_eq!(row.get_f64("eta").unwrap(), eta);
            assert_eq!(engine.reads("pt"), rows);
            assert_eq!(engine.reads("eta"), rows);
        }
        assert_eq!(rows, 3);
        assert_eq!(engine.reads("run"), 0);
    }

    #[test]
    fn test_set_overwrites_without_reading() {
        let engine = MemoryEngine::new();
        let mut t = table(&engine);
        t.build_schema(false).unwrap();
        let row = t.next_row().unwrap().unwrap();
        row.set("pt", 99.5).unwrap();
        assert_eq!(row.get_f64("pt").unwrap(), 99.5);
        assert_eq!(engine.reads("pt"), 0);

        let row = t.next_row().unwrap().unwrap();
        assert_eq!(row.get_f64("pt").unwrap(), 20.0);
        assert_eq!(engine.reads("pt"), 1);
    }

    #[test]
    fn test_eager_and_always_read() {
        let engine = MemoryEngine::new();
        let mut t = table(&engine).with_read_on_demand(false);
        t.build_schema(false).unwrap();
        while t.next_row().unwrap().is_some() {}
        assert_eq!(engine.reads("eta"), 3);

        let engine = MemoryEngine::new();
        let mut t = table(&engine).with_always_read(vec!["run".into()]);
        t.build_schema(false).unwrap();
        let row = t.next_row().unwrap().unwrap();
        assert_eq!(engine.reads("run"), 1);
        assert_eq!(row.get("run").unwrap(), Value::Int(1));
        assert_eq!(engine.reads("run"), 1);

        let engine = MemoryEngine::new();
        let mut t = table(&engine).with_always_read(vec!["nope".into()]);
        assert!(matches!(
            t.next_row(),
            Err(TreeError::AlwaysReadMissing(_))
        ));
    }

    #[test]
    fn test_bind_rules() {
        let engine = MemoryEngine::new();
        let mut t = table(&engine);
        let buffer = RowBuffer::from_schema([("pt", "F"), ("phi", "F")], false).unwrap();
        assert!(matches!(
            t.check_binding(&buffer, &BindOptions::default()),
            Err(TreeError::MissingColumn(name)) if name == "phi"
        ));
        let lenient = BindOptions {
            ignore_missing: true,
            ..BindOptions::default()
        };
        t.bind_buffer(buffer, &lenient).unwrap();
        assert!(t.buffer().is_bound("pt"));
        assert!(!t.buffer().is_bound("phi"));

        let row = t.next_row().unwrap().unwrap();
        row.set("phi", 1.5).unwrap();
        assert_eq!(row.get_f64("phi").unwrap(), 1.5);
    }

    #[test]
    fn test_create_columns() {
        let engine = MemoryEngine::new();
        let mut t = table(&engine);
        let buffer = RowBuffer::from_schema([("pt", "F"), ("weight", "D")], false).unwrap();
        let create = BindOptions {
            create: true,
            ..BindOptions::default()
        };
        assert!(matches!(
            t.check_binding(&buffer, &create),
            Err(TreeError::ColumnExists(_))
        ));
        let create = BindOptions {
            ignore_duplicates: true,
            ..create
        };
        t.bind_buffer(buffer, &create).unwrap();
        assert!(t.has_column("weight"));
        let row = t.next_row().unwrap().unwrap();
        assert_eq!(row.get_f64("weight").unwrap(), 0.0);
    }
}
