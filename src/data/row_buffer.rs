//! Named, typed storage for the current row of a table.
//!
//! A [`RowBuffer`] owns one [`TypedCell`] per column. When attached to a
//! live source it fills cells lazily: the first access to a column in a row
//! reads it from the source, later accesses in the same row are served from
//! the cell. Advancing the row clears the per-row fetched flags.

use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::OnceLock;
use tracing::{trace, warn};

use crate::data::cell::TypedCell;
use crate::data::registry;
use crate::data::value::Value;
use crate::data::views::{CollectionDecl, CollectionView, ObjectDecl, ObjectView};
use crate::error::{Result, TreeError};
use crate::source::SourceTable;

/// A source table shared between its [`Table`](crate::data::table::Table)
/// and the buffer reading from it
pub type SharedSource = Rc<RefCell<Box<dyn SourceTable>>>;

fn invalid_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^0-9a-zA-Z_]").expect("valid name pattern"))
}

fn invalid_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^a-zA-Z_]+").expect("valid prefix pattern"))
}

/// Map a column name to an identifier-safe form.
///
/// Invalid characters become `_` and leading characters that cannot start
/// an identifier are dropped: `"1jet.pt"` becomes `"jet_pt"`.
pub fn sanitize(name: &str) -> String {
    let replaced = invalid_chars().replace_all(name, "_");
    invalid_prefix().replace(&replaced, "").into_owned()
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    cell: TypedCell,
    /// Filled from the source when attached
    bound: bool,
    /// Registered with the source's read cache
    cached: bool,
    /// Already read for the current row
    fetched: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CollectionState {
    pub(crate) decl: CollectionDecl,
    /// Underlying indices of the current selection, `None` for all
    pub(crate) selection: Option<Vec<usize>>,
}

/// Current-row storage for a set of named columns
#[derive(Debug, Clone, Default)]
pub struct RowBuffer {
    columns: Vec<Column>,
    positions: HashMap<String, usize>,
    /// Sanitized name -> original column name
    fixed_names: HashMap<String, String>,
    source: Option<Weak<RefCell<Box<dyn SourceTable>>>>,
    entry: u64,
    objects: Vec<ObjectDecl>,
    pub(crate) collections: Vec<CollectionState>,
}

impl RowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a buffer from `(name, type specification)` pairs.
    ///
    /// Unknown types are an error unless `ignore_unsupported` is set, in
    /// which case the column is skipped with a warning.
    pub fn from_schema<I, K, V>(schema: I, ignore_unsupported: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut buffer = Self::new();
        for (name, type_spec) in schema {
            let name = name.into();
            let type_spec = type_spec.as_ref();
            match cell_for(&name, type_spec)? {
                Some(cell) => buffer.insert_cell(name, cell)?,
                None if ignore_unsupported => {
                    warn!(
                        target: "buffer",
                        "Unsupported type `{}` for column `{}`. Skipping",
                        type_spec, name
                    );
                }
                None => {
                    return Err(TreeError::UnsupportedColumn {
                        name,
                        type_spec: type_spec.to_string(),
                    })
                }
            }
        }
        Ok(buffer)
    }

    /// Add a column by type specification, e.g. `("pt", "F")` or `("hits", "I[8]")`
    pub fn declare_column(&mut self, name: &str, type_spec: &str) -> Result<()> {
        let cell = cell_for(name, type_spec)?
            .ok_or_else(|| TreeError::UnknownType(type_spec.to_string()))?;
        self.insert_cell(name, cell)
    }

    /// Add a column with a ready-made cell
    pub fn insert_cell(&mut self, name: impl Into<String>, cell: TypedCell) -> Result<()> {
        let name = name.into();
        if self.is_attached() {
            return Err(TreeError::SchemaLocked(name));
        }
        if self.positions.contains_key(&name) {
            return Err(TreeError::DuplicateColumn(name));
        }
        let clean = sanitize(&name);
        if self.is_reserved(&clean) || (clean != name && self.positions.contains_key(&clean)) {
            return Err(TreeError::IllegalName(name));
        }
        if clean != name {
            self.fixed_names.insert(clean, name.clone());
        }
        self.push_column(name, cell);
        Ok(())
    }

    fn push_column(&mut self, name: String, cell: TypedCell) {
        self.positions.insert(name.clone(), self.columns.len());
        self.columns.push(Column {
            name,
            cell,
            bound: false,
            cached: false,
            fetched: false,
        });
    }

    fn is_reserved(&self, clean: &str) -> bool {
        clean.is_empty()
            || clean.starts_with('_')
            || self.fixed_names.contains_key(clean)
            || self.is_view(clean)
    }

    fn is_view(&self, name: &str) -> bool {
        self.objects.iter().any(|o| o.name == name)
            || self.collections.iter().any(|c| c.decl.name == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied().or_else(|| {
            self.fixed_names
                .get(name)
                .and_then(|original| self.positions.get(original).copied())
        })
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.position(name)
            .ok_or_else(|| TreeError::NoSuchColumn(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Original name for a sanitized alias
    pub fn original_name(&self, name: &str) -> Option<&str> {
        self.fixed_names.get(name).map(String::as_str)
    }

    /// `(name, type specification)` pairs accepted by [`RowBuffer::from_schema`]
    pub fn schema(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.cell.type_spec()))
            .collect()
    }

    /// Type specification of one column
    pub fn schema_of(&self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.columns[i].cell.type_spec())
    }

    /// Index of the row currently held
    pub fn entry(&self) -> u64 {
        self.entry
    }

    // --- Source binding ---

    pub(crate) fn attach(&mut self, source: &SharedSource) {
        self.source = Some(Rc::downgrade(source));
        self.entry = 0;
        for column in &mut self.columns {
            column.cached = false;
            column.fetched = false;
        }
    }

    pub(crate) fn detach(&mut self) {
        self.source = None;
    }

    /// True while the source this buffer reads from is alive
    pub fn is_attached(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|source| source.strong_count() > 0)
    }

    pub(crate) fn set_bound(&mut self, name: &str, bound: bool) {
        if let Some(index) = self.positions.get(name) {
            self.columns[*index].bound = bound;
        }
    }

    pub(crate) fn unbind_all(&mut self) {
        for column in &mut self.columns {
            column.bound = false;
        }
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.position(name).is_some_and(|i| self.columns[i].bound)
    }

    /// Move to another row; nothing is read until a column is accessed
    pub fn advance_row(&mut self, entry: u64) {
        self.entry = entry;
        for column in &mut self.columns {
            column.fetched = false;
        }
    }

    fn fetch_at(&mut self, index: usize) -> Result<()> {
        let column = &mut self.columns[index];
        if column.fetched || !column.bound {
            return Ok(());
        }
        let Some(source) = self.source.as_ref().and_then(Weak::upgrade) else {
            return Ok(());
        };
        let mut source = source.borrow_mut();
        if !column.cached {
            if !source.has_column(&column.name) {
                return Err(TreeError::NoSuchColumn(column.name.clone()));
            }
            source.add_to_cache(&column.name);
            column.cached = true;
        }
        trace!(target: "buffer", "Reading `{}` for row {}", column.name, self.entry);
        let value = source.read(&column.name, self.entry)?;
        column.cell.set(&value)?;
        column.fetched = true;
        Ok(())
    }

    /// Read a column for the current row unless it was read already
    pub fn fetch(&mut self, name: &str) -> Result<()> {
        let index = self.require(name)?;
        self.fetch_at(index)
    }

    /// Read every bound column for the current row
    pub fn fetch_all(&mut self) -> Result<()> {
        (0..self.columns.len()).try_for_each(|index| self.fetch_at(index))
    }

    // --- Access ---

    /// Current value of a column, reading it from the source on first access
    pub fn get(&mut self, name: &str) -> Result<Value> {
        let index = self.require(name)?;
        self.fetch_at(index)?;
        Ok(self.columns[index].cell.value())
    }

    pub fn get_f64(&mut self, name: &str) -> Result<f64> {
        let value = self.get(name)?;
        value.as_f64().ok_or_else(|| mismatch("f64", &value))
    }

    pub fn get_i64(&mut self, name: &str) -> Result<i64> {
        let value = self.get(name)?;
        value.as_i64().ok_or_else(|| mismatch("i64", &value))
    }

    pub fn get_u64(&mut self, name: &str) -> Result<u64> {
        let value = self.get(name)?;
        value.as_u64().ok_or_else(|| mismatch("u64", &value))
    }

    pub fn get_bool(&mut self, name: &str) -> Result<bool> {
        let value = self.get(name)?;
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }

    pub fn get_string(&mut self, name: &str) -> Result<String> {
        match self.get(name)? {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }

    /// One element of an array column
    pub fn get_element(&mut self, name: &str, index: usize) -> Result<Value> {
        let position = self.require(name)?;
        self.fetch_at(position)?;
        let cell = &self.columns[position].cell;
        cell.get(index).ok_or_else(|| TreeError::IndexOutOfRange {
            name: name.to_string(),
            index,
            size: cell.len(),
        })
    }

    /// Borrow the cell of a column after fetching it
    pub fn cell(&mut self, name: &str) -> Result<&TypedCell> {
        let index = self.require(name)?;
        self.fetch_at(index)?;
        Ok(&self.columns[index].cell)
    }

    pub fn cell_mut(&mut self, name: &str) -> Result<&mut TypedCell> {
        let index = self.require(name)?;
        self.fetch_at(index)?;
        Ok(&mut self.columns[index].cell)
    }

    /// Assign a column. The value is converted to the column type.
    ///
    /// The whole cell is overwritten, so the column counts as fetched for
    /// this row and is not read from the source.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.require(name)?;
        let column = &mut self.columns[index];
        column.cell.set(&value.into())?;
        column.fetched = true;
        Ok(())
    }

    /// Assign one element, keeping the rest of the row's stored value

    pub fn set_element(&mut self, name: &str, index: usize, value: impl Into<Value>) -> Result<()> {
        let position = self.require(name)?;
        self.fetch_at(position)?;
        let cell = &mut self.columns[position].cell;
        let size = cell.len();
        cell.set_at(index, &value.into()).map_err(|e| match e {
            TreeError::IndexOutOfRange { .. } => TreeError::IndexOutOfRange {
                name: name.to_string(),
                index,
                size,
            },
            other => other,
        })
    }

    /// Restore every resetable cell to its default
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            column.cell.reset();
        }
    }

    /// Drop collection selections made while processing the previous row
    pub fn reset_collections(&mut self) {
        for collection in &mut self.collections {
            collection.selection = None;
        }
    }

    /// Merge another buffer's columns into this one.
    ///
    /// Columns present in both take the other buffer's cell while keeping
    /// this buffer's per-row state. With `transfer_views` the other buffer's
    /// object and collection declarations are adopted too.
    pub fn merge_from(&mut self, other: RowBuffer, transfer_views: bool) {
        for column in other.columns {
            match self.positions.get(&column.name) {
                Some(&index) => self.columns[index].cell = column.cell,
                None => self.push_column(column.name, column.cell),
            }
        }
        self.fixed_names.extend(other.fixed_names);
        self.entry = other.entry;
        if transfer_views {
            for object in other.objects {
                self.objects.retain(|o| o.name != object.name);
                self.objects.push(object);
            }
            for collection in other.collections {
                self.collections
                    .retain(|c| c.decl.name != collection.decl.name);
                self.collections.push(CollectionState {
                    decl: collection.decl,
                    selection: None,
                });
            }
        }
    }

    // --- Views ---

    /// Group columns sharing `prefix` under `name`
    pub fn declare_object(&mut self, name: &str, prefix: &str) -> Result<()> {
        let decl = ObjectDecl {
            name: name.to_string(),
            prefix: prefix.to_string(),
        };
        if self.objects.contains(&decl) {
            return Ok(());
        }
        self.check_view_name(name)?;
        self.objects.push(decl);
        Ok(())
    }

    /// Group array columns sharing `prefix` under `name`, sized per row by
    /// the scalar column `size`
    pub fn declare_collection(&mut self, name: &str, prefix: &str, size: &str) -> Result<()> {
        let decl = CollectionDecl {
            name: name.to_string(),
            prefix: prefix.to_string(),
            size: size.to_string(),
        };
        if self.collections.iter().any(|c| c.decl == decl) {
            return Ok(());
        }
        self.check_view_name(name)?;
        self.collections.push(CollectionState {
            decl,
            selection: None,
        });
        Ok(())
    }

    fn check_view_name(&self, name: &str) -> Result<()> {
        if self.is_attached() {
            return Err(TreeError::SchemaLocked(name.to_string()));
        }
        if name.is_empty() || name.starts_with('_') || self.is_view(name) || self.contains(name) {
            return Err(TreeError::IllegalName(name.to_string()));
        }
        Ok(())
    }

    pub(crate) fn clear_views(&mut self) {
        self.objects.clear();
        self.collections.clear();
    }

    pub fn objects(&self) -> &[ObjectDecl] {
        &self.objects
    }

    pub fn collection_decls(&self) -> impl Iterator<Item = &CollectionDecl> {
        self.collections.iter().map(|c| &c.decl)
    }

    pub fn object(&mut self, name: &str) -> Result<ObjectView<'_>> {
        let decl = self
            .objects
            .iter()
            .find(|o| o.name == name)
            .cloned()
            .ok_or_else(|| TreeError::NoSuchView(name.to_string()))?;
        Ok(ObjectView::new(self, decl))
    }

    pub fn collection(&mut self, name: &str) -> Result<CollectionView<'_>> {
        let slot = self
            .collections
            .iter()
            .position(|c| c.decl.name == name)
            .ok_or_else(|| TreeError::NoSuchView(name.to_string()))?;
        Ok(CollectionView::new(self, slot))
    }
}

fn cell_for(name: &str, type_spec: &str) -> Result<Option<TypedCell>> {
    registry::create_from_spec(type_spec).map_err(|e| match e {
        TreeError::InvalidLength { length, .. } => TreeError::InvalidLength {
            name: name.to_string(),
            length,
        },
        other => other,
    })
}

fn mismatch(expected: &'static str, value: &Value) -> TreeError {
    TreeError::TypeMismatch {
        expected,
        found: value.describe(),
    }
}

impl fmt::Display for RowBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for column in &self.columns {
            writeln!(f, "{} -> {}", column.name, column.cell)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::cell::ScalarType;

    fn buffer() -> RowBuffer {
        RowBuffer::from_schema(
            [("run", "UI"), ("jet.pt", "F[4]"), ("tag", "C[8]")],
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("jet.pt"), "jet_pt");
        assert_eq!(sanitize("1jet-eta"), "jet_eta");
        assert_eq!(sanitize("__x"), "__x");
        assert_eq!(sanitize("42"), "");
    }

    #[test]
    fn test_lookup_by_sanitized_name() {
        let mut row = buffer();
        row.set("jet_pt", vec![1.5, 2.5]).unwrap();
        assert_eq!(row.original_name("jet_pt"), Some("jet.pt"));
        assert_eq!(
            row.get("jet.pt").unwrap(),
            Value::from(vec![1.5, 2.5, 0.0, 0.0])
        );
        assert_eq!(row.get_element("jet_pt", 1).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn test_illegal_names() {
        let mut row = RowBuffer::new();
        assert!(matches!(
            row.declare_column("_hidden", "F"),
            Err(TreeError::IllegalName(_))
        ));
        assert!(matches!(
            row.declare_column("123", "F"),
            Err(TreeError::IllegalName(_))
        ));
        row.declare_column("a.b", "F").unwrap();
        assert!(matches!(
            row.declare_column("a-b", "F"),
            Err(TreeError::IllegalName(_))
        ));
        assert!(matches!(
            row.declare_column("a.b", "F"),
            Err(TreeError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_unsupported_types() {
        assert!(matches!(
            RowBuffer::from_schema([("x", "Q")], false),
            Err(TreeError::UnsupportedColumn { .. })
        ));
        let row = RowBuffer::from_schema([("x", "Q"), ("y", "D")], true).unwrap();
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["y"]);
        assert!(matches!(
            RowBuffer::new().declare_column("c", "C[1]"),
            Err(TreeError::InvalidLength { ref name, length: 1 }) if name == "c"
        ));
    }

    #[test]
    fn test_unsigned_and_char_columns() {
        let mut row = buffer();
        assert!(matches!(
            row.set("run", -1),
            Err(TreeError::NegativeUnsigned(-1))
        ));
        row.set("tag", "muon").unwrap();
        assert_eq!(row.get_string("tag").unwrap(), "muon");
        assert!(matches!(
            row.set("tag", "eightchr"),
            Err(TreeError::StringTooLong { length: 8, capacity: 8 })
        ));
        assert!(matches!(
            row.get_element("jet.pt", 4),
            Err(TreeError::IndexOutOfRange { index: 4, size: 4, .. })
        ));
    }

    #[test]
    fn test_scalar_char_column() {
        let mut row = RowBuffer::new();
        row.declare_column("flag", "C").unwrap();
        row.declare_column("code", "UC").unwrap();
        assert_eq!(row.get_i64("flag").unwrap(), 0);

        row.set("flag", 65).unwrap();
        assert_eq!(row.get("flag").unwrap(), Value::Int(65));
        row.set("code", "z").unwrap();
        assert_eq!(row.get_u64("code").unwrap(), 122);

        row.reset();
        assert_eq!(row.get_i64("flag").unwrap(), 0);
        assert_eq!(row.get_u64("code").unwrap(), 0);
    }

    #[test]
    fn test_reset_respects_resetable() {
        let mut row = RowBuffer::new();
        row.insert_cell("keep", TypedCell::scalar(ScalarType::Int).with_resetable(false))
            .unwrap();
        row.declare_column("drop", "I").unwrap();
        row.set("keep", 7).unwrap();
        row.set("drop", 7).unwrap();
        row.reset();
        assert_eq!(row.get_i64("keep").unwrap(), 7);
        assert_eq!(row.get_i64("drop").unwrap(), 0);
    }

    #[test]
    fn test_merge_keeps_columns_and_views() {
        let mut row = buffer();
        let mut other = RowBuffer::from_schema([("run", "UI"), ("eta", "F")], false).unwrap();
        other.set("run", 9).unwrap();
        other.declare_object("lead", "jet.").unwrap();
        other
            .declare_collection("muons", "mu_", "n_mu")
            .unwrap();

        row.merge_from(other.clone(), false);
        assert_eq!(row.len(), 4);
        assert_eq!(row.get_u64("run").unwrap(), 9);
        assert!(row.objects().is_empty());

        row.merge_from(other, true);
        assert_eq!(row.objects().len(), 1);
        assert_eq!(row.collection_decls().count(), 1);
        assert!(matches!(
            row.declare_object("lead", "other_"),
            Err(TreeError::IllegalName(_))
        ));
        row.declare_object("lead", "jet.").unwrap();
    }

    #[test]
    fn test_schema_round_trip() {
        let row = buffer();
        let rebuilt = RowBuffer::from_schema(row.schema(), false).unwrap();
        assert_eq!(rebuilt.schema(), row.schema());
    }

    #[test]
    fn test_display() {
        let mut row = RowBuffer::from_schema([("pt", "D")], false).unwrap();
        row.set("pt", 2.5).unwrap();
        assert_eq!(row.to_string(), "pt -> D(2.5)\n");
    }
}
