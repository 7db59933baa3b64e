//! Object and collection views over prefixed columns of a [`RowBuffer`].
//!
//! An object groups scalar columns under a common prefix, so `lead.get("pt")`
//! reads column `jet_pt` for the prefix `jet_`. A collection groups array
//! columns whose per-row length is held in a separate size column, and can
//! be narrowed to a selection of element indices that lasts until the next
//! row.

use std::cmp::Ordering;

use crate::data::row_buffer::RowBuffer;
use crate::data::value::Value;
use crate::error::{Result, TreeError};

/// Declaration of an object view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDecl {
    pub name: String,
    pub prefix: String,
}

/// Declaration of a collection view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDecl {
    pub name: String,
    pub prefix: String,
    /// Scalar column holding the number of elements in the current row
    pub size: String,
}

/// Prefixed scalar columns viewed as one object
pub struct ObjectView<'a> {
    buffer: &'a mut RowBuffer,
    decl: ObjectDecl,
}

impl<'a> ObjectView<'a> {
    pub(crate) fn new(buffer: &'a mut RowBuffer, decl: ObjectDecl) -> Self {
        Self { buffer, decl }
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn prefix(&self) -> &str {
        &self.decl.prefix
    }

    pub fn get(&mut self, attr: &str) -> Result<Value> {
        self.buffer.get(&format!("{}{}", self.decl.prefix, attr))
    }

    pub fn set(&mut self, attr: &str, value: impl Into<Value>) -> Result<()> {
        self.buffer
            .set(&format!("{}{}", self.decl.prefix, attr), value)
    }
}

/// One element of a collection: the same index into every prefixed array
pub struct CollectionItem<'a> {
    buffer: &'a mut RowBuffer,
    collection: &'a str,
    prefix: &'a str,
    index: usize,
}

impl CollectionItem<'_> {
    /// Underlying element index
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&mut self, attr: &str) -> Result<Value> {
        element(self.buffer, self.collection, self.prefix, attr, self.index)
    }

    pub fn get_f64(&mut self, attr: &str) -> Result<f64> {
        let value = self.get(attr)?;
        value.as_f64().ok_or_else(|| TreeError::TypeMismatch {
            expected: "f64",
            found: value.describe(),
        })
    }

    pub fn set(&mut self, attr: &str, value: impl Into<Value>) -> Result<()> {
        self.buffer
            .set_element(&format!("{}{}", self.prefix, attr), self.index, value)
    }
}

fn element(
    buffer: &mut RowBuffer,
    collection: &str,
    prefix: &str,
    attr: &str,
    index: usize,
) -> Result<Value> {
    buffer
        .get_element(&format!("{prefix}{attr}"), index)
        .map_err(|e| match e {
            TreeError::IndexOutOfRange { index, size, .. } => TreeError::IndexOutOfRange {
                name: format!("{attr}` of collection `{collection}"),
                index,
                size,
            },
            other => other,
        })
}

/// Prefixed array columns viewed as a sequence of elements.
///
/// Positions passed to the methods here are relative to the current
/// selection; [`CollectionView::get_raw`] bypasses the selection.
pub struct CollectionView<'a> {
    buffer: &'a mut RowBuffer,
    slot: usize,
}

impl<'a> CollectionView<'a> {
    pub(crate) fn new(buffer: &'a mut RowBuffer, slot: usize) -> Self {
        Self { buffer, slot }
    }

    fn decl(&self) -> &CollectionDecl {
        &self.buffer.collections[self.slot].decl
    }

    fn selection(&self) -> Option<&Vec<usize>> {
        self.buffer.collections[self.slot].selection.as_ref()
    }

    fn set_selection(&mut self, selection: Vec<usize>) {
        self.buffer.collections[self.slot].selection = Some(selection);
    }

    pub fn name(&self) -> &str {
        &self.decl().name
    }

    pub fn prefix(&self) -> &str {
        &self.decl().prefix
    }

    /// Number of elements in the current row, ignoring any selection
    pub fn size(&mut self) -> Result<usize> {
        let size_column = self.decl().size.clone();
        let value = self.buffer.get(&size_column)?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| TreeError::TypeMismatch {
                expected: "size",
                found: value.describe(),
            })
    }

    /// Number of selected elements
    pub fn len(&mut self) -> Result<usize> {
        match self.selection() {
            Some(selection) => Ok(selection.len()),
            None => self.size(),
        }
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Underlying indices of the selected elements, in order
    pub fn indices(&mut self) -> Result<Vec<usize>> {
        match self.selection() {
            Some(selection) => Ok(selection.clone()),
            None => Ok((0..self.size()?).collect()),
        }
    }

    /// Map a position in the selection to the underlying element index
    pub fn index(&mut self, position: usize) -> Result<usize> {
        let len = self.len()?;
        if position >= len {
            return Err(self.out_of_range(position, len));
        }
        Ok(match self.selection() {
            Some(selection) => selection[position],
            None => position,
        })
    }

    fn out_of_range(&self, index: usize, size: usize) -> TreeError {
        TreeError::IndexOutOfRange {
            name: self.decl().name.clone(),
            index,
            size,
        }
    }

    /// Attribute of the element at a selection position
    pub fn get(&mut self, position: usize, attr: &str) -> Result<Value> {
        let index = self.index(position)?;
        self.get_raw(index, attr)
    }

    /// Attribute of an element by underlying index, ignoring the selection
    pub fn get_raw(&mut self, index: usize, attr: &str) -> Result<Value> {
        let size = self.size()?;
        if index >= size {
            return Err(self.out_of_range(index, size));
        }
        let decl = self.buffer.collections[self.slot].decl.clone();
        element(&mut *self.buffer, &decl.name, &decl.prefix, attr, index)
    }

    pub fn set(&mut self, position: usize, attr: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.index(position)?;
        let column = format!("{}{}", self.decl().prefix, attr);
        self.buffer.set_element(&column, index, value)
    }

    fn map_items<T>(
        &mut self,
        mut f: impl FnMut(&mut CollectionItem<'_>) -> Result<T>,
    ) -> Result<Vec<(usize, T)>> {
        let indices = self.indices()?;
        let decl = self.buffer.collections[self.slot].decl.clone();
        indices
            .into_iter()
            .map(|index| {
                let mut item = CollectionItem {
                    buffer: &mut *self.buffer,
                    collection: &decl.name,
                    prefix: &decl.prefix,
                    index,
                };
                f(&mut item).map(|v| (index, v))
            })
            .collect()
    }

    /// Keep the elements for which `predicate` holds
    pub fn select(
        &mut self,
        mut predicate: impl FnMut(&mut CollectionItem<'_>) -> Result<bool>,
    ) -> Result<()> {
        let keep = self
            .map_items(|item| predicate(item))?
            .into_iter()
            .filter_map(|(index, keep)| keep.then_some(index))
            .collect();
        self.set_selection(keep);
        Ok(())
    }

    /// Drop the elements for which `predicate` holds
    pub fn mask(
        &mut self,
        mut predicate: impl FnMut(&mut CollectionItem<'_>) -> Result<bool>,
    ) -> Result<()> {
        self.select(|item| predicate(item).map(|drop| !drop))
    }

    fn checked_positions(&mut self, positions: &[usize]) -> Result<Vec<usize>> {
        let current = self.indices()?;
        positions
            .iter()
            .map(|&p| {
                current
                    .get(p)
                    .copied()
                    .ok_or_else(|| self.out_of_range(p, current.len()))
            })
            .collect()
    }

    /// Keep only the given selection positions, in the given order
    pub fn select_indices(&mut self, positions: &[usize]) -> Result<()> {
        let keep = self.checked_positions(positions)?;
        self.set_selection(keep);
        Ok(())
    }

    /// Drop the given selection positions
    pub fn mask_indices(&mut self, positions: &[usize]) -> Result<()> {
        let drop = self.checked_positions(positions)?;
        let keep = self
            .indices()?
            .into_iter()
            .filter(|index| !drop.contains(index))
            .collect();
        self.set_selection(keep);
        Ok(())
    }

    /// Order the selection by a key. Incomparable keys keep their order.
    pub fn sort_by_key<K: PartialOrd>(
        &mut self,
        mut key: impl FnMut(&mut CollectionItem<'_>) -> Result<K>,
        descending: bool,
    ) -> Result<()> {
        let mut keyed = self.map_items(|item| key(item))?;
        keyed.sort_by(|a, b| {
            let ord = a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        self.set_selection(keyed.into_iter().map(|(index, _)| index).collect());
        Ok(())
    }

    /// Keep every `step`-th position in `start..stop`. A zero step is
    /// treated as one.
    pub fn slice(&mut self, start: usize, stop: Option<usize>, step: usize) -> Result<()> {
        let current = self.indices()?;
        let stop = stop.unwrap_or(current.len()).min(current.len());
        let keep = current
            .get(start.min(stop)..stop)
            .unwrap_or_default()
            .iter()
            .step_by(step.max(1))
            .copied()
            .collect();
        self.set_selection(keep);
        Ok(())
    }

    /// Remove and return the underlying index at a selection position
    pub fn pop(&mut self, position: usize) -> Result<usize> {
        let mut current = self.indices()?;
        if position >= current.len() {
            return Err(self.out_of_range(position, current.len()));
        }
        let index = current.remove(position);
        self.set_selection(current);
        Ok(index)
    }

    /// Remove the element with the given underlying index from the
    /// selection. Returns false when it was not selected.
    pub fn remove(&mut self, index: usize) -> Result<bool> {
        let mut current = self.indices()?;
        let Some(position) = current.iter().position(|&i| i == index) else {
            return Ok(false);
        };
        current.remove(position);
        self.set_selection(current);
        Ok(true)
    }

    /// Forget the selection
    pub fn reset(&mut self) {
        self.buffer.collections[self.slot].selection = None;
    }
}
