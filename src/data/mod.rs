//! Data layer: typed cells, the row buffer, tables and chains
//!
//! This module turns columnar source tables into a row-at-a-time view.

// Core value and cell types
pub mod cell;
pub mod registry;
pub mod value;

// Row storage and views
pub mod row_buffer;
pub mod views;

// Iteration
pub mod chain;
pub mod filter;
pub mod table;

pub use cell::{CellKind, ScalarType, TypedCell};
pub use chain::{
    ChainBuilder, ChainState, ChainStats, FileChange, FileFeed, FileList, FileQueue, TableChain,
    TableQueue,
};
pub use filter::{CutflowEntry, Filter, FilterPipeline, RowFilter, Verdict};
pub use row_buffer::RowBuffer;
pub use table::{BindOptions, Table};
pub use value::Value;
pub use views::{CollectionItem, CollectionView, ObjectView};
