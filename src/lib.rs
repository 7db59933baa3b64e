//! Row-oriented iteration over columnar tables stored across many files.
//!
//! A [`TableChain`] walks the same table through a list of files, binding a
//! shared [`RowBuffer`] to each one and reading columns only when they are
//! accessed. Rows can be gated by a [`FilterPipeline`] and grouped through
//! object and collection views.

pub mod config;
pub mod data;
pub mod error;
pub mod source;
pub mod utils;

pub use config::ChainOptions;
pub use data::{
    ChainBuilder, Filter, FilterPipeline, RowBuffer, Table, TableChain, TableQueue, Value,
};
pub use error::{Result, SourceError, TreeError};
pub use source::{ExtensionEngine, StorageEngine};
