//! Configuration module
//!
//! Chain options that can be read from and written to TOML files.

pub mod config;

pub use config::{CacheOptions, ChainOptions};
