//! Utility functions and helpers
//!
//! Logging setup and the formatters used in log messages.

pub mod format;
pub mod logging;
