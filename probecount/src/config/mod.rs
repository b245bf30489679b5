//! # Configuration
//!
//! YAML configuration of the table, handlers, diagnostics and watcher.

#[allow(clippy::module_inception)]
pub mod config;
pub use config::*;
