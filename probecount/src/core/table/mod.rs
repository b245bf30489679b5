//! # Table
//!
//! Fixed-capacity keyed counter table, safe to use from concurrent and
//! reentrant probe contexts.

#[allow(clippy::module_inception)]
pub mod table;
// Re-export table.
pub use table::*;
