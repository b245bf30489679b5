//! # Core
//!
//! Core module: the counting table, the probe handlers writing into it, the
//! diagnostic queue they report anomalies to and the snapshot readers.

pub mod diag;
pub mod probe;
pub mod snapshot;
pub mod table;
