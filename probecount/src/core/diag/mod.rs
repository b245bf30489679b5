//! # Diagnostics
//!
//! Best-effort anomaly reporting from probe contexts: a bounded queue which
//! never blocks the producer and is drained out of band.

pub mod sink;
pub use sink::*;
