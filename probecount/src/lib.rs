//! # Probecount
//!
//! Per-key event counting for entry/return probes. Probe handlers count into a
//! fixed-capacity, lock-free table shared with any number of readers; anomalies
//! go through a bounded, lossy diagnostic queue.

pub mod config;
pub mod core;
pub mod helpers;

// Re-export the events crate so users of the library get the record and event
// types from the same path.
pub use events;
