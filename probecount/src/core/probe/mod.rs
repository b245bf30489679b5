//! # Probes
//!
//! Probes are named attachment points firing entry or return events. Each
//! event goes through a `ProbeHandler` which accounts for it in a
//! `CounterTable`.

pub mod handler;
pub use handler::*;

#[allow(clippy::module_inception)]
pub mod probe;
pub use probe::*;
