//! # Probecount events
//!
//! This crate contains the definitions of the records and events produced by
//! probecount, as well as the helpers used to display them. Everything here
//! can be marshaled to JSON and back.

pub mod events;
pub use events::*;

pub mod display;
pub use display::*;

pub mod record;
pub use record::*;
pub mod snapshot;
pub use snapshot::*;
pub mod diag;
pub use diag::*;
pub mod stats;
pub use stats::*;

// Re-export derive macros.
use probecount_derive::*;
