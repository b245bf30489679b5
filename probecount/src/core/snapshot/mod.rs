//! # Snapshots
//!
//! Read side of the counters: sources of records and the watcher polling
//! them.

pub mod pinned;
pub use pinned::*;

pub mod reader;
pub use reader::*;

pub mod watcher;
pub use watcher::*;
