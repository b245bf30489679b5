use std::fmt;

use crate::{event_section, *};

/// Point-in-time (or near point-in-time) content of a counting table.
#[event_section("snapshot")]
#[derive(Default)]
pub struct SnapshotEvent {
    /// Monotonic timestamp of when the snapshot was taken.
    pub timestamp: u64,
    /// Name of the table or map the records were read from.
    pub source: String,
    /// Capacity of the source, if known.
    pub capacity: Option<u32>,
    /// Records, sorted by key.
    pub records: Vec<CounterRecord>,
}

impl SnapshotEvent {
    pub fn new(timestamp: u64, source: &str, mut records: Vec<CounterRecord>) -> Self {
        records.sort_unstable_by_key(|r| r.key);
        Self {
            timestamp,
            source: source.to_string(),
            capacity: None,
            records,
        }
    }

    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sum of all the counts in the snapshot.
    pub fn total(&self) -> u64 {
        self.records.iter().map(|r| r.count as u64).sum()
    }
}

impl EventFmt for SnapshotEvent {
    fn event_fmt(&self, f: &mut fmt::Formatter, format: DisplayFormat) -> fmt::Result {
        write!(f, "{} [snapshot] {} ({}", self.timestamp, self.source, self.records.len())?;
        if let Some(capacity) = self.capacity {
            write!(f, "/{capacity}")?;
        }
        write!(f, " records, total {})", self.total())?;

        for record in self.records.iter() {
            match format.multiline {
                true => write!(f, "\n  ")?,
                false => write!(f, " ")?,
            }
            record.event_fmt(f, format)?;
        }
        Ok(())
    }
}

/// A count that changed since the previous poll of its source.
#[event_section("change")]
pub struct CountChangeEvent {
    /// Monotonic timestamp of the poll that noticed the change.
    pub timestamp: u64,
    pub source: String,
    pub key: CounterKey,
    pub count: u32,
    /// Count seen during the previous poll, if the key was known then.
    pub previous: Option<u32>,
}

impl EventFmt for CountChangeEvent {
    fn event_fmt(&self, f: &mut fmt::Formatter, format: DisplayFormat) -> fmt::Result {
        write!(f, "{} [change] {} ", self.timestamp, self.source)?;
        CounterRecord::new(self.key, self.count).event_fmt(f, format)?;
        match self.previous {
            Some(previous) => write!(f, " (+{})", self.count.saturating_sub(previous)),
            None => write!(f, " (new)"),
        }
    }
}
