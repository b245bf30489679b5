use std::fmt;

use crate::{event_section, *};

/// Accounting of what a probe handler did with the events it received.
#[event_section("stats")]
#[derive(Default, PartialEq, Eq)]
pub struct HandlerStatsEvent {
    /// Table the handler counts into.
    pub source: String,
    /// Events received.
    pub events: u64,
    /// Records created.
    pub inserted: u64,
    /// Records incremented.
    pub updated: u64,
    /// Return events which found their record, without counting.
    pub verified: u64,
    /// Events lost to a concurrent insert or update on the same key.
    pub dropped_race: u64,
    /// Events dropped because the table was full.
    pub dropped_capacity: u64,
    /// Return events without a count record.
    pub orphan_returns: u64,
}

impl HandlerStatsEvent {
    /// Events that did not make it into the table.
    pub fn dropped(&self) -> u64 {
        self.dropped_race + self.dropped_capacity + self.orphan_returns
    }
}

impl EventFmt for HandlerStatsEvent {
    fn event_fmt(&self, f: &mut fmt::Formatter, format: DisplayFormat) -> fmt::Result {
        let sep = format.separator();
        write!(f, "[stats] {}", self.source)?;
        write!(f, "{sep}events {}", self.events)?;
        write!(f, "{sep}inserted {} updated {}", self.inserted, self.updated)?;
        if self.verified > 0 {
            write!(f, " verified {}", self.verified)?;
        }
        write!(
            f,
            "{sep}dropped race {} capacity {} orphan returns {}",
            self.dropped_race, self.dropped_capacity, self.orphan_returns
        )
    }
}
