use std::{
    fmt,
    hint,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{bail, Result};

use events::{CounterKey, EventKind, HandlerStatsEvent};

use crate::core::{
    diag::DiagnosticSink,
    table::{CounterTable, TableError},
};

/// What to do when a table operation lost a race.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicy {
    /// Lookup then update or insert. A lost race drops the event.
    #[default]
    Lenient,
    /// Same as lenient, but after losing an insertion race the whole
    /// lookup/update cycle is run once more.
    RetryOnce,
    /// Atomic increment of existing records, falling back to the insertion
    /// path only on first occurrence of a key.
    Atomic,
}

impl RetryPolicy {
    pub const VALUES: [&'static str; 3] = ["lenient", "retry-once", "atomic"];
}

impl FromStr for RetryPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "lenient" => RetryPolicy::Lenient,
            "retry-once" => RetryPolicy::RetryOnce,
            "atomic" => RetryPolicy::Atomic,
            x => bail!("Unknown retry policy {x}"),
        })
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetryPolicy::Lenient => "lenient",
            RetryPolicy::RetryOnce => "retry-once",
            RetryPolicy::Atomic => "atomic",
        })
    }
}

/// How return events are accounted for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReturnMode {
    /// Returns increment an existing record, like entries do.
    #[default]
    Count,
    /// Returns only check a record exists for their key.
    Verify,
}

impl ReturnMode {
    pub const VALUES: [&'static str; 2] = ["count", "verify"];
}

impl FromStr for ReturnMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "count" => ReturnMode::Count,
            "verify" => ReturnMode::Verify,
            x => bail!("Unknown return mode {x}"),
        })
    }
}

/// Why an event did not make it into the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// A concurrent operation on the same key won.
    Race,
    /// The table is full and the key has no record.
    Capacity,
    /// Return event without a count record.
    Orphan,
}

/// Result of handling one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A record was created with a count of 1.
    Inserted,
    /// A record was incremented to the given count.
    Updated(u32),
    /// A return event found its record (`ReturnMode::Verify`).
    Verified,
    Dropped(DropReason),
}

const MSG_ORPHAN: &str = "count record missing on return";
const MSG_FULL: &str = "table full, event dropped";

// Attempts to increment a record whose insertion is being published by
// another context, before giving up.
const PUBLISH_SPINS: usize = 64;

#[derive(Default)]
struct Stats {
    events: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    verified: AtomicU64,
    dropped_race: AtomicU64,
    dropped_capacity: AtomicU64,
    orphan_returns: AtomicU64,
}

/// Translates observed events into table mutations.
///
/// Handling an event never blocks, never fails and never allocates: table
/// errors are turned into outcomes, statistics and diagnostics.
pub struct ProbeHandler {
    table: Arc<CounterTable>,
    sink: Arc<DiagnosticSink>,
    label: Arc<str>,
    policy: RetryPolicy,
    returns: ReturnMode,
    stats: Stats,
}

impl ProbeHandler {
    pub fn new(table: Arc<CounterTable>, sink: Arc<DiagnosticSink>) -> Self {
        ProbeHandler {
            label: Arc::from(table.name()),
            table,
            sink,
            policy: RetryPolicy::default(),
            returns: ReturnMode::default(),
            stats: Stats::default(),
        }
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn returns(mut self, returns: ReturnMode) -> Self {
        self.returns = returns;
        self
    }

    pub fn table(&self) -> &Arc<CounterTable> {
        &self.table
    }

    pub fn sink(&self) -> &Arc<DiagnosticSink> {
        &self.sink
    }

    /// Entry point for event sources, which have no way to consume an error.
    pub fn on_event(&self, kind: EventKind, key: CounterKey) {
        self.handle(kind, key);
    }

    /// Same as `on_event()`, reporting what happened.
    pub fn handle(&self, kind: EventKind, key: CounterKey) -> Outcome {
        self.stats.events.fetch_add(1, Ordering::Relaxed);

        let outcome = match (kind, self.returns) {
            (EventKind::Return, ReturnMode::Verify) => self.verify(key),
            _ => match self.policy {
                RetryPolicy::Lenient => self.count(kind, key, 0),
                RetryPolicy::RetryOnce => self.count(kind, key, 1),
                RetryPolicy::Atomic => self.count_atomic(kind, key),
            },
        };

        let stat = match outcome {
            Outcome::Inserted => &self.stats.inserted,
            Outcome::Updated(_) => &self.stats.updated,
            Outcome::Verified => &self.stats.verified,
            Outcome::Dropped(DropReason::Race) => &self.stats.dropped_race,
            Outcome::Dropped(DropReason::Capacity) => &self.stats.dropped_capacity,
            Outcome::Dropped(DropReason::Orphan) => &self.stats.orphan_returns,
        };
        stat.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    /// Lookup then update, the two steps being separately atomic. A
    /// concurrent update in between costs at most one increment.
    fn count(&self, kind: EventKind, key: CounterKey, retries: u8) -> Outcome {
        match self.table.lookup(key) {
            Some(record) => {
                let count = record.count.saturating_add(1);
                match self.table.update_existing(key, count) {
                    Ok(()) => Outcome::Updated(count),
                    Err(_) => self.missing(kind, key, retries),
                }
            }
            None => self.missing(kind, key, retries),
        }
    }

    fn missing(&self, kind: EventKind, key: CounterKey, retries: u8) -> Outcome {
        if kind == EventKind::Return {
            return self.orphan(key);
        }

        match self.table.insert_if_absent(key, 1) {
            Ok(()) => Outcome::Inserted,
            Err(TableError::AlreadyExists) if retries > 0 => self.count(kind, key, retries - 1),
            Err(TableError::CapacityExceeded(_)) => self.full(key),
            Err(_) => Outcome::Dropped(DropReason::Race),
        }
    }

    fn count_atomic(&self, kind: EventKind, key: CounterKey) -> Outcome {
        if let Ok(count) = self.table.increment(key) {
            return Outcome::Updated(count);
        }
        if kind == EventKind::Return {
            return self.orphan(key);
        }

        match self.table.insert_if_absent(key, 1) {
            Ok(()) => Outcome::Inserted,
            // Someone else is creating the record, count on top of it once
            // it's published.
            Err(TableError::AlreadyExists) => {
                for _ in 0..PUBLISH_SPINS {
                    if let Ok(count) = self.table.increment(key) {
                        return Outcome::Updated(count);
                    }
                    hint::spin_loop();
                }
                Outcome::Dropped(DropReason::Race)
            }
            Err(TableError::CapacityExceeded(_)) => self.full(key),
            Err(TableError::NotFound) => Outcome::Dropped(DropReason::Race),
        }
    }

    fn verify(&self, key: CounterKey) -> Outcome {
        match self.table.lookup(key) {
            Some(_) => Outcome::Verified,
            None => self.orphan(key),
        }
    }

    fn orphan(&self, key: CounterKey) -> Outcome {
        self.sink.emit(&self.label, MSG_ORPHAN, Some(key));
        Outcome::Dropped(DropReason::Orphan)
    }

    fn full(&self, key: CounterKey) -> Outcome {
        self.sink.emit(&self.label, MSG_FULL, Some(key));
        Outcome::Dropped(DropReason::Capacity)
    }

    /// Returns the handler statistics so far.
    pub fn stats(&self) -> HandlerStatsEvent {
        HandlerStatsEvent {
            source: self.table.name().to_string(),
            events: self.stats.events.load(Ordering::Relaxed),
            inserted: self.stats.inserted.load(Ordering::Relaxed),
            updated: self.stats.updated.load(Ordering::Relaxed),
            verified: self.stats.verified.load(Ordering::Relaxed),
            dropped_race: self.stats.dropped_race.load(Ordering::Relaxed),
            dropped_capacity: self.stats.dropped_capacity.load(Ordering::Relaxed),
            orphan_returns: self.stats.orphan_returns.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ProbeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeHandler")
            .field("table", &self.table)
            .field("policy", &self.policy)
            .field("returns", &self.returns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use test_case::test_case;

    use super::*;
    use crate::core::diag::DiagnosticDrain;

    fn handler(capacity: usize, policy: RetryPolicy) -> (ProbeHandler, DiagnosticDrain) {
        let table = Arc::new(CounterTable::new("rcount", capacity).unwrap());
        let (sink, drain) = DiagnosticSink::bounded(16);
        (
            ProbeHandler::new(table, Arc::new(sink)).policy(policy),
            drain,
        )
    }

    #[test_case(RetryPolicy::Lenient)]
    #[test_case(RetryPolicy::RetryOnce)]
    #[test_case(RetryPolicy::Atomic)]
    fn entry_then_returns(policy: RetryPolicy) {
        const ENTRIES: u32 = 10;
        const RETURNS: u32 = 4;
        let (handler, drain) = handler(10, policy);

        assert_eq!(handler.handle(EventKind::Entry, 1), Outcome::Inserted);
        for i in 2..=ENTRIES {
            assert_eq!(handler.handle(EventKind::Entry, 1), Outcome::Updated(i));
        }
        for _ in 0..RETURNS {
            handler.on_event(EventKind::Return, 1);
        }

        assert_eq!(handler.table().lookup(1).unwrap().count, ENTRIES + RETURNS);
        assert!(drain.try_iter().next().is_none());

        let stats = handler.stats();
        assert_eq!(stats.events, (ENTRIES + RETURNS) as u64);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.updated, (ENTRIES + RETURNS - 1) as u64);
        assert_eq!(stats.dropped(), 0);
    }

    #[test_case(RetryPolicy::Lenient)]
    #[test_case(RetryPolicy::Atomic)]
    fn verify_returns(policy: RetryPolicy) {
        const ENTRIES: u32 = 6;
        const RETURNS: u32 = 6;
        let (handler, drain) = handler(10, policy);
        let handler = handler.returns(ReturnMode::Verify);

        for _ in 0..ENTRIES {
            handler.on_event(EventKind::Entry, 1);
        }
        for _ in 0..RETURNS {
            assert_eq!(handler.handle(EventKind::Return, 1), Outcome::Verified);
        }

        assert_eq!(handler.table().lookup(1).unwrap().count, ENTRIES);
        assert!(drain.try_iter().next().is_none());

        // Orphans are still reported.
        assert_eq!(
            handler.handle(EventKind::Return, 2),
            Outcome::Dropped(DropReason::Orphan)
        );
        assert_eq!(drain.try_iter().count(), 1);

        // Every event is accounted for.
        let stats = handler.stats();
        assert_eq!(stats.events, (ENTRIES + RETURNS + 1) as u64);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.updated, (ENTRIES - 1) as u64);
        assert_eq!(stats.verified, RETURNS as u64);
        assert_eq!(stats.orphan_returns, 1);
        assert_eq!(
            stats.inserted + stats.updated + stats.verified + stats.dropped(),
            stats.events
        );
    }

    #[test_case(RetryPolicy::Lenient)]
    #[test_case(RetryPolicy::RetryOnce)]
    #[test_case(RetryPolicy::Atomic)]
    fn orphan_return(policy: RetryPolicy) {
        let (handler, drain) = handler(10, policy);

        assert_eq!(
            handler.handle(EventKind::Return, 0xbebecafe),
            Outcome::Dropped(DropReason::Orphan)
        );
        assert!(handler.table().is_empty());

        let diags: Vec<_> = drain.try_iter().collect();
        assert_eq!(diags.len(), 1);
        assert_eq!(&*diags[0].label, "rcount");
        assert_eq!(diags[0].message, MSG_ORPHAN);
        assert_eq!(diags[0].key, Some(0xbebecafe));
        assert_eq!(handler.stats().orphan_returns, 1);
    }

    #[test_case(RetryPolicy::Lenient)]
    #[test_case(RetryPolicy::Atomic)]
    fn full_table(policy: RetryPolicy) {
        let (handler, drain) = handler(2, policy);

        handler.on_event(EventKind::Entry, 1);
        handler.on_event(EventKind::Entry, 2);
        assert_eq!(
            handler.handle(EventKind::Entry, 3),
            Outcome::Dropped(DropReason::Capacity)
        );
        // Known keys are still counted.
        assert_eq!(handler.handle(EventKind::Entry, 1), Outcome::Updated(2));

        assert!(handler.table().lookup(3).is_none());
        assert_eq!(handler.table().len(), 2);
        let diags: Vec<_> = drain.try_iter().collect();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, MSG_FULL);
        assert_eq!(handler.stats().dropped_capacity, 1);
    }

    #[test]
    fn disabled_diagnostics() {
        let table = Arc::new(CounterTable::new("rcount", 1).unwrap());
        let handler = ProbeHandler::new(table, Arc::new(DiagnosticSink::disabled()));

        assert_eq!(
            handler.handle(EventKind::Return, 1),
            Outcome::Dropped(DropReason::Orphan)
        );
    }

    #[test]
    fn saturation() {
        let (handler, _drain) = handler(1, RetryPolicy::Lenient);
        handler.table().insert_if_absent(1, u32::MAX - 1).unwrap();

        assert_eq!(handler.handle(EventKind::Entry, 1), Outcome::Updated(u32::MAX));
        assert_eq!(handler.handle(EventKind::Entry, 1), Outcome::Updated(u32::MAX));
        assert_eq!(handler.table().lookup(1).unwrap().count, u32::MAX);
    }

    #[test_case(RetryPolicy::Lenient)]
    #[test_case(RetryPolicy::RetryOnce)]
    #[test_case(RetryPolicy::Atomic)]
    fn concurrent_same_key(policy: RetryPolicy) {
        const THREADS: usize = 16;
        let (handler, _drain) = handler(10, policy);
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    handler.on_event(EventKind::Entry, 0xbebecafe);
                });
            }
        });

        let count = handler.table().lookup(0xbebecafe).unwrap().count;
        assert!((1..=THREADS as u32).contains(&count));
        assert_eq!(handler.table().len(), 1);

        let stats = handler.stats();
        assert_eq!(stats.events, THREADS as u64);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.dropped_capacity + stats.orphan_returns, 0);
    }

    #[test]
    fn concurrent_atomic_exact() {
        const THREADS: u32 = 8;
        const EVENTS: u32 = 500;
        let (handler, _drain) = handler(10, RetryPolicy::Atomic);
        handler.on_event(EventKind::Entry, 1);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..EVENTS {
                        handler.on_event(EventKind::Entry, 1);
                    }
                });
            }
        });

        assert_eq!(
            handler.table().lookup(1).unwrap().count,
            THREADS * EVENTS + 1
        );
    }

    #[test]
    fn concurrent_lenient_bounds() {
        const THREADS: u32 = 8;
        const EVENTS: u32 = 500;
        let (handler, _drain) = handler(10, RetryPolicy::Lenient);

        thread::scope(|s| {
            for t in 0..THREADS {
                let handler = &handler;
                s.spawn(move || {
                    for _ in 0..EVENTS {
                        handler.on_event(EventKind::Entry, t % 2);
                    }
                });
            }
        });

        // Races may lose increments but never create any.
        let stats = handler.stats();
        let total: u64 = handler
            .table()
            .snapshot()
            .iter()
            .map(|r| r.count as u64)
            .sum();
        assert!(total >= 2 && total <= (THREADS * EVENTS) as u64);
        assert_eq!(handler.table().len(), 2);
        assert_eq!(stats.events, (THREADS * EVENTS) as u64);
        assert_eq!(stats.inserted + stats.updated + stats.dropped_race, stats.events);
    }

    #[test]
    fn policy_from_str() {
        for value in RetryPolicy::VALUES {
            assert_eq!(value.parse::<RetryPolicy>().unwrap().to_string(), value);
        }
        assert!("strict".parse::<RetryPolicy>().is_err());
        assert_eq!("verify".parse::<ReturnMode>().unwrap(), ReturnMode::Verify);
        assert!("ignore".parse::<ReturnMode>().is_err());
    }
}
