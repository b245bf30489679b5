//! # Watcher
//!
//! Periodically reads counter sources and reports the counts that changed
//! since the previous read.

use std::{collections::HashMap, thread, time::Duration};

use anyhow::{anyhow, Result};
use log::error;

use events::{CountChangeEvent, CounterKey, CounterRecord, DiagnosticEvent, Event};

use super::SnapshotReader;
use crate::{
    core::diag::DiagnosticDrain,
    helpers::{signals::Running, time::monotonic_timestamp},
};

/// Remembers the last count seen for each (source, key) pair.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    seen: HashMap<String, HashMap<CounterKey, u32>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new read of `source` and returns the records whose count
    /// differs from the previous read, ordered by key.
    pub fn update(
        &mut self,
        timestamp: u64,
        source: &str,
        records: &[CounterRecord],
    ) -> Vec<CountChangeEvent> {
        let seen = self.seen.entry(source.to_string()).or_default();

        let mut changes: Vec<_> = records
            .iter()
            .filter_map(|record| {
                let previous = seen.insert(record.key, record.count);
                (previous != Some(record.count)).then(|| CountChangeEvent {
                    timestamp,
                    source: source.to_string(),
                    key: record.key,
                    count: record.count,
                    previous,
                })
            })
            .collect();

        changes.sort_by_key(|c| c.key);
        changes
    }

    /// Last count seen for a key.
    pub fn last(&self, source: &str, key: CounterKey) -> Option<u32> {
        self.seen.get(source)?.get(&key).copied()
    }
}

type Output = Box<dyn FnMut(Event) -> Result<()> + Send>;

/// Polls a set of sources from a dedicated thread.
pub struct Watcher {
    sources: Vec<Box<dyn SnapshotReader>>,
    tracker: ChangeTracker,
    diagnostics: Option<DiagnosticDrain>,
    output: Output,
    interval: Duration,
    // The name of the thread
    name: String,
}

impl Watcher {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    /// `output` is called with every change and diagnostic; an error from it
    /// stops the watcher.
    pub fn new<F>(name: &str, sources: Vec<Box<dyn SnapshotReader>>, output: F) -> Self
    where
        F: FnMut(Event) -> Result<()> + Send + 'static,
    {
        Watcher {
            sources,
            tracker: ChangeTracker::new(),
            diagnostics: None,
            output: Box::new(output),
            interval: Self::DEFAULT_INTERVAL,
            name: name.to_string(),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Diagnostics to output on every poll, after the changes.
    pub fn diagnostics(mut self, drain: DiagnosticDrain) -> Self {
        self.diagnostics = Some(drain);
        self
    }

    /// Reads all sources once and outputs the changes, then the pending
    /// diagnostics. Sources failing to be read are reported and skipped.
    /// Returns the number of changes.
    pub fn poll(&mut self) -> Result<usize> {
        let timestamp = monotonic_timestamp()?;
        let mut changes = 0;

        for source in self.sources.iter() {
            let records = match source.read_all() {
                Ok(records) => records,
                Err(e) => {
                    error!("Could not read {}: {e}", source.name());
                    continue;
                }
            };

            for change in self.tracker.update(timestamp, source.name(), &records) {
                (self.output)(Event::from(change))?;
                changes += 1;
            }
        }

        if let Some(drain) = self.diagnostics.as_mut() {
            for diag in drain.try_iter() {
                (self.output)(Event::from(DiagnosticEvent::from(diag)))?;
            }
            drain.report_dropped();
        }

        Ok(changes)
    }

    /// Polls every interval from a new thread, until `state` is terminated.
    /// A last poll is done on termination so no change is missed.
    pub fn start(mut self, state: Running) -> Result<WatcherHandle> {
        let name = self.name.clone();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            while state.sleep(self.interval) {
                if let Err(e) = self.poll() {
                    state.terminate();
                    return Err(e);
                }
            }
            self.poll().map(|_| ())
        })?;

        Ok(WatcherHandle {
            name,
            thread: Some(thread),
        })
    }
}

/// Handle on a running `Watcher`.
pub struct WatcherHandle {
    name: String,
    thread: Option<thread::JoinHandle<Result<()>>>,
}

impl WatcherHandle {
    /// Waits for the watcher to stop, returning its error if any.
    pub fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|e| anyhow!("Failed to join thread {}: {e:?}", self.name))?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::core::{diag::DiagnosticSink, table::CounterTable};

    struct Failing;

    impl SnapshotReader for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn capacity(&self) -> Option<u32> {
            None
        }

        fn read_all(&self) -> Result<Vec<CounterRecord>> {
            Err(anyhow!("Iterator encountered an error"))
        }
    }

    fn collector() -> (Arc<Mutex<Vec<Event>>>, impl FnMut(Event) -> Result<()> + Send) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let clone = Arc::clone(&events);
        (events, move |e| {
            clone.lock().unwrap().push(e);
            Ok(())
        })
    }

    #[test]
    fn tracker_changes_only() {
        let mut tracker = ChangeTracker::new();

        let changes = tracker.update(
            1,
            "rcount",
            &[CounterRecord::new(2, 1), CounterRecord::new(1, 1)],
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key, 1);
        assert_eq!(changes[0].previous, None);

        let changes = tracker.update(
            2,
            "rcount",
            &[CounterRecord::new(1, 1), CounterRecord::new(2, 4)],
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, 2);
        assert_eq!(changes[0].count, 4);
        assert_eq!(changes[0].previous, Some(1));
        assert_eq!(changes[0].timestamp, 2);

        assert!(tracker
            .update(3, "rcount", &[CounterRecord::new(2, 4)])
            .is_empty());
        assert_eq!(tracker.last("rcount", 2), Some(4));
        assert_eq!(tracker.last("other", 2), None);
    }

    #[test]
    fn tracker_per_source() {
        let mut tracker = ChangeTracker::new();
        let records = [CounterRecord::new(1, 1)];

        assert_eq!(tracker.update(1, "a", &records).len(), 1);
        assert_eq!(tracker.update(1, "b", &records).len(), 1);
        assert!(tracker.update(2, "a", &records).is_empty());
    }

    #[test]
    fn poll() {
        let table = Arc::new(CounterTable::new("rcount", 10).unwrap());
        let (sink, drain) = DiagnosticSink::bounded(4);
        let (events, output) = collector();
        let mut watcher = Watcher::new(
            "watcher",
            vec![Box::new(Failing), Box::new(Arc::clone(&table))],
            output,
        )
        .diagnostics(drain);

        assert_eq!(watcher.poll().unwrap(), 0);

        table.insert_if_absent(0xbebecafe, 1).unwrap();
        sink.emit(&Arc::from("rcount"), "got here!", None);
        assert_eq!(watcher.poll().unwrap(), 1);
        assert_eq!(watcher.poll().unwrap(), 0);
        assert_eq!(sink.dropped(), 0);

        table.increment(0xbebecafe).unwrap();
        assert_eq!(watcher.poll().unwrap(), 1);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);

        // Diagnostics follow the changes of the same poll.
        assert!(events[0].change.is_some());
        let diag = events[1].diagnostic.as_ref().unwrap();
        assert_eq!(diag.label, "rcount");
        assert_eq!(diag.message, "got here!");
        assert_eq!(diag.key, None);

        let change = events[2].change.as_ref().unwrap();
        assert_eq!(change.source, "rcount");
        assert_eq!(change.count, 2);
        assert_eq!(change.previous, Some(1));
    }

    #[test]
    fn output_error() {
        let table = Arc::new(CounterTable::new("rcount", 10).unwrap());
        table.insert_if_absent(1, 1).unwrap();
        let mut watcher = Watcher::new("watcher", vec![Box::new(table)], |_| {
            Err(anyhow!("Broken pipe"))
        });

        assert!(watcher.poll().is_err());
    }

    #[test]
    fn start_and_stop() {
        let table = Arc::new(CounterTable::new("rcount", 10).unwrap());
        let (events, output) = collector();
        let state = Running::new();

        let mut handle = Watcher::new("watcher", vec![Box::new(Arc::clone(&table))], output)
            .interval(Duration::from_millis(10))
            .start(state.clone())
            .unwrap();

        table.insert_if_absent(7, 1).unwrap();
        state.terminate();
        handle.join().unwrap();

        // The final poll saw the record.
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change.as_ref().unwrap().key, 7);
    }
}
