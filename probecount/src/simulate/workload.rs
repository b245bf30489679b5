use std::{fmt, str::FromStr, thread};

use anyhow::{bail, Result};
use log::debug;

use probecount::{
    core::probe::{KeySource, Probe},
    events::CounterKey,
    helpers::signals::Running,
};

/// How workers choose the key of their events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkloadKey {
    /// Keys computed by the probes, which must use this key source.
    Source(KeySource),
    /// Keys spread over `0..keys`.
    Range,
}

impl FromStr for WorkloadKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "range" => WorkloadKey::Range,
            s => WorkloadKey::Source(s.parse()?),
        })
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKey::Source(source) => write!(f, "{source}"),
            WorkloadKey::Range => f.write_str("range"),
        }
    }
}

/// Synthetic event source: worker threads calling the probed function.
#[derive(Debug)]
pub(crate) struct Workload {
    pub(crate) threads: usize,
    /// Entry events per thread.
    pub(crate) events: u32,
    /// Share of entries followed by a return, in [0, 1].
    pub(crate) returns: f64,
    /// Returns without an entry, per thread.
    pub(crate) orphans: u32,
    pub(crate) key: WorkloadKey,
    /// Number of keys used by `WorkloadKey::Range`.
    pub(crate) keys: u32,
}

impl Workload {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            bail!("At least one thread is needed");
        }
        if !(0.0..=1.0).contains(&self.returns) {
            bail!("Return ratio must be in [0, 1] (got {})", self.returns);
        }
        if self.key == WorkloadKey::Range && self.keys == 0 {
            bail!("The range key source needs at least one key");
        }
        Ok(())
    }

    /// Key source the probes should be built with, if the keys don't come
    /// from the workload itself.
    pub(crate) fn key_source(&self) -> Option<KeySource> {
        match self.key {
            WorkloadKey::Source(source) => Some(source),
            WorkloadKey::Range => None,
        }
    }

    /// Entries followed by a return, per thread.
    fn returns_per_thread(&self) -> u32 {
        (self.events as f64 * self.returns).floor() as u32
    }

    /// Number of entry and return events fired by all workers, orphans
    /// excluded.
    pub(crate) fn expected(&self) -> (u64, u64) {
        let threads = self.threads as u64;
        (
            self.events as u64 * threads,
            self.returns_per_thread() as u64 * threads,
        )
    }

    /// Runs the workers to completion, or until `state` is terminated.
    pub(crate) fn run(&self, entry: &Probe, ret: &Probe, state: &Running) -> Result<()> {
        self.validate()?;

        thread::scope(|s| -> Result<()> {
            for id in 0..self.threads {
                thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn_scoped(s, move || self.worker(id as u32, entry, ret, state))?;
            }
            Ok(())
        })
    }

    fn worker(&self, id: u32, entry: &Probe, ret: &Probe, state: &Running) {
        let returns = self.returns_per_thread();

        for i in 0..self.events {
            if !state.running() {
                debug!("worker-{id} interrupted after {i} event(s)");
                return;
            }

            match self.key {
                WorkloadKey::Source(_) => {
                    entry.fire();
                    if i < returns {
                        ret.fire();
                    }
                }
                WorkloadKey::Range => {
                    let key = self.range_key(id, i);
                    entry.fire_with_key(key);
                    if i < returns {
                        ret.fire_with_key(key);
                    }
                }
            }
        }

        // Orphans use keys no entry ever used.
        for i in 0..self.orphans {
            let key = match self.key {
                WorkloadKey::Source(_) => ret.current_key(),
                WorkloadKey::Range => self.range_key(id, i),
            };
            ret.fire_with_key(!key);
        }
    }

    fn range_key(&self, id: u32, i: u32) -> CounterKey {
        id.wrapping_mul(self.events).wrapping_add(i) % self.keys
    }
}
