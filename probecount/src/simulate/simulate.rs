//! # Simulate
//!
//! Drives a pair of entry/return probes from worker threads, standing in for
//! the instrumented program, and reports the resulting counts.

use std::{
    io,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use clap::{builder::PossibleValuesParser, Parser};
use log::info;

use probecount::{
    config::Config,
    core::{
        diag::DiagnosticSink,
        probe::{Probe, ProbeHandler, RetryPolicy, ReturnMode},
        snapshot::Watcher,
        table::CounterTable,
    },
    events::{Event, SnapshotEvent},
    helpers::{output::PrintEvent, signals::Running, time::monotonic_timestamp},
};

use super::workload::{Workload, WorkloadKey};
use crate::cli::*;

/// Simulate probe hits from concurrent threads and print the counts
#[derive(Parser, Debug)]
#[command(name = "simulate")]
pub(crate) struct Simulate {
    /// Number of worker threads
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Entry events fired by each thread
    #[arg(long, default_value_t = 1000)]
    events: u32,
    /// Share of entry events followed by a return event, in [0, 1]
    #[arg(long, default_value_t = 1.0)]
    returns: f64,
    /// Return events without a matching entry, fired by each thread
    #[arg(long, default_value_t = 0)]
    orphans: u32,
    /// Key of events: sentinel, pid, tid, range or a constant key (default:
    /// from the configuration)
    #[arg(long)]
    key_source: Option<WorkloadKey>,
    /// Number of distinct keys used by the range key source
    #[arg(long, default_value_t = 4)]
    keys: u32,
    /// Retry policy of the probe handler
    #[arg(long, value_parser=PossibleValuesParser::new(RetryPolicy::VALUES))]
    policy: Option<String>,
    /// Accounting of return events
    #[arg(long, value_parser=PossibleValuesParser::new(ReturnMode::VALUES))]
    return_mode: Option<String>,
    /// Capacity of the counting table
    #[arg(long)]
    capacity: Option<usize>,
    /// Log every probe hit
    #[arg(long)]
    trace_hits: bool,
    /// Interval between two reads of the table, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Output format
    #[arg(long, value_enum, default_value_t)]
    format: CliFormat,
    /// Display events on multiple lines (text format only)
    #[arg(long)]
    multiline: bool,
}

impl Simulate {
    /// Applies the command line overrides to the configuration.
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(policy) = &self.policy {
            config.handler.policy = policy.parse()?;
        }
        if let Some(mode) = &self.return_mode {
            config.handler.returns = mode.parse()?;
        }
        if let Some(capacity) = self.capacity {
            config.table.capacity = capacity;
        }
        if let Some(interval) = self.interval_ms {
            config.watch.interval_ms = interval;
        }
        config.handler.trace_hits |= self.trace_hits;
        config.validate()
    }

    fn workload(&self, config: &Config) -> Workload {
        Workload {
            threads: self.threads,
            events: self.events,
            returns: self.returns,
            orphans: self.orphans,
            key: self
                .key_source
                .unwrap_or(WorkloadKey::Source(config.handler.key)),
            keys: self.keys,
        }
    }
}

impl SubCommandParserRunner for Simulate {
    fn run(&mut self, main_config: &MainConfig) -> Result<()> {
        let mut config = main_config.load_config()?;
        self.apply(&mut config)?;
        let workload = self.workload(&config);
        workload.validate()?;

        let table = Arc::new(CounterTable::new(&config.table.name, config.table.capacity)?);
        let (sink, drain) = DiagnosticSink::bounded(config.diagnostics.capacity);
        let sink = Arc::new(sink);
        let handler = Arc::new(
            ProbeHandler::new(Arc::clone(&table), Arc::clone(&sink))
                .policy(config.handler.policy)
                .returns(config.handler.returns),
        );
        let key_source = workload.key_source().unwrap_or(config.handler.key);
        let entry = Probe::entry("SSL_read", Arc::clone(&handler))
            .key_source(key_source)
            .trace_hits(config.handler.trace_hits);
        let ret = Probe::ret("SSL_read", Arc::clone(&handler))
            .key_source(key_source)
            .trace_hits(config.handler.trace_hits);

        let printer = Arc::new(Mutex::new(PrintEvent::new(
            Box::new(io::stdout()),
            self.format.print_format(self.multiline),
        )));

        let state = Running::new();
        state.register_term_signals()?;

        let output = Arc::clone(&printer);
        let mut watcher = Watcher::new(
            "watcher",
            vec![Box::new(Arc::clone(&table))],
            move |event| {
                output
                    .lock()
                    .map_err(|_| anyhow!("Printer lock poisoned"))?
                    .process_one(&event)
            },
        )
        .interval(config.interval())
        .diagnostics(drain)
        .start(state.clone())?;

        info!(
            "Firing {} entry event(s) from {} thread(s) (policy {}, key source {})",
            workload.events as u64 * workload.threads as u64,
            workload.threads,
            config.handler.policy,
            workload.key,
        );
        let res = workload.run(&entry, &ret, &state);

        // Stop the watcher, it does a last poll before exiting.
        state.terminate();
        watcher.join()?;
        res?;

        let mut printer = printer
            .lock()
            .map_err(|_| anyhow!("Printer lock poisoned"))?;
        let snapshot = SnapshotEvent::new(monotonic_timestamp()?, table.name(), table.snapshot())
            .capacity(table.capacity() as u32);
        printer.process_one(&Event::from(snapshot))?;
        printer.process_one(&Event::from(handler.stats()))?;
        printer.flush()?;

        let (entries, returns) = workload.expected();
        info!(
            "{entries} entry and {returns} return event(s) fired, {} diagnostic(s) dropped",
            sink.dropped()
        );
        Ok(())
    }
}
