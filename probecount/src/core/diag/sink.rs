use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver, SyncSender, TryIter},
    Arc,
};

use log::warn;

use events::{CounterKey, DiagnosticEvent};

use crate::helpers::time::monotonic_timestamp;

/// Raw diagnostic, as queued from a probe context. Building one does not
/// allocate: the label is shared and the message static.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub timestamp: u64,
    pub label: Arc<str>,
    pub message: &'static str,
    pub key: Option<CounterKey>,
}

impl From<Diagnostic> for DiagnosticEvent {
    fn from(diag: Diagnostic) -> Self {
        DiagnosticEvent {
            timestamp: diag.timestamp,
            label: diag.label.to_string(),
            message: diag.message.to_string(),
            key: diag.key,
        }
    }
}

/// Producer side of the diagnostic queue, shared by all probe handlers.
///
/// `emit()` never blocks: when the queue is full (or nobody drains it
/// anymore) the diagnostic is dropped and accounted for.
#[derive(Debug)]
pub struct DiagnosticSink {
    txc: Option<SyncSender<Diagnostic>>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side of the diagnostic queue.
#[derive(Debug)]
pub struct DiagnosticDrain {
    rxc: Receiver<Diagnostic>,
    dropped: Arc<AtomicU64>,
    /// Dropped diagnostics already reported by `drain_to_log()`.
    reported: u64,
}

impl DiagnosticSink {
    /// Default number of diagnostics waiting to be drained.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a queue holding at most `capacity` diagnostics. The queue
    /// storage is allocated here, once.
    pub fn bounded(capacity: usize) -> (DiagnosticSink, DiagnosticDrain) {
        let (txc, rxc) = mpsc::sync_channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        (
            DiagnosticSink {
                txc: Some(txc),
                dropped: Arc::clone(&dropped),
            },
            DiagnosticDrain {
                rxc,
                dropped,
                reported: 0,
            },
        )
    }

    /// A sink dropping everything.
    pub fn disabled() -> DiagnosticSink {
        DiagnosticSink {
            txc: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a diagnostic, best effort.
    pub fn emit(&self, label: &Arc<str>, message: &'static str, key: Option<CounterKey>) {
        let txc = match &self.txc {
            Some(txc) => txc,
            None => return,
        };

        let diag = Diagnostic {
            timestamp: monotonic_timestamp().unwrap_or_default(),
            label: Arc::clone(label),
            message,
            key,
        };
        if txc.try_send(diag).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of diagnostics dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DiagnosticDrain {
    /// Iterates over the diagnostics currently queued, without waiting for
    /// new ones.
    pub fn try_iter(&self) -> TryIter<'_, Diagnostic> {
        self.rxc.try_iter()
    }

    /// Number of diagnostics dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Forwards all queued diagnostics to the logger, and reports the ones
    /// dropped since the last call. Returns the number of diagnostics logged.
    pub fn drain_to_log(&mut self) -> usize {
        let mut logged = 0;
        for diag in self.rxc.try_iter() {
            match diag.key {
                Some(key) => warn!("[{}] {} (key {key:#x})", diag.label, diag.message),
                None => warn!("[{}] {}", diag.label, diag.message),
            }
            logged += 1;
        }

        self.report_dropped();
        logged
    }

    /// Logs the number of diagnostics dropped since the last report, if any.
    /// Returns that number.
    pub fn report_dropped(&mut self) -> u64 {
        let dropped = self.dropped();
        if dropped <= self.reported {
            return 0;
        }

        let new = dropped - self.reported;
        warn!("{new} diagnostic(s) dropped (queue full)");
        self.reported = dropped;
        new
    }
}
