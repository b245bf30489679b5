use std::fmt;

use crate::{event_section, *};

/// Anomaly reported by a probe handler, e.g. a return event without a
/// matching count record.
#[event_section("diagnostic")]
pub struct DiagnosticEvent {
    /// Monotonic timestamp of when the anomaly was observed.
    pub timestamp: u64,
    /// Probe or table the diagnostic comes from.
    pub label: String,
    pub message: String,
    pub key: Option<CounterKey>,
}

impl EventFmt for DiagnosticEvent {
    fn event_fmt(&self, f: &mut fmt::Formatter, _: DisplayFormat) -> fmt::Result {
        write!(f, "{} [{}] {}", self.timestamp, self.label, self.message)?;
        if let Some(key) = self.key {
            write!(f, " (key {key:#x})")?;
        }
        Ok(())
    }
}
