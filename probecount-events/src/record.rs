use std::fmt;

use crate::{event_type, *};

/// Caller-defined identifier grouping counted events (a pid, a connection id,
/// a hashed call site...). Only equality matters.
pub type CounterKey = u32;

/// Key used by the SSL_read instrumentation for every event, standing in for a
/// derived identifier.
pub const SENTINEL_KEY: CounterKey = 0xbebe_cafe;

/// One entry of a counting table.
///
/// The layout is shared with the BPF side (`{u32 key, u32 count}`): a record
/// can be decoded from the raw bytes of a map entry.
#[event_type]
#[derive(Copy, Default, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct CounterRecord {
    pub key: CounterKey,
    pub count: u32,
}
unsafe impl plain::Plain for CounterRecord {}

impl CounterRecord {
    pub fn new(key: CounterKey, count: u32) -> Self {
        Self { key, count }
    }
}

impl EventFmt for CounterRecord {
    fn event_fmt(&self, f: &mut fmt::Formatter, _: DisplayFormat) -> fmt::Result {
        write!(f, "key {} [{:#x}] count {}", self.key, self.key, self.count)
    }
}

/// Kind of an observed event.
#[event_type]
#[derive(Copy, Hash)]
pub enum EventKind {
    /// Function entry.
    Entry,
    /// Function return.
    Return,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Entry => "entry",
            EventKind::Return => "return",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout() {
        assert_eq!(std::mem::size_of::<CounterRecord>(), 8);

        let mut raw = Vec::new();
        raw.extend_from_slice(&SENTINEL_KEY.to_ne_bytes());
        raw.extend_from_slice(&42u32.to_ne_bytes());

        let mut record = CounterRecord::default();
        plain::copy_from_bytes(&mut record, &raw).unwrap();
        assert_eq!(record, CounterRecord::new(SENTINEL_KEY, 42));
    }

    #[test]
    fn record_display() {
        let record = CounterRecord::new(SENTINEL_KEY, 3);
        assert_eq!(
            format!("{}", record.display(DisplayFormat::new())),
            "key 3200174846 [0xbebecafe] count 3"
        );
    }

    #[test]
    fn kind_json() {
        assert_eq!(
            serde_json::to_string(&EventKind::Return).unwrap(),
            "\"return\""
        );
        assert_eq!(
            serde_json::from_str::<EventKind>("\"entry\"").unwrap(),
            EventKind::Entry
        );
    }
}
