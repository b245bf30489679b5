//! Internal representation of events. Those events can be marshaled/unmarshaled
//! to JSON to be stored or consumed by other tools.
//!
//! As an example, a change event looks like:
//!
//! {
//!     "change": {
//!         "timestamp": 7322460997041,
//!         "source": "rcount",
//!         "key": 3200174846,
//!         "count": 12,
//!         "previous": 10
//!     }
//! }

use std::{any::Any, fmt};

use anyhow::{bail, Result};

use crate::*;

/// Full event. Only one section is usually set, but nothing prevents a
/// producer from grouping related sections together.
#[serde_with::skip_serializing_none]
#[derive(Default, Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Event {
    pub snapshot: Option<SnapshotEvent>,
    pub change: Option<CountChangeEvent>,
    pub diagnostic: Option<DiagnosticEvent>,
    pub stats: Option<HandlerStatsEvent>,
}

impl Event {
    pub fn new() -> Event {
        Event::default()
    }

    /// Create an Event from a json string.
    pub fn from_json(line: &str) -> Result<Event> {
        let event: Event = serde_json::from_str(line)?;
        if event.is_empty() {
            bail!("Event has no known section: {line}");
        }
        Ok(event)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.sections().is_empty()
    }

    /// Returns the sections set in the event, in display order.
    pub fn sections(&self) -> Vec<&dyn EventSection> {
        [
            self.snapshot.as_ref().map(|s| s as &dyn EventSection),
            self.change.as_ref().map(|s| s as &dyn EventSection),
            self.diagnostic.as_ref().map(|s| s as &dyn EventSection),
            self.stats.as_ref().map(|s| s as &dyn EventSection),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

impl EventFmt for Event {
    fn event_fmt(&self, f: &mut fmt::Formatter, format: DisplayFormat) -> fmt::Result {
        let mut delim = DelimWriter::new(format.separator());
        self.sections().iter().try_for_each(|section| {
            delim.write(f)?;
            section.event_fmt(f, format)
        })
    }
}

macro_rules! event_from_section {
    ($section: ty, $field: ident) => {
        impl From<$section> for Event {
            fn from(section: $section) -> Self {
                Event {
                    $field: Some(section),
                    ..Default::default()
                }
            }
        }
    };
}

event_from_section!(SnapshotEvent, snapshot);
event_from_section!(CountChangeEvent, change);
event_from_section!(DiagnosticEvent, diagnostic);
event_from_section!(HandlerStatsEvent, stats);

/// Event section. Requiring specific traits to be implemented helps handling
/// those sections generically (display, JSON conversion).
///
/// Please use `#[probecount_derive::event_section]` to implement the common
/// traits.
pub trait EventSection: EventSectionInternal + EventFmt + Send {}
impl<T> EventSection for T where T: EventSectionInternal + EventFmt + Send {}

/// EventSection helpers defined for all sections by the derive macro. There
/// should not be a need to have per-object implementations for this.
pub trait EventSectionInternal {
    fn section(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn to_json(&self) -> serde_json::Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json() {
        let event = Event::from(CountChangeEvent {
            timestamp: 1,
            source: "rcount".to_string(),
            key: SENTINEL_KEY,
            count: 2,
            previous: None,
        });

        let json = event.to_json().unwrap();
        assert_eq!(json["change"]["key"], SENTINEL_KEY);
        // Unset options and sections are not serialized.
        assert!(json["change"].get("previous").is_none());
        assert!(json.get("snapshot").is_none());

        let parsed = Event::from_json(&json.to_string()).unwrap();
        let change = parsed.change.unwrap();
        assert_eq!(change.count, 2);
        assert_eq!(change.previous, None);
    }

    #[test]
    fn event_empty_json() {
        assert!(Event::from_json("{}").is_err());
        assert!(Event::from_json("not json").is_err());
    }

    #[test]
    fn event_sections() {
        let mut event = Event::from(DiagnosticEvent {
            timestamp: 3,
            label: "uretprobe/SSL_read".to_string(),
            message: "count record missing on return".to_string(),
            key: Some(SENTINEL_KEY),
        });
        event.stats = Some(HandlerStatsEvent {
            source: "rcount".to_string(),
            orphan_returns: 1,
            events: 1,
            ..Default::default()
        });

        let sections: Vec<_> = event.sections().iter().map(|s| s.section()).collect();
        assert_eq!(sections, vec!["diagnostic", "stats"]);
        assert_eq!(
            format!("{}", event.display(DisplayFormat::new())),
            "3 [uretprobe/SSL_read] count record missing on return (key 0xbebecafe) \
             [stats] rcount events 1 inserted 0 updated 0 dropped race 0 capacity 0 orphan returns 1"
        );
    }
}
