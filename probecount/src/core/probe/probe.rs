use std::{fmt, str::FromStr, sync::Arc};

use anyhow::{bail, Result};
use nix::unistd::{getpid, gettid};

use events::{CounterKey, EventKind, SENTINEL_KEY};

use super::handler::{Outcome, ProbeHandler};

/// Where the key of an event comes from, when the event source does not
/// provide one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeySource {
    /// All events share `SENTINEL_KEY`.
    #[default]
    Sentinel,
    /// All events share a given key.
    Constant(CounterKey),
    /// Process id of the caller.
    Pid,
    /// Thread id of the caller.
    Tid,
}

impl KeySource {
    /// Computes the key of an event happening in the current context.
    pub fn derive(&self) -> CounterKey {
        match self {
            KeySource::Sentinel => SENTINEL_KEY,
            KeySource::Constant(key) => *key,
            KeySource::Pid => getpid().as_raw() as CounterKey,
            KeySource::Tid => gettid().as_raw() as CounterKey,
        }
    }
}

impl FromStr for KeySource {
    type Err = anyhow::Error;

    /// Parses "sentinel", "pid", "tid", or a key in decimal or 0x-prefixed
    /// hexadecimal notation.
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "sentinel" => KeySource::Sentinel,
            "pid" => KeySource::Pid,
            "tid" => KeySource::Tid,
            x => {
                let key = match x.strip_prefix("0x") {
                    Some(hex) => CounterKey::from_str_radix(hex, 16),
                    None => x.parse(),
                };
                match key {
                    Ok(key) => KeySource::Constant(key),
                    Err(_) => bail!("Invalid key source {x}"),
                }
            }
        })
    }
}

impl TryFrom<String> for KeySource {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<KeySource> for String {
    fn from(source: KeySource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Sentinel => f.write_str("sentinel"),
            KeySource::Constant(key) => write!(f, "{key:#x}"),
            KeySource::Pid => f.write_str("pid"),
            KeySource::Tid => f.write_str("tid"),
        }
    }
}

/// A named attachment point (e.g. "uprobe/SSL_read") firing events of a
/// single kind into a handler.
pub struct Probe {
    name: Arc<str>,
    kind: EventKind,
    key: KeySource,
    handler: Arc<ProbeHandler>,
    trace_hits: bool,
}

impl Probe {
    pub fn new(name: &str, kind: EventKind, handler: Arc<ProbeHandler>) -> Self {
        Probe {
            name: Arc::from(name),
            kind,
            key: KeySource::default(),
            handler,
            trace_hits: false,
        }
    }

    /// Entry probe on a user space function.
    pub fn entry(symbol: &str, handler: Arc<ProbeHandler>) -> Self {
        Self::new(&format!("uprobe/{symbol}"), EventKind::Entry, handler)
    }

    /// Return probe on a user space function.
    pub fn ret(symbol: &str, handler: Arc<ProbeHandler>) -> Self {
        Self::new(&format!("uretprobe/{symbol}"), EventKind::Return, handler)
    }

    pub fn key_source(mut self, key: KeySource) -> Self {
        self.key = key;
        self
    }

    /// Emit a diagnostic each time the probe fires.
    pub fn trace_hits(mut self, enabled: bool) -> Self {
        self.trace_hits = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Key an event fired now, from the current context, would have.
    pub fn current_key(&self) -> CounterKey {
        self.key.derive()
    }

    /// The probed function was hit in the current context.
    pub fn fire(&self) -> Outcome {
        self.fire_with_key(self.current_key())
    }

    /// The probed function was hit, the event source computed the key.
    pub fn fire_with_key(&self, key: CounterKey) -> Outcome {
        if self.trace_hits {
            self.handler.sink().emit(&self.name, "got here!", None);
        }
        self.handler.handle(self.kind, key)
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .finish()
    }
}
