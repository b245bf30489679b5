use std::{
    fmt,
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::core::{
    diag::DiagnosticSink,
    probe::{KeySource, RetryPolicy, ReturnMode},
    snapshot::DEFAULT_MAP_PATH,
    table::CounterTable,
};

/// Version of the configuration format we understand.
pub const CONFIG_VERSION: u32 = 1;

/// Configuration of the tool. All fields are optional in the YAML
/// representation and default to the values of the SSL_read counter.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Version of the configuration format.
    pub version: u32,
    pub table: TableConfig,
    pub handler: HandlerConfig,
    pub diagnostics: DiagnosticsConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TableConfig {
    pub name: String,
    /// Maximum number of distinct keys.
    pub capacity: usize,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerConfig {
    pub policy: RetryPolicy,
    pub returns: ReturnMode,
    /// Key of events when not provided by the event source.
    pub key: KeySource,
    /// Emit a diagnostic every time a probe is hit.
    pub trace_hits: bool,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Maximum number of diagnostics waiting to be logged.
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub interval_ms: u64,
    /// Pinned maps to read.
    pub maps: Vec<MapSpec>,
}

/// A named pinned map, written "name=path" or "path". In the latter case the
/// name is the file name of the path.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct MapSpec {
    pub name: String,
    pub path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: CONFIG_VERSION,
            table: TableConfig::default(),
            handler: HandlerConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            name: "rcount".to_string(),
            capacity: CounterTable::DEFAULT_CAPACITY,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        DiagnosticsConfig {
            capacity: DiagnosticSink::DEFAULT_CAPACITY,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            interval_ms: 1000,
            maps: vec![MapSpec {
                name: "rcount".to_string(),
                path: PathBuf::from(DEFAULT_MAP_PATH),
            }],
        }
    }
}

impl Config {
    /// Load a configuration from a path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = read_to_string(path)
            .map_err(|e| anyhow!("Could not read config {}: {e}", path.display()))?;

        contents
            .parse()
            .map_err(|e| anyhow!("Invalid config {}: {e}", path.display()))
    }

    /// Checks values serde can't check on its own.
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            bail!(
                "Unsupported config version {} (expected {CONFIG_VERSION})",
                self.version
            );
        }
        if self.table.name.is_empty() {
            bail!("Table name can't be empty");
        }
        if self.table.capacity == 0 {
            bail!("Table capacity must be greater than 0");
        }
        if self.diagnostics.capacity == 0 {
            bail!("Diagnostics capacity must be greater than 0");
        }
        if self.watch.interval_ms == 0 {
            bail!("Watch interval must be greater than 0");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.watch.interval_ms)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    /// Load a configuration from a string.
    fn from_str(contents: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }
}

impl FromStr for MapSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, path) = match s.split_once('=') {
            Some((name, path)) => (name.to_string(), PathBuf::from(path)),
            None => {
                let path = PathBuf::from(s);
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow!("Cannot name map from path {s}"))?
                    .to_string();
                (name, path)
            }
        };

        if name.is_empty() || path.as_os_str().is_empty() {
            bail!("Invalid map {s} (expected name=path or path)");
        }
        Ok(MapSpec { name, path })
    }
}

impl TryFrom<String> for MapSpec {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<MapSpec> for String {
    fn from(spec: MapSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for MapSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn load_file() {
        let config = Config::load("test_data/config/example.yaml").unwrap();
        assert_eq!(config.table.name, "ssl_read");
        assert_eq!(config.table.capacity, 64);
        assert_eq!(config.handler.policy, RetryPolicy::Atomic);
        assert_eq!(config.handler.returns, ReturnMode::Verify);
        assert_eq!(config.handler.key, KeySource::Tid);
        assert!(config.handler.trace_hits);
        assert_eq!(config.diagnostics.capacity, 32);
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(
            config.watch.maps,
            vec![
                MapSpec {
                    name: "rcount".to_string(),
                    path: PathBuf::from("/run/probes/maps/rcount"),
                },
                MapSpec {
                    name: "ssl".to_string(),
                    path: PathBuf::from("/sys/fs/bpf/ssl_read_count"),
                },
            ]
        );
    }

    #[test_case("test_data/config/invalid.yaml" ; "zero capacity")]
    #[test_case("test_data/config/unknown_field.yaml" ; "unknown field")]
    #[test_case("test_data/config/missing.yaml" ; "missing file")]
    fn load_invalid(path: &str) {
        assert!(Config::load(path).is_err());
    }

    #[test]
    fn defaults() {
        let config: Config = "{}".parse().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.table.name, "rcount");
        assert_eq!(config.table.capacity, 10);
        assert_eq!(config.handler.policy, RetryPolicy::Lenient);
        assert_eq!(config.handler.returns, ReturnMode::Count);
        assert_eq!(config.handler.key, KeySource::Sentinel);
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.watch.maps[0].path, PathBuf::from(DEFAULT_MAP_PATH));
    }

    #[test_case("version: 2" ; "version")]
    #[test_case("watch: { interval_ms: 0 }" ; "interval")]
    #[test_case("diagnostics: { capacity: 0 }" ; "diagnostics")]
    #[test_case("table: { name: '' }" ; "table name")]
    #[test_case("handler: { policy: strict }" ; "policy")]
    #[test_case("handler: { key: process }" ; "key")]
    fn invalid_values(contents: &str) {
        assert!(contents.parse::<Config>().is_err());
    }

    #[test_case("rcount=/run/probes/maps/rcount", "rcount", "/run/probes/maps/rcount" ; "named")]
    #[test_case("/sys/fs/bpf/counts", "counts", "/sys/fs/bpf/counts" ; "unnamed")]
    fn map_spec(input: &str, name: &str, path: &str) {
        let spec: MapSpec = input.parse().unwrap();
        assert_eq!(spec.name, name);
        assert_eq!(spec.path, PathBuf::from(path));
    }

    #[test_case("=/sys/fs/bpf/counts" ; "empty name")]
    #[test_case("counts=" ; "empty path")]
    #[test_case("/" ; "no file name")]
    fn map_spec_invalid(input: &str) {
        assert!(input.parse::<MapSpec>().is_err());
    }
}
