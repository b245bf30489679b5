//! # Watch
//!
//! Prints the counts of pinned BPF maps as they change, until interrupted.

use std::io;

use anyhow::{bail, Result};
use caps::{CapSet, Capability};
use clap::Parser;
use log::info;

use probecount::{
    config::{Config, MapSpec},
    core::snapshot::{PinnedMapReader, SnapshotReader, Watcher},
    helpers::{output::PrintEvent, signals::Running},
};

use crate::cli::*;

/// Print the counts of pinned BPF maps as they change
#[derive(Parser, Debug)]
#[command(name = "watch")]
pub(crate) struct Watch {
    /// Map to watch, as "name=path" or "path". Can be used multiple times
    /// (default: from the configuration)
    #[arg(long = "map")]
    maps: Vec<MapSpec>,
    /// Interval between two reads of the maps, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Output format
    #[arg(long, value_enum, default_value_t)]
    format: CliFormat,
    /// Display events on multiple lines (text format only)
    #[arg(long)]
    multiline: bool,
}

impl Watch {
    /// Applies the command line overrides to the configuration.
    fn apply(&self, config: &mut Config) -> Result<()> {
        if !self.maps.is_empty() {
            config.watch.maps = self.maps.clone();
        }
        if let Some(interval) = self.interval_ms {
            config.watch.interval_ms = interval;
        }
        if config.watch.maps.is_empty() {
            bail!("No map to watch");
        }
        config.validate()
    }
}

/// Reading BPF maps of other programs needs CAP_BPF, or CAP_SYS_ADMIN on
/// older kernels.
fn check_prerequisites() -> Result<()> {
    if !caps::has_cap(None, CapSet::Effective, Capability::CAP_BPF)?
        && !caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_ADMIN)?
    {
        bail!("probecount does not have CAP_BPF or CAP_SYS_ADMIN: can't read pinned maps.");
    }
    Ok(())
}

impl SubCommandParserRunner for Watch {
    fn run(&mut self, main_config: &MainConfig) -> Result<()> {
        let mut config = main_config.load_config()?;
        self.apply(&mut config)?;
        check_prerequisites()?;

        let sources = config
            .watch
            .maps
            .iter()
            .map(|map| -> Result<Box<dyn SnapshotReader>> {
                Ok(Box::new(PinnedMapReader::open(&map.name, &map.path)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let state = Running::new();
        state.register_term_signals()?;

        let mut printer = PrintEvent::new(
            Box::new(io::stdout()),
            self.format.print_format(self.multiline),
        );
        let mut watcher = Watcher::new("watcher", sources, move |event| {
            printer.process_one(&event)?;
            printer.flush()
        })
        .interval(config.interval())
        .start(state.clone())?;

        info!("Waiting for events...");
        watcher.join()?;
        info!("Bye!");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn map_arguments() {
        let cmd = Watch::try_parse_from([
            "watch",
            "--map",
            "rcount=/run/probes/maps/rcount",
            "--map",
            "/sys/fs/bpf/other",
            "--interval-ms",
            "250",
        ])
        .unwrap();

        let mut config = Config::default();
        cmd.apply(&mut config).unwrap();
        assert_eq!(config.watch.maps.len(), 2);
        assert_eq!(config.watch.maps[1].name, "other");
        assert_eq!(config.watch.interval_ms, 250);
    }

    #[test]
    fn default_map() {
        let cmd = Watch::try_parse_from(["watch"]).unwrap();
        let mut config = Config::default();

        cmd.apply(&mut config).unwrap();
        assert_eq!(
            config.watch.maps[0].path,
            PathBuf::from("/run/probes/maps/rcount")
        );
    }

    #[test]
    fn no_map() {
        let cmd = Watch::try_parse_from(["watch"]).unwrap();
        let mut config = Config::default();
        config.watch.maps.clear();

        assert!(cmd.apply(&mut config).is_err());
        assert!(Watch::try_parse_from(["watch", "--map", "rcount="]).is_err());
    }
}
