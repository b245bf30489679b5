//! # Cli
//!
//! Main command line arguments and the subcommands the tool supports.

use std::path::PathBuf;

use anyhow::Result;
use clap::{builder::PossibleValuesParser, Args, Parser, Subcommand, ValueEnum};
use log::{debug, LevelFilter};

use probecount::{config::Config, events::DisplayFormat, helpers::output::PrintFormat};

use crate::{generate::Complete, simulate::Simulate, watch::Watch};

/// Common interface of subcommands: a clap parser knowing how to run itself.
pub(crate) trait SubCommandParserRunner: Parser {
    fn run(&mut self, main_config: &MainConfig) -> Result<()>;
}

#[derive(Args, Debug, Default)]
pub(crate) struct MainConfig {
    #[arg(
        long,
        value_parser=PossibleValuesParser::new(["error", "warn", "info", "debug", "trace"]),
        default_value = "info",
        help = "Log level",
    )]
    pub(crate) log_level: String,
    #[arg(long, short, help = "Path to a YAML configuration file")]
    pub(crate) config: Option<PathBuf>,
}

impl MainConfig {
    pub(crate) fn log_level(&self) -> Result<LevelFilter> {
        Ok(self.log_level.parse()?)
    }

    /// Loads the configuration file if one was given, or the default
    /// configuration.
    pub(crate) fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Config::load(path)
            }
            None => Ok(Config::default()),
        }
    }
}

#[derive(Subcommand, Debug)]
pub(crate) enum SubCommands {
    Simulate(Simulate),
    Watch(Watch),
    #[command(name = "sh-complete")]
    Complete(Complete),
}

/// Count entry and return events of probed functions
///
/// probecount counts events per key in fixed-capacity tables shared between
/// probes and readers, and reports the counts as they change.
#[derive(Parser, Debug)]
#[command(
    name = "probecount",
    version,
    disable_help_subcommand = true,
    infer_subcommands = true
)]
pub(crate) struct ProbecountCli {
    #[command(flatten)]
    pub(crate) main_config: MainConfig,
    #[command(subcommand)]
    pub(crate) subcommand: SubCommands,
}

impl ProbecountCli {
    pub(crate) fn run(self) -> Result<()> {
        let main_config = &self.main_config;
        match self.subcommand {
            SubCommands::Simulate(mut cmd) => cmd.run(main_config),
            SubCommands::Watch(mut cmd) => cmd.run(main_config),
            SubCommands::Complete(mut cmd) => cmd.run(main_config),
        }
    }
}

/// Type of the "format" argument.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub(crate) enum CliFormat {
    #[default]
    Text,
    Json,
}

impl CliFormat {
    pub(crate) fn print_format(&self, multiline: bool) -> PrintFormat {
        match self {
            CliFormat::Text => PrintFormat::Text(DisplayFormat::new().multiline(multiline)),
            CliFormat::Json => PrintFormat::Json,
        }
    }
}
