use anyhow::Result;
use clap::Parser;

mod cli;
mod generate;
mod simulate;
mod watch;

use probecount::helpers::logger::Logger;

use crate::cli::ProbecountCli;

fn main() -> Result<()> {
    let cli = ProbecountCli::parse();

    // The logger is installed once, before running any subcommand.
    let _logger = Logger::init(cli.main_config.log_level()?)?;

    cli.run()
}
