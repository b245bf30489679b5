//! # Completion
//!
//! Generate a completions file for a specified shell at runtime.

use std::{fs, io::Write, path::PathBuf};

use anyhow::{anyhow, Result};
use clap::{value_parser, CommandFactory, Parser};
use clap_complete::{generate, Generator, Shell};

use crate::cli::*;

/// Generate completion file for a specified shell
#[derive(Parser, Debug, Default)]
#[command(name = "sh-complete")]
pub(crate) struct Complete {
    /// Specify shell to complete for
    // We use an Option and require the parameter to be set here to allow
    // deriving Default on Complete.
    #[arg(long, required = true, value_parser(value_parser!(Shell)))]
    shell: Option<Shell>,

    /// Path to write completion-registration to
    #[arg(long)]
    register: Option<PathBuf>,
}

impl Complete {
    /// Generates the completions of the whole command line.
    fn completions(&self, shell: Shell) -> (String, Vec<u8>) {
        let mut cmd = ProbecountCli::command();
        let name = cmd.get_name().to_string();
        let mut buf = Vec::new();

        generate(shell, &mut cmd, name.clone(), &mut buf);
        (shell.file_name(&name), buf)
    }
}

impl SubCommandParserRunner for Complete {
    fn run(&mut self, _: &MainConfig) -> Result<()> {
        let shell = self.shell.ok_or_else(|| anyhow!("No shell given"))?;
        let (file_name, buf) = self.completions(shell);

        match &self.register {
            Some(out_path) if out_path.is_dir() => fs::write(out_path.join(file_name), buf)?,
            Some(out_path) => fs::write(out_path, buf)?,
            None => std::io::stdout().write_all(&buf)?,
        }
        Ok(())
    }
}
