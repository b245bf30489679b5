//! # Logger
//!
//! `log` backend writing to stderr. Events go to stdout, so both can be
//! consumed separately.

use std::{
    env,
    io::{stderr, IsTerminal, Write},
    sync::{Arc, Mutex},
    thread,
};

use anyhow::{anyhow, Result};
use log::{Level, LevelFilter, Metadata, Record};
use termcolor::{BufferedStandardStream, Color, ColorChoice, ColorSpec, WriteColor};
use time::{macros::format_description, OffsetDateTime};

/// Logging involves a lock and a write to stderr: it must never be used from
/// a probe handler, which reports through `core::diag` instead.
pub struct Logger {
    max_level: LevelFilter,
    stderr: Mutex<BufferedStandardStream>,
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Error => Color::Red,
        Level::Warn => Color::Yellow,
        Level::Info => Color::Blue,
        Level::Debug => Color::Cyan,
        Level::Trace => Color::White,
    }
}

impl Logger {
    pub fn init(max_level: LevelFilter) -> Result<Arc<Self>> {
        let choice = match Self::use_colors() {
            true => ColorChoice::Auto,
            false => ColorChoice::Never,
        };
        let logger = Arc::new(Logger {
            max_level,
            stderr: Mutex::new(BufferedStandardStream::stderr(choice)),
        });

        log::set_max_level(max_level);
        log::set_boxed_logger(Box::new(Arc::clone(&logger)))?;

        Ok(logger)
    }

    fn verbose(&self) -> bool {
        self.max_level >= LevelFilter::Debug
    }

    /// Formats a record, prefixed by:
    /// - the time, from the debug level on;
    /// - the level, for errors and warnings or from the debug level on;
    /// - the thread name, for messages not coming from the main thread
    ///   (watcher, workers).
    fn write_record<W: WriteColor>(
        &self,
        w: &mut W,
        record: &Record,
        thread: Option<&str>,
    ) -> Result<()> {
        if self.verbose() {
            OffsetDateTime::now_utc().format_into(
                &mut *w,
                format_description!("[hour]:[minute]:[second].[subsecond digits:6] "),
            )?;
        }

        if record.level() <= Level::Warn || self.verbose() {
            w.set_color(ColorSpec::new().set_fg(Some(level_color(record.level()))))?;
            write!(w, "{:5} ", record.level())?;
            w.reset()?;
        }

        if let Some(name) = thread.filter(|name| *name != "main") {
            write!(w, "[{name}] ")?;
        }

        writeln!(w, "{}", record.args())?;
        Ok(())
    }

    fn try_log(&self, record: &Record) -> Result<()> {
        let mut stderr = self
            .stderr
            .lock()
            .map_err(|_| anyhow!("Logger lock poisoned"))?;

        self.write_record(&mut *stderr, record, thread::current().name())?;
        stderr.flush()?;
        Ok(())
    }

    /// Colors are used on terminals, unless disabled by NO_COLOR or a dumb
    /// terminal.
    fn use_colors() -> bool {
        if !stderr().is_terminal() || env::var_os("NO_COLOR").is_some() {
            return false;
        }
        matches!(env::var("TERM"), Ok(x) if x != "dumb")
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Not much we can do to report the error...
        let _ = self.try_log(record);
    }

    fn flush(&self) {
        if let Ok(mut stderr) = self.stderr.lock() {
            let _ = stderr.flush();
        }
    }
}
