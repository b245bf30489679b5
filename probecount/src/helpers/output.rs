use std::io::Write;

use anyhow::Result;

use ::events::*;

/// Select the format to follow when printing events.
#[derive(Debug, Clone, Copy)]
pub enum PrintFormat {
    /// Text(format): display the events in a text representation following the
    /// rules defined in `format` (see `DisplayFormat`).
    Text(DisplayFormat),
    /// Json: display the event as JSON, one per line.
    Json,
}

/// Handles events individually and write them to a `Write`.
pub struct PrintEvent {
    writer: Box<dyn Write + Send>,
    format: PrintFormat,
}

impl PrintEvent {
    pub fn new(writer: Box<dyn Write + Send>, format: PrintFormat) -> Self {
        Self { writer, format }
    }

    /// Process events one by one (format & print).
    pub fn process_one(&mut self, e: &Event) -> Result<()> {
        match self.format {
            PrintFormat::Text(format) => {
                let event = format!("{}", e.display(format));
                if !event.is_empty() {
                    self.writer.write_all(event.as_bytes())?;
                    self.writer
                        .write_all(if format.multiline { b"\n\n" } else { b"\n" })?;
                }
            }
            PrintFormat::Json => {
                let mut event = serde_json::to_vec(&e.to_json()?)?;
                event.push(b'\n');
                self.writer.write_all(&event)?;
            }
        }

        Ok(())
    }

    /// Flush underlying writers.
    pub fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}
