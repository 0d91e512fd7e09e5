//! Event reporting.
//!
//! The engine reports what it does through the `BackupEvents` trait, which
//! keeps it independent of how messages are shown. The CLI prints them; tests
//! record them.
//!
//! During a run every event is also written to the run's log file when
//! logging is enabled. `RunEvents` does that fan-out.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Receiver for information and error messages emitted during a run.
///
/// Both methods are called synchronously from the walk.
pub trait BackupEvents {
    /// Progress information (a file copied, a source root started, ...).
    fn on_information(&self, message: &str);

    /// A skipped item or the fatal cause of a failed run.
    fn on_error(&self, message: &str);
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvents;

impl BackupEvents for NullEvents {
    fn on_information(&self, _message: &str) {}

    fn on_error(&self, _message: &str) {}
}

/// Plain-text log file for one run.
pub(crate) struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogFile {
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(LogFile {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)
    }

    pub(crate) fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Fans events out to the caller's sink and the optional log file.
pub(crate) struct RunEvents<'a> {
    sink: &'a dyn BackupEvents,
    log: Option<LogFile>,
}

impl<'a> RunEvents<'a> {
    pub(crate) fn new(sink: &'a dyn BackupEvents) -> Self {
        RunEvents { sink, log: None }
    }

    pub(crate) fn attach_log(&mut self, log: LogFile) {
        self.log = Some(log);
    }

    pub(crate) fn information(&mut self, message: &str) {
        self.sink.on_information(message);
        self.log_line(message);
    }

    pub(crate) fn error(&mut self, message: &str) {
        self.sink.on_error(message);
        self.log_line(&format!("Error: {}", message));
    }

    /// Report the error that ended the run. The log line carries the time.
    pub(crate) fn fatal(&mut self, message: &str, at: &str) {
        self.sink.on_error(message);
        self.log_line(&format!("{} : Error: {}", at, message));
    }

    /// Write to the log only, without notifying the sink.
    pub(crate) fn log_line(&mut self, line: &str) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        if let Err(e) = log.write_line(line) {
            tracing::warn!(path = %log.path().display(), error = %e, "log file write failed; logging disabled");
            self.log = None;
        }
    }

    /// Flush and close the log file, if any.
    pub(crate) fn close_log(&mut self) {
        if let Some(log) = self.log.take() {
            let path = log.path().to_path_buf();
            if let Err(e) = log.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to flush log file");
            }
        }
    }
}
