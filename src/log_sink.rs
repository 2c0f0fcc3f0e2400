//! In-memory log buffer drained by the host application
//!
//! Hosts embedding the tunnel (mobile apps in particular) have no access to
//! the process's standard output, so every log line ends up here and is
//! fetched with [`LogSink::drain`].

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// Shared, thread-safe log line buffer
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A writer that panicked mid-append leaves the Vec intact
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append raw bytes as one log line; never fails
    pub fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }

        let text = String::from_utf8_lossy(bytes);
        let text: &str = &text;
        let line = text
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(text);
        self.lock().push(line.to_string());

        Ok(bytes.len())
    }

    /// Append a line of text
    pub fn push_line(&self, line: impl Into<String>) {
        self.lock().push(line.into());
    }

    /// Return all buffered lines joined by `\n` and clear the buffer
    pub fn drain(&self) -> String {
        let lines = std::mem::take(&mut *self.lock());
        lines.join("\n")
    }

    /// Number of buffered lines
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A writer handle appending to this sink
    pub fn writer(&self) -> LogWriter {
        LogWriter { sink: self.clone() }
    }
}

/// `io::Write` adapter over a [`LogSink`]
#[derive(Debug, Clone)]
pub struct LogWriter {
    sink: LogSink,
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer()
    }
}
