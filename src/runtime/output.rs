//! Line sink for captured command output
//!
//! Two drain tasks write into the same sink concurrently, so every write goes
//! through one mutex and is emitted as a whole line.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Separator between a line's prefix and its content
pub const SEPARATOR: &str = " | ";

/// Shared destination for prefixed output lines
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    /// Sink writing to the process' stdout
    pub fn stdout() -> Self {
        Self::from_writer(std::io::stdout())
    }

    /// Sink discarding everything
    pub fn null() -> Self {
        Self::from_writer(std::io::sink())
    }

    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// In-memory sink, returned together with a handle to read it back
    pub fn buffer() -> (Self, CapturedOutput) {
        let captured = CapturedOutput::default();
        (Self::from_writer(captured.clone()), captured)
    }

    /// Write `"<prefix> | <line>"`
    pub fn line(&self, prefix: &str, line: &str) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(guard, "{}{}{}", prefix, SEPARATOR, line) {
            tracing::warn!("Failed to write output line: {}", e);
        }
        let _ = guard.flush();
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

/// Bytes written to a [`OutputSink::buffer`] sink
#[derive(Clone, Default)]
pub struct CapturedOutput {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn contents(&self) -> String {
        let bytes = match self.bytes.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.bytes.lock() {
            Ok(mut guard) => guard.extend_from_slice(buf),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
