use chrono::Local;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maximum number of log entries to keep in memory
const MAX_LOG_ENTRIES: usize = 1000;

/// A captured log line
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: Level, target: &str, message: String) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M:%S.%3f").to_string(),
            level: level.to_string().to_uppercase(),
            target: target.to_string(),
            message,
        }
    }
}

/// Thread-safe ring buffer collecting formatted log lines.
///
/// ```ignore
/// let capture = LogCapture::new();
/// let _guard = tracing::subscriber::set_default(capture.subscriber("info"));
/// // ... run a chain ...
/// assert_eq!(capture.count("WARN", "skipping"), 1);
/// ```
#[derive(Clone)]
pub struct LogCapture {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl Default for LogCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCapture {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_ENTRIES))),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= MAX_LOG_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn get_recent(&self, count: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().take(count).rev().cloned().collect()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// Entries at `level` whose message contains `needle`
    pub fn count(&self, level: &str, needle: &str) -> usize {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|e| e.level == level && e.message.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A subscriber writing into this capture, filtered by `directives`
    /// (same syntax as `RUST_LOG`)
    pub fn subscriber(&self, directives: &str) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::registry()
            .with(EnvFilter::new(directives))
            .with(compact_layer(self.clone()))
    }

    /// Parse one compact-format line: "LEVEL target: message"
    fn record(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let levels = [
            ("TRACE ", Level::TRACE),
            ("DEBUG ", Level::DEBUG),
            ("INFO ", Level::INFO),
            ("WARN ", Level::WARN),
            ("ERROR ", Level::ERROR),
        ];
        let Some((level, rest)) = levels
            .iter()
            .find_map(|(prefix, level)| line.strip_prefix(prefix).map(|rest| (*level, rest)))
        else {
            // If no level prefix, just store the whole message
            self.push(LogEntry::new(Level::INFO, "general", line.to_string()));
            return;
        };
        let rest = rest.trim_start();

        let (target, message) = match rest.find(':') {
            // a target never contains spaces
            Some(colon) if !rest[..colon].contains(' ') => {
                (&rest[..colon], rest[colon + 1..].trim())
            }
            _ => ("general", rest),
        };
        self.push(LogEntry::new(level, target, message.to_string()));
    }
}

/// Writer handed out per event; the line is recorded when it is dropped
pub struct CaptureWriter {
    capture: LogCapture,
    line: Vec<u8>,
}

impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.line);
        for line in text.lines() {
            self.capture.record(line);
        }
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            capture: self.clone(),
            line: Vec::new(),
        }
    }
}

fn compact_layer<S, W>(writer: W) -> impl tracing_subscriber::Layer<S> + Send + Sync
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .without_time() // entries carry their own timestamps
        .compact()
}

/// Initialize tracing to stderr. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    // a subscriber may already be installed, e.g. by a test harness
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Initialize tracing into a [`LogCapture`] as well as stderr
pub fn init_tracing_with_capture() -> LogCapture {
    let capture = LogCapture::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(compact_layer(capture.clone()))
        .try_init();
    capture
}
