//! Diagnostic reporting for boundary failures.
//!
//! Every failure is rendered the same way regardless of which bridge stage
//! produced it: the status code, the operation that failed and whatever rich
//! error information the managed side attached.

use crate::{BoundaryFailure, Error};
use parking_lot::Mutex;
use std::sync::Arc;

/// Log levels for report lines.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug message
    Debug = 0,
    /// Informational message
    Info = 1,
    /// Warning message
    Warning = 2,
    /// Error message
    Error = 3,
}

/// Destination for diagnostic lines.
pub trait ReportSink: Send + Sync {
    fn log(&self, level: LogLevel, msg: &str);

    fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }

    fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    fn warn(&self, msg: &str) {
        self.log(LogLevel::Warning, msg);
    }

    fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }
}

/// Forwards report lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "dbgbridge", "{}", msg),
            LogLevel::Info => tracing::info!(target: "dbgbridge", "{}", msg),
            LogLevel::Warning => tracing::warn!(target: "dbgbridge", "{}", msg),
            LogLevel::Error => tracing::error!(target: "dbgbridge", "{}", msg),
        }
    }
}

/// Keeps every line in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }

    /// All lines at `level` or above, joined with newlines.
    pub fn text(&self, level: LogLevel) -> String {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l >= level)
            .map(|(_, m)| m.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ReportSink for MemorySink {
    fn log(&self, level: LogLevel, msg: &str) {
        self.lines.lock().push((level, msg.to_string()));
    }
}

/// Render a failure as report lines.
pub fn render_failure(failure: &BoundaryFailure) -> Vec<String> {
    let mut lines = vec![
        format!("Status: {}", failure.status),
        format!("Expression: {}", failure.expression),
    ];

    match &failure.rich {
        Some(rich) => {
            if let Some(description) = rich.description.as_deref() {
                lines.push(format!("Description: {}", description.trim_end()));
            }
            if let Some(details) = rich.details.as_deref() {
                lines.push("Details:".to_string());
                lines.extend(details.lines().map(|l| format!("  {}", l)));
            }
        }
        None => lines.push("No error information available".to_string()),
    }

    lines
}

/// Render any bridge error as report lines.
pub fn render_error(error: &Error) -> Vec<String> {
    match error.failure() {
        Some(failure) => {
            let mut lines = vec![error.to_string()];
            lines.extend(render_failure(failure));
            lines
        }
        None => vec![
            error.to_string(),
            format!("Status: {}", error.status()),
        ],
    }
}

/// Shared reporter used by every bridge operation.
#[derive(Clone)]
pub struct ErrorReporter {
    sink: Arc<dyn ReportSink>,
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self { sink }
    }

    /// Report a failure at error level.
    pub fn report(&self, error: &Error) {
        for line in render_error(error) {
            self.sink.error(&line);
        }
    }

    /// Report a failure that does not abort the current operation.
    pub fn report_nonfatal(&self, error: &Error) {
        for line in render_error(error) {
            self.sink.warn(&line);
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter").finish_non_exhaustive()
    }
}
