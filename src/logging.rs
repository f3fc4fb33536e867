//! Logging and allocation accounting for chainbuf.
//!
//! This module provides structured logging and backing-store metrics to help
//! diagnose buffer lifetime issues and allocation churn in applications
//! built on chainbuf. Logging is off until [`init_logger`] is called; the
//! hot paths then pay one relaxed atomic check per event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Log level for chainbuf diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Trace-level logging (very verbose; every block allocation and free)
    Trace = 0,
    /// Debug-level logging (chain reshaping: coalesce, unshare)
    Debug = 1,
    /// Info-level logging
    Info = 2,
    /// Warning-level logging
    Warn = 3,
    /// Error-level logging
    Error = 4,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Log entry containing structured information about buffer events.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Timestamp when the log entry was created
    pub timestamp: SystemTime,
    /// Log level
    pub level: LogLevel,
    /// Component that generated the log
    pub component: String,
    /// Message content
    pub message: String,
    /// Additional structured data
    pub metadata: HashMap<String, String>,
}

impl LogEntry {
    /// Create a new log entry.
    pub fn new(level: LogLevel, component: &str, message: &str) -> Self {
        Self {
            timestamp: SystemTime::now(),
            level,
            component: component.to_string(),
            message: message.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the log entry.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Format the log entry as a human-readable string.
    pub fn format(&self) -> String {
        let timestamp = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let mut parts = vec![
            format!("[{}]", timestamp),
            format!("{}", self.level),
            self.component.clone(),
            self.message.clone(),
        ];

        if !self.metadata.is_empty() {
            let metadata_str = self
                .metadata
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            parts.push(format!("metadata:{{{}}}", metadata_str));
        }

        parts.join(" ")
    }
}

/// Trait for log output destinations.
pub trait LogOutput: Send + Sync {
    /// Write a log entry to the output.
    fn write(&self, entry: &LogEntry) -> Result<()>;

    /// Flush any buffered output.
    fn flush(&self) -> Result<()>;
}

/// Console log output that writes to stderr.
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl ConsoleOutput {
    /// Create a new console output.
    pub fn new() -> Self {
        Self
    }
}

impl LogOutput for ConsoleOutput {
    fn write(&self, entry: &LogEntry) -> Result<()> {
        eprintln!("{}", entry.format());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        use std::io::Write;
        let _ = std::io::stderr().flush();
        Ok(())
    }
}

/// Central logger for chainbuf diagnostics.
pub struct Logger {
    /// Minimum log level to output
    min_level: LogLevel,
    /// Output destinations
    outputs: Vec<Box<dyn LogOutput>>,
    /// Backing-store accounting
    metrics: Arc<Mutex<AllocationMetrics>>,
}

impl Logger {
    /// Create a new logger with console output.
    pub fn new() -> Self {
        Self {
            min_level: LogLevel::Info,
            outputs: vec![Box::new(ConsoleOutput::new())],
            metrics: Arc::new(Mutex::new(AllocationMetrics::new())),
        }
    }

    /// Set the minimum log level.
    pub fn set_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Add an output destination.
    pub fn add_output(&mut self, output: Box<dyn LogOutput>) {
        self.outputs.push(output);
    }

    /// Log a message at the specified level.
    pub fn log(&self, level: LogLevel, component: &str, message: &str) {
        if level >= self.min_level {
            let entry = LogEntry::new(level, component, message);
            self.write_entry(&entry);
        }
    }

    fn write_entry(&self, entry: &LogEntry) {
        for output in &self.outputs {
            if let Err(e) = output.write(entry) {
                eprintln!("Failed to write log entry: {}", e);
            }
        }
    }

    /// Flush all outputs.
    pub fn flush(&self) {
        for output in &self.outputs {
            if let Err(e) = output.flush() {
                eprintln!("Failed to flush log output: {}", e);
            }
        }
    }

    /// Get a snapshot of the allocation metrics.
    pub fn metrics(&self) -> AllocationMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Reset the allocation metrics.
    pub fn reset_metrics(&self) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.reset();
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

/// Backing-store accounting across all chains in the process.
///
/// Counters only move while the global logger is initialized; they exist for
/// diagnostics, not for control flow.
#[derive(Debug, Clone, Default)]
pub struct AllocationMetrics {
    /// Number of backing-store blocks allocated
    pub allocations: u64,
    /// Number of backing-store blocks freed
    pub frees: u64,
    /// Total bytes requested from the allocator
    pub bytes_allocated: u64,
    /// Total bytes returned to the allocator
    pub bytes_freed: u64,
    /// Number of coalesce and gather reallocations
    pub coalesces: u64,
    /// Number of copy-on-write unshare copies
    pub unshares: u64,
}

impl AllocationMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently live (allocated minus freed).
    pub fn live_blocks(&self) -> u64 {
        self.allocations.saturating_sub(self.frees)
    }

    /// Reset all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generate a summary report.
    pub fn generate_report(&self) -> String {
        let mut report = String::new();
        report.push_str("=== chainbuf allocation metrics ===\n");
        report.push_str(&format!(
            "Blocks: {} allocated, {} freed, {} live\n",
            self.allocations,
            self.frees,
            self.live_blocks()
        ));
        report.push_str(&format!(
            "Bytes: {} allocated, {} freed\n",
            self.bytes_allocated, self.bytes_freed
        ));
        report.push_str(&format!(
            "Reshapes: {} coalesces, {} unshares\n",
            self.coalesces, self.unshares
        ));
        report
    }
}

/// Global logger instance.
static GLOBAL_LOGGER: OnceLock<Arc<Mutex<Logger>>> = OnceLock::new();

/// Initialize the global logger, returning the shared handle.
pub fn init_logger() -> Arc<Mutex<Logger>> {
    GLOBAL_LOGGER
        .get_or_init(|| Arc::new(Mutex::new(Logger::new())))
        .clone()
}

/// Log a message using the global logger.
pub fn log(level: LogLevel, component: &str, message: &str) {
    if let Some(logger) = GLOBAL_LOGGER.get() {
        if let Ok(logger) = logger.lock() {
            logger.log(level, component, message);
        }
    }
}

fn with_metrics(update: impl FnOnce(&mut AllocationMetrics)) {
    if let Some(logger) = GLOBAL_LOGGER.get() {
        if let Ok(logger) = logger.lock() {
            if let Ok(mut metrics) = logger.metrics.lock() {
                update(&mut metrics);
            }
        }
    }
}

/// Records a backing-store block allocation.
pub(crate) fn note_alloc(bytes: usize) {
    if GLOBAL_LOGGER.get().is_none() {
        return;
    }
    with_metrics(|m| {
        m.allocations += 1;
        m.bytes_allocated += bytes as u64;
    });
    log(
        LogLevel::Trace,
        "storage",
        &format!("allocated {bytes} byte block"),
    );
}

/// Records a backing-store block free.
pub(crate) fn note_free(bytes: usize) {
    if GLOBAL_LOGGER.get().is_none() {
        return;
    }
    with_metrics(|m| {
        m.frees += 1;
        m.bytes_freed += bytes as u64;
    });
    log(
        LogLevel::Trace,
        "storage",
        &format!("freed {bytes} byte block"),
    );
}

/// Records a coalesce or gather reallocation.
pub(crate) fn note_coalesce() {
    if GLOBAL_LOGGER.get().is_none() {
        return;
    }
    with_metrics(|m| m.coalesces += 1);
    log(LogLevel::Debug, "chain", "coalesced into fresh buffer");
}

/// Records a copy-on-write unshare.
pub(crate) fn note_unshare() {
    if GLOBAL_LOGGER.get().is_none() {
        return;
    }
    with_metrics(|m| m.unshares += 1);
    log(LogLevel::Debug, "chain", "unshared into private buffer");
}

/// Log a trace-level message using the global logger.
#[macro_export]
macro_rules! log_trace {
    ($component:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Trace, $component, &format!($($arg)*))
    };
}

/// Log a debug-level message using the global logger.
#[macro_export]
macro_rules! log_debug {
    ($component:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Debug, $component, &format!($($arg)*))
    };
}

/// Log a warning-level message using the global logger.
#[macro_export]
macro_rules! log_warn {
    ($component:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Warn, $component, &format!($($arg)*))
    };
}
