use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_LOG_CAPACITY: usize = 150;
pub const ERROR_MARKER: &str = "[ERROR]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_level(LogLevel::Info, message.into())
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::with_level(LogLevel::Warn, message.into())
    }

    /// Error lines carry `ERROR_MARKER` at the front of the message.
    pub fn error(message: impl AsRef<str>) -> Self {
        Self::with_level(
            LogLevel::Error,
            format!("{} {}", ERROR_MARKER, message.as_ref()),
        )
    }

    fn with_level(level: LogLevel, message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Bounded ring of operator-facing progress lines, oldest first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => tracing::info!("scan log: {}", entry.message),
            LogLevel::Warn => tracing::warn!("scan log: {}", entry.message),
            LogLevel::Error => tracing::error!("scan log: {}", entry.message),
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn view(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
