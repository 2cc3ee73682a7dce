//! Device log channels
//!
//! Log collection plumbing (syslog readers, crash report watchers) pushes into
//! a [`LogBuffer`]; sessions only read from it. Each read returns the entries
//! appended since the previous read of that kind.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// The fixed set of log kinds a session exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    Syslog,
    Crashlog,
    Performance,
}

impl LogKind {
    pub const ALL: [LogKind; 3] = [LogKind::Syslog, LogKind::Crashlog, LogKind::Performance];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Syslog => "syslog",
            LogKind::Crashlog => "crashlog",
            LogKind::Performance => "performance",
        }
    }

    fn index(&self) -> usize {
        match self {
            LogKind::Syslog => 0,
            LogKind::Crashlog => 1,
            LogKind::Performance => 2,
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// One log line
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub level: String,
    pub message: String,
}

/// Shared, bounded log channels
#[derive(Clone)]
pub struct LogBuffer {
    channels: Arc<Mutex<[VecDeque<LogEntry>; 3]>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(Default::default())),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, dropping the oldest when the channel is full
    pub fn push(&self, kind: LogKind, level: &str, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().timestamp_millis(),
            level: level.to_string(),
            message: message.into(),
        };
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let channel = &mut channels[kind.index()];
        if channel.len() == self.capacity {
            channel.pop_front();
        }
        channel.push_back(entry);
    }

    /// Take every entry appended since the last read of `kind`
    pub fn read(&self, kind: LogKind) -> Vec<LogEntry> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels[kind.index()].drain(..).collect()
    }

    pub fn len(&self, kind: LogKind) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels[kind.index()].len()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}
