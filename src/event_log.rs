//! Shared event feed for worker status messages.
//!
//! Workers report command outcomes as timestamped entries with a severity
//! marker; the GUI renders the feed in its log panel. Entries also pass
//! through the `log` facade so headless runs still get output. The buffer is
//! bounded; old entries fall off the front.

use chrono::{DateTime, Local};
use log::{error, info};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const MAX_ENTRIES: usize = 1000;

/// Severity of an event feed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// A single entry in the event feed.
#[derive(Clone, Debug)]
pub struct EventEntry {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub message: String,
}

/// Thread-safe, clonable handle to the event feed.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<VecDeque<EventEntry>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry; `ok = false` marks it as an error.
    pub fn push(&self, message: impl Into<String>, ok: bool) {
        let message = message.into();
        let severity = if ok {
            info!("{message}");
            Severity::Info
        } else {
            error!("{message}");
            Severity::Error
        };
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= MAX_ENTRIES {
                entries.pop_front();
            }
            entries.push_back(EventEntry {
                timestamp: Local::now(),
                severity,
                message,
            });
        }
    }

    /// Snapshot of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<EventEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops all entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_snapshot() {
        let feed = EventLog::new();
        feed.push("started", true);
        feed.push("broke", false);

        let entries = feed.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].severity, Severity::Info);
        assert_eq!(entries[1].severity, Severity::Error);
        assert_eq!(entries[1].message, "broke");
    }

    #[test]
    fn test_bounded() {
        let feed = EventLog::new();
        for i in 0..(MAX_ENTRIES + 10) {
            feed.push(format!("msg {i}"), true);
        }
        let entries = feed.snapshot();
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries[0].message, "msg 10");
    }

    #[test]
    fn test_clear() {
        let feed = EventLog::new();
        feed.push("one", true);
        feed.clear();
        assert!(feed.snapshot().is_empty());
    }
}
