//! Bounded event log
//!
//! Append-only in spirit: entries accumulate at the tail and the head is
//! truncated past the configured bound when the log is saved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line in the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub entry: String,
}

/// In-memory view of the log, bounded to `max_entries`
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: Vec<EventLogEntry>,
    max_entries: usize,
}

impl EventLog {
    pub fn new(max_entries: usize, entries: Vec<EventLogEntry>) -> Self {
        let mut log = Self {
            entries,
            max_entries,
        };
        log.truncate_head();
        log
    }

    /// Append an entry, dropping the oldest past the bound
    pub fn record(&mut self, entry: impl Into<String>) {
        self.entries.push(EventLogEntry {
            timestamp: Utc::now(),
            entry: entry.into(),
        });
        self.truncate_head();
    }

    pub fn entries(&self) -> &[EventLogEntry] {
        &self.entries
    }

    /// The most recent `n` entries, oldest first
    pub fn recent(&self, n: usize) -> &[EventLogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    fn truncate_head(&mut self) {
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_from_the_head() {
        let mut log = EventLog::new(3, Vec::new());
        for i in 0..5 {
            log.record(format!("entry {i}"));
        }
        let entries: Vec<_> = log.entries().iter().map(|e| e.entry.as_str()).collect();
        assert_eq!(entries, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn test_recent_returns_tail() {
        let mut log = EventLog::new(10, Vec::new());
        for i in 0..4 {
            log.record(format!("e{i}"));
        }
        let recent: Vec<_> = log.recent(2).iter().map(|e| e.entry.as_str()).collect();
        assert_eq!(recent, vec!["e2", "e3"]);
        assert_eq!(log.recent(100).len(), 4);
    }

    #[test]
    fn test_rehydration_applies_bound() {
        let stale: Vec<EventLogEntry> = (0..6)
            .map(|i| EventLogEntry {
                timestamp: Utc::now(),
                entry: format!("old {i}"),
            })
            .collect();
        let log = EventLog::new(4, stale);
        assert_eq!(log.entries().len(), 4);
        assert_eq!(log.entries()[0].entry, "old 2");
    }
}
