//! Append-only event history carried by every mixture model.
//!
//! Each mutating operation (construction, EM, split, pruning, adaptation)
//! records one [`HistoryEntry`]. Entries are never edited or removed and keep
//! chronological order.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// One immutable history record.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryEntry {
    timestamp: u64,
    event: String,
}

impl HistoryEntry {
    /// Create an entry stamped with the current time.
    pub fn new(event: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            timestamp,
            event: event.into(),
        }
    }

    /// Unix timestamp in milliseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Event description.
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp, self.event)
    }
}

/// Ordered, append-only sequence of [`HistoryEntry`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, mirroring it to the `log` facade at debug level.
    pub fn record(&mut self, event: impl Into<String>) {
        let entry = HistoryEntry::new(event);
        log::debug!("gmm history: {}", entry.event);
        self.entries.push(entry);
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries recorded within `[start_ms, end_ms]`.
    pub fn in_range(&self, start_ms: u64, end_ms: u64) -> impl Iterator<Item = &HistoryEntry> {
        self.entries
            .iter()
            .filter(move |e| e.timestamp >= start_ms && e.timestamp <= end_ms)
    }

    /// History as newline-separated text.
    pub fn export(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
