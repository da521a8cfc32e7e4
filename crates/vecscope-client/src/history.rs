//! Filter history
//!
//! Remembers the searches and filter sets a user ran against a namespace so
//! they can be recalled later.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::compiler::Filter;

/// History is kept per connection and namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryKey {
    pub connection_id: String,
    pub namespace: String,
}

impl HistoryKey {
    pub fn new(connection_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            namespace: namespace.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub search_text: String,
    pub filters: Vec<Filter>,
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary, e.g. `search "abc" AND tags = x`.
    pub description: String,
}

impl HistoryEntry {
    /// Same query, ignoring when it ran and the filters' ids.
    pub fn same_query(&self, other: &HistoryEntry) -> bool {
        self.search_text == other.search_text
            && self.filters.len() == other.filters.len()
            && self.filters.iter().zip(&other.filters).all(|(a, b)| {
                a.attribute == b.attribute && a.operator == b.operator && a.value == b.value
            })
    }
}

/// Where history entries are stored.
pub trait FilterHistory: Send + Sync {
    fn record(&self, key: &HistoryKey, entry: HistoryEntry);

    /// Entries for `key`, newest first.
    fn entries(&self, key: &HistoryKey) -> Vec<HistoryEntry>;
}

/// Keeps the newest `limit` entries per key in memory.
pub struct MemoryFilterHistory {
    limit: usize,
    entries: RwLock<HashMap<HistoryKey, VecDeque<HistoryEntry>>>,
}

impl MemoryFilterHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn clear(&self, key: &HistoryKey) {
        self.entries.write().remove(key);
    }
}

impl FilterHistory for MemoryFilterHistory {
    fn record(&self, key: &HistoryKey, entry: HistoryEntry) {
        let mut entries = self.entries.write();
        let list = entries.entry(key.clone()).or_default();

        // Re-running the latest query only refreshes its timestamp
        if let Some(latest) = list.front_mut()
            && latest.same_query(&entry)
        {
            *latest = entry;
            return;
        }

        list.push_front(entry);
        list.truncate(self.limit);
    }

    fn entries(&self, key: &HistoryKey) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }
}
