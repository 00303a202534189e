//! Per-key access recency ledger
//!
//! Holds no I/O and never removes entries on its own: removal is driven by
//! the hybrid cache (explicit deletes) and the eviction manager.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Access metadata for one tracked key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessMetadata {
    pub key: String,
    pub last_access_unix_millis: u64,
    pub access_count: u64,
    /// Last known size; approximate
    pub estimated_size_bytes: u64,
}

pub(crate) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct AccessTracker {
    entries: RwLock<HashMap<String, AccessMetadata>>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read or write of `key`. A size of zero keeps the last known size.
    pub(crate) fn record_access(&self, key: &str, estimated_size_bytes: u64) {
        self.record_access_at(key, estimated_size_bytes, now_unix_millis());
    }

    pub(crate) fn record_access_at(&self, key: &str, estimated_size_bytes: u64, at_millis: u64) {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| AccessMetadata {
                key: key.to_owned(),
                last_access_unix_millis: at_millis,
                access_count: 0,
                estimated_size_bytes: 0,
            });
        entry.last_access_unix_millis = entry.last_access_unix_millis.max(at_millis);
        entry.access_count = entry.access_count.saturating_add(1);
        if estimated_size_bytes > 0 {
            entry.estimated_size_bytes = estimated_size_bytes;
        }
    }

    /// Point-in-time copy of every tracked entry, in no particular order
    pub fn snapshot(&self) -> Vec<AccessMetadata> {
        self.entries.read().values().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<AccessMetadata> {
        self.entries.read().get(key).cloned()
    }

    pub(crate) fn remove(&self, key: &str) -> Option<AccessMetadata> {
        self.entries.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Merge a persisted snapshot into the ledger.
    ///
    /// Entries already tracked in this process win on recency, so a restore
    /// that races with live traffic never moves a key back in time.
    pub(crate) fn load_from(&self, snapshot: Vec<AccessMetadata>) {
        let mut entries = self.entries.write();
        for restored in snapshot {
            match entries.get_mut(&restored.key) {
                Some(live) => {
                    live.last_access_unix_millis = live
                        .last_access_unix_millis
                        .max(restored.last_access_unix_millis);
                    live.access_count = live.access_count.saturating_add(restored.access_count);
                    if live.estimated_size_bytes == 0 {
                        live.estimated_size_bytes = restored.estimated_size_bytes;
                    }
                }
                None => {
                    entries.insert(restored.key.clone(), restored);
                }
            }
        }
    }

    /// Serialize the ledger as a JSON array
    pub fn dump(&self) -> Result<Vec<u8>, serde_json::Error> {
        let snapshot = self.snapshot();
        serde_json::to_vec(&snapshot)
    }

    pub fn parse_dump(bytes: &[u8]) -> Result<Vec<AccessMetadata>, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_access_upserts_and_counts() {
        let tracker = AccessTracker::new();
        tracker.record_access_at("k", 120, 1_000);
        tracker.record_access_at("k", 0, 2_000);

        let meta = tracker.get("k").unwrap();
        assert_eq!(meta.access_count, 2);
        assert_eq!(meta.last_access_unix_millis, 2_000);
        // zero keeps the last known size
        assert_eq!(meta.estimated_size_bytes, 120);

        tracker.record_access_at("k", 300, 3_000);
        assert_eq!(tracker.get("k").unwrap().estimated_size_bytes, 300);
    }

    #[test]
    fn test_access_count_saturates() {
        let tracker = AccessTracker::new();
        tracker.load_from(vec![AccessMetadata {
            key: "k".to_owned(),
            last_access_unix_millis: 1,
            access_count: u64::MAX,
            estimated_size_bytes: 0,
        }]);
        tracker.record_access("k", 0);
        assert_eq!(tracker.get("k").unwrap().access_count, u64::MAX);
    }

    #[test]
    fn test_remove() {
        let tracker = AccessTracker::new();
        tracker.record_access("a", 1);
        tracker.record_access("b", 1);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.remove("a").is_some());
        assert!(tracker.remove("a").is_none());
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("a").is_none());
    }

    #[test]
    fn test_dump_and_restore() {
        let tracker = AccessTracker::new();
        tracker.record_access_at("a", 10, 100);
        tracker.record_access_at("b", 20, 200);

        let bytes = tracker.dump().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.is_array());
        assert!(json[0].get("lastAccessUnixMillis").is_some());

        let restored = AccessTracker::new();
        restored.load_from(AccessTracker::parse_dump(&bytes).unwrap());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("b").unwrap().estimated_size_bytes, 20);
    }

    #[test]
    fn test_restore_keeps_newer_live_access() {
        let tracker = AccessTracker::new();
        tracker.record_access_at("a", 0, 5_000);
        tracker.load_from(vec![AccessMetadata {
            key: "a".to_owned(),
            last_access_unix_millis: 1_000,
            access_count: 3,
            estimated_size_bytes: 64,
        }]);

        let meta = tracker.get("a").unwrap();
        assert_eq!(meta.last_access_unix_millis, 5_000);
        assert_eq!(meta.access_count, 4);
        assert_eq!(meta.estimated_size_bytes, 64);
    }
}
