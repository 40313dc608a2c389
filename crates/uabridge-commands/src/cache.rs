//! Last-known-value cache.
//!
//! Keyed by (device, object). Only successful completions are stored: a
//! transport failure never overwrites or clears a previously good entry, so
//! a later non-immediate `get` still returns the last value the device
//! actually reported.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use uabridge_core::Reading;

/// Cached result of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub readings: Vec<Reading>,
    pub stored_at: DateTime<Utc>,
}

/// Concurrent result cache.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<(String, String), CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the readings for `(device, key)`, replacing any previous entry.
    pub fn put(&self, device: &str, key: &str, readings: Vec<Reading>) {
        tracing::trace!(device, key, count = readings.len(), "Cache put");
        self.entries.insert(
            (device.to_string(), key.to_string()),
            CacheEntry {
                readings,
                stored_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, device: &str, key: &str) -> Option<CacheEntry> {
        self.entries
            .get(&(device.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, device: &str, key: &str) -> bool {
        self.entries
            .contains_key(&(device.to_string(), key.to_string()))
    }

    pub fn invalidate(&self, device: &str, key: &str) -> bool {
        self.entries
            .remove(&(device.to_string(), key.to_string()))
            .is_some()
    }

    /// Drop every entry of one device. Returns how many were removed.
    pub fn clear_device(&self, device: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(d, _), _| d != device);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
