// Narration cache
// Timestamped JSON records in a bounded key/value store, expired lazily on lookup

use std::sync::Arc;

use super::models::{CacheEntry, CacheStats, NarrationResult};
use crate::db::store::KeyValueStore;
use crate::error::CacheWriteError;

pub const DEFAULT_EXPIRY_MS: i64 = 259_200_000;
pub const DEFAULT_KEY_PREFIX: &str = "narration_cache_";

/// Wall clock in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub struct NarrationCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    expiry_ms: i64,
    prefix: String,
}

impl NarrationCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_options(store, Arc::new(SystemClock), DEFAULT_EXPIRY_MS, DEFAULT_KEY_PREFIX)
    }

    pub fn with_options(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        expiry_ms: i64,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            expiry_ms,
            prefix: prefix.into(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn is_expired(&self, entry: &CacheEntry, now: i64) -> bool {
        now - entry.timestamp > self.expiry_ms
    }

    /// Parse a stored value; `None` for anything unreadable or stamped in the future
    fn parse(&self, raw: &str, now: i64) -> Option<CacheEntry> {
        match serde_json::from_str::<CacheEntry>(raw) {
            Ok(entry) if entry.timestamp <= now => Some(entry),
            Ok(entry) => {
                tracing::warn!("[Cache] Entry stamped in the future ({}), discarding", entry.timestamp);
                None
            }
            Err(e) => {
                tracing::warn!("[Cache] Malformed entry: {}", e);
                None
            }
        }
    }

    fn discard(&self, storage_key: &str) {
        if let Err(e) = self.store.remove_item(storage_key) {
            tracing::warn!("[Cache] Failed to remove {}: {}", storage_key, e);
        }
    }

    /// Cached narration for `key`, if present and fresh
    pub fn get(&self, key: &str) -> Option<NarrationResult> {
        let storage_key = self.storage_key(key);
        let raw = match self.store.get_item(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("[Cache] Lookup failed for {}: {}", key, e);
                return None;
            }
        };

        let now = self.clock.now_millis();
        let Some(entry) = self.parse(&raw, now) else {
            self.discard(&storage_key);
            return None;
        };

        if self.is_expired(&entry, now) {
            tracing::debug!("[Cache] Entry for {} expired", key);
            self.discard(&storage_key);
            return None;
        }

        Some(entry.data)
    }

    /// Store `data` under `key`, replacing any previous entry
    pub fn set(&self, key: &str, data: &NarrationResult) -> Result<(), CacheWriteError> {
        let entry = CacheEntry {
            timestamp: self.clock.now_millis(),
            data: data.clone(),
        };
        let value = serde_json::to_string(&entry)?;
        self.store.set_item(&self.storage_key(key), &value)
    }

    pub fn remove(&self, key: &str) {
        self.discard(&self.storage_key(key));
    }

    fn cache_keys(&self) -> Vec<String> {
        match self.store.keys_with_prefix(&self.prefix) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("[Cache] Failed to list entries: {}", e);
                Vec::new()
            }
        }
    }

    /// Remove every expired or unreadable entry. Returns how many were removed.
    pub fn clean_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;

        for storage_key in self.cache_keys() {
            let stale = match self.store.get_item(&storage_key) {
                Ok(Some(raw)) => self
                    .parse(&raw, now)
                    .map_or(true, |entry| self.is_expired(&entry, now)),
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!("[Cache] Failed to read {}: {}", storage_key, e);
                    false
                }
            };
            if stale {
                self.discard(&storage_key);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("[Cache] Cleaned {} expired entries", removed);
        }
        removed
    }

    /// Entry count and bytes used by narration entries
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for storage_key in self.cache_keys() {
            if let Ok(Some(raw)) = self.store.get_item(&storage_key) {
                stats.total += 1;
                stats.size += storage_key.len() + raw.len();
            }
        }
        stats
    }

    /// Drop every narration entry, leaving other keys alone
    pub fn clear(&self) -> usize {
        let keys = self.cache_keys();
        for storage_key in &keys {
            self.discard(storage_key);
        }
        tracing::info!("[Cache] Cleared {} entries", keys.len());
        keys.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that only moves when told to
    pub struct ManualClock(AtomicI64);

    impl ManualClock {
        pub fn new(start: i64) -> Self {
            Self(AtomicI64::new(start))
        }

        pub fn advance(&self, ms: i64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
