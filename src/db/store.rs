// Key/value storage
// A bounded string store with local-storage semantics, backed by SQLite or memory

use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

use super::connection::DatabaseConnection;
use crate::error::CacheWriteError;

/// String key/value storage that may refuse writes once full
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite. Fails with `QuotaExceeded` when the store would
    /// grow past its limit.
    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheWriteError>;

    fn remove_item(&self, key: &str) -> Result<()>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

fn check_quota(limit: Option<usize>, others: usize, key: &str, value: &str) -> Result<(), CacheWriteError> {
    if let Some(limit) = limit {
        let needed = others + entry_size(key, value);
        if needed > limit {
            return Err(CacheWriteError::QuotaExceeded { needed, limit });
        }
    }
    Ok(())
}

/// SQLite-backed store using the `kv_store` table
pub struct SqliteStore {
    db: DatabaseConnection,
    max_bytes: Option<usize>,
}

impl SqliteStore {
    pub fn new(db: DatabaseConnection, max_bytes: Option<usize>) -> Self {
        Self { db, max_bytes }
    }
}

impl KeyValueStore for SqliteStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.get_connection();
        let conn = conn.lock();

        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheWriteError> {
        let conn = self.db.get_connection();
        let conn = conn.lock();
        let storage = |e: rusqlite::Error| CacheWriteError::Storage(e.to_string());

        if self.max_bytes.is_some() {
            let others: i64 = conn
                .query_row(
                    "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
                     FROM kv_store WHERE key != ?1",
                    params![key],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            check_quota(self.max_bytes, others.max(0) as usize, key, value)?;
        }

        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )
        .map_err(storage)?;

        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let conn = self.db.get_connection();
        let conn = conn.lock();
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.db.get_connection();
        let conn = conn.lock();

        let mut stmt = conn.prepare(
            "SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(keys)
    }
}

/// In-process store with the same quota behaviour
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, String>>,
    max_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            max_bytes: Some(max_bytes),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheWriteError> {
        let mut items = self.items.lock();
        let others: usize = items
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| entry_size(k, v))
            .sum();
        check_quota(self.max_bytes, others, key, value)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.lock().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .items
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
