//! SQLite 记录存储
//!
//! rusqlite 是同步 API，所有语句都放到 spawn_blocking 中执行，避免阻塞 async 运行时。

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::{RecordStore, StoreError, StoredRecord};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_stored_at ON records(stored_at);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn put(&self, key: &str, record: serde_json::Value) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = serde_json::to_string(&record)?;
        let now = Utc::now().timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO records (key, value, stored_at) VALUES (?1, ?2, ?3)",
                params![key, value, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, stored_at FROM records
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map(params![prefix], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (key, value, stored_at) = row?;
                out.push(StoredRecord {
                    key,
                    value: serde_json::from_str(&value)?,
                    stored_at: millis_to_utc(stored_at),
                });
            }
            Ok(out)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let existed = conn
                .query_row("SELECT 1 FROM records WHERE key = ?1", params![key], |_| Ok(()))
                .optional()?
                .is_some();
            conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
            Ok(existed)
        })
        .await
    }

    async fn prune(&self, prefix: &str, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let prefix = prefix.to_string();
        let cutoff = before.timestamp_millis();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM records WHERE substr(key, 1, length(?1)) = ?1 AND stored_at < ?2",
                params![prefix, cutoff],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put("task/t1/started", json!({"status": "started"}))
                .await
                .unwrap();
            store.put("other/x", json!(1)).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let records = store.list("task/").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value["status"], "started");
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("k", json!(null)).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_respects_prefix_and_cutoff() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("task/a/finished", json!(1)).await.unwrap();
        store.put("log/a", json!(1)).await.unwrap();

        let future = Utc::now() + chrono::Duration::minutes(1);
        assert_eq!(store.prune("task/", future).await.unwrap(), 1);
        assert_eq!(store.list("").await.unwrap().len(), 1);

        let past = Utc::now() - chrono::Duration::minutes(1);
        assert_eq!(store.prune("log/", past).await.unwrap(), 0);
    }
}
