//! 内存记录存储（默认 / 测试）

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::store::{RecordStore, StoreError, StoredRecord};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, (serde_json::Value, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    #[cfg(test)]
    pub(crate) async fn put_at(&self, key: &str, record: serde_json::Value, at: DateTime<Utc>) {
        self.records.write().await.insert(key.to_string(), (record, at));
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put(&self, key: &str, record: serde_json::Value) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(key.to_string(), (record, Utc::now()));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, at))| StoredRecord {
                key: k.clone(),
                value: v.clone(),
                stored_at: *at,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(key).is_some())
    }
}
