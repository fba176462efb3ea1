//! 记录存储：任务记录与日志保留
//!
//! RecordStore 是只追加的键值存储契约（put / list / delete，允许最终一致）；
//! RecordWriter 在后台监管写入，任务执行从不等待持久化完成。

pub mod memory;
pub mod sqlite;
pub mod writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use writer::{RecordWriter, WriterHealth};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage worker failed: {0}")]
    Join(String),
}

/// 一条已存储的记录
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, key: &str, record: serde_json::Value) -> Result<(), StoreError>;

    /// 按键升序返回所有以 prefix 开头的记录
    async fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>, StoreError>;

    /// 返回键是否存在
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// 删除 prefix 下早于 before 写入的记录，返回删除数量
    async fn prune(&self, prefix: &str, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for record in self.list(prefix).await? {
            if record.stored_at < before && self.delete(&record.key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// 读取并解码 prefix 下的全部记录；无法解码的条目记日志后跳过
pub async fn load_records<T: DeserializeOwned>(
    store: &dyn RecordStore,
    prefix: &str,
) -> Result<Vec<T>, StoreError> {
    let records = store.list(prefix).await?;
    Ok(records
        .iter()
        .filter_map(|r| match r.decode() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key = %r.key, error = %e, "skipping undecodable record");
                None
            }
        })
        .collect())
}
