//! 后台记录写入器
//!
//! submit 只把写操作放进队列就返回；单个后台 worker 按提交顺序执行，
//! 每次写入在独立的子任务里做有限次退避重试，失败与 panic 都会记 error 日志而不是静默丢弃。
//! 连续失败次数通过 watch 通道对外暴露（[`RecordWriter::health`]），由上层决定是否升级为致命错误。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::core::{retry, RetryPolicy};
use crate::store::RecordStore;

enum WriteOp {
    Put {
        key: String,
        value: serde_json::Value,
    },
    Prune {
        prefix: String,
        before: DateTime<Utc>,
    },
    Flush(oneshot::Sender<()>),
}

/// 写入健康状态：任意一次成功写入即恢复 Healthy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterHealth {
    Healthy,
    /// 重试耗尽（或写入任务崩溃）的连续写入次数
    Failing { consecutive: u32, last_error: String },
}

impl WriterHealth {
    pub fn consecutive_failures(&self) -> u32 {
        match self {
            WriterHealth::Healthy => 0,
            WriterHealth::Failing { consecutive, .. } => *consecutive,
        }
    }
}

#[derive(Clone)]
pub struct RecordWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
    store: Arc<dyn RecordStore>,
    health: watch::Receiver<WriterHealth>,
}

impl RecordWriter {
    /// 启动后台 worker（需在 tokio 运行时内调用）
    pub fn spawn(store: Arc<dyn RecordStore>, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (health_tx, health) = watch::channel(WriterHealth::Healthy);
        tokio::spawn(run_worker(store.clone(), policy, rx, health_tx));
        Self { tx, store, health }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn health(&self) -> watch::Receiver<WriterHealth> {
        self.health.clone()
    }

    /// 排队写入一条记录，不等待完成
    pub fn submit<T: Serialize>(&self, key: impl Into<String>, record: &T) {
        let key = key.into();
        let value = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(%key, error = %e, "record is not serializable, dropped");
                return;
            }
        };
        if self.tx.send(WriteOp::Put { key, value }).is_err() {
            tracing::error!("record writer is gone, write dropped");
        }
    }

    /// 排队清理 prefix 下早于 before 的记录
    pub fn prune(&self, prefix: impl Into<String>, before: DateTime<Utc>) {
        let _ = self.tx.send(WriteOp::Prune {
            prefix: prefix.into(),
            before,
        });
    }

    /// 等待此前提交的所有写操作处理完毕
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_worker(
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    health: watch::Sender<WriterHealth>,
) {
    let mut consecutive = 0u32;
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Put { key, value } => {
                let store = store.clone();
                let policy = policy.clone();
                let log_key = key.clone();
                let job = tokio::spawn(async move {
                    retry(&policy, || store.put(&key, value.clone())).await
                });
                let failure = match job.await {
                    Ok(Ok(())) => {
                        tracing::debug!(key = %log_key, "record written");
                        None
                    }
                    Ok(Err(e)) => {
                        tracing::error!(key = %log_key, error = %e, "record write failed");
                        Some(e.to_string())
                    }
                    Err(e) => {
                        tracing::error!(key = %log_key, error = %e, "record write crashed");
                        Some(e.to_string())
                    }
                };
                match failure {
                    None if consecutive > 0 => {
                        consecutive = 0;
                        health.send_replace(WriterHealth::Healthy);
                    }
                    None => {}
                    Some(last_error) => {
                        consecutive = consecutive.saturating_add(1);
                        health.send_replace(WriterHealth::Failing { consecutive, last_error });
                    }
                }
            }
            WriteOp::Prune { prefix, before } => match store.prune(&prefix, before).await {
                Ok(removed) => tracing::info!(%prefix, removed, "pruned old records"),
                Err(e) => tracing::error!(%prefix, error = %e, "record pruning failed"),
            },
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("record writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, StoredRecord};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4), 2.0)
    }

    #[tokio::test]
    async fn test_submit_then_flush_is_visible() {
        let store = Arc::new(MemoryStore::new());
        let writer = RecordWriter::spawn(store.clone(), policy());
        writer.submit("task/a/started", &json!({"n": 1}));
        writer.submit("task/b/started", &json!({"n": 2}));
        writer.flush().await;
        assert_eq!(store.len().await, 2);
    }

    /// 前 N 次 put 失败的存储
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn put(&self, key: &str, record: serde_json::Value) -> Result<(), StoreError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Join("disk busy".to_string()));
            }
            self.inner.put(key, record).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>, StoreError> {
            self.inner.list(prefix).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_transient_write_failures_are_retried() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(2),
        });
        let writer = RecordWriter::spawn(store.clone(), policy());
        writer.submit("k", &json!(true));
        writer.flush().await;
        assert_eq!(store.list("k").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_dropped_not_blocking() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(100),
        });
        let writer = RecordWriter::spawn(store.clone(), policy());
        writer.submit("k", &json!(true));
        writer.flush().await;
        assert!(store.list("k").await.unwrap().is_empty());
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 97);
    }

    #[tokio::test]
    async fn test_exhausted_writes_report_failing_health() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(6),
        });
        let writer = RecordWriter::spawn(store.clone(), policy());
        let health = writer.health();
        assert_eq!(*health.borrow(), WriterHealth::Healthy);

        writer.submit("a", &json!(1));
        writer.submit("b", &json!(2));
        writer.flush().await;
        match &*health.borrow() {
            WriterHealth::Failing { consecutive, last_error } => {
                assert_eq!(*consecutive, 2);
                assert!(last_error.contains("disk busy"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // 存储恢复后一次成功写入即复位
        writer.submit("c", &json!(3));
        writer.flush().await;
        assert_eq!(*health.borrow(), WriterHealth::Healthy);
        assert_eq!(store.list("c").await.unwrap().len(), 1);
    }
}
