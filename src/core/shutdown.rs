//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM 或输入结束时：
//! - 停止出队并取消当前任务
//! - 关闭脚本桥，挂起的调用立即失败
//! - 等待已提交的任务记录写完
//!
//! 记录写入持续失败时由 [`escalate_store_failures`] 升级为 FatalError 关闭。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::Orchestrator;
use crate::store::WriterHealth;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或输入结束
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭（幂等）
    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("received Ctrl+C, shutting down");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("received SIGTERM, shutting down");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 监视记录写入健康：连续失败达到 threshold 时触发 FatalError 关闭。
/// 关闭已发生或写入器退出时任务结束。
pub fn escalate_store_failures(
    manager: Arc<ShutdownManager>,
    mut health: watch::Receiver<WriterHealth>,
    threshold: u32,
) -> JoinHandle<()> {
    let threshold = threshold.max(1);
    tokio::spawn(async move {
        let reason = tokio::select! {
            state = health.wait_for(|h| h.consecutive_failures() >= threshold) => match state {
                Ok(state) => match &*state {
                    WriterHealth::Failing { consecutive, last_error } => {
                        format!("{consecutive} record writes failed in a row: {last_error}")
                    }
                    WriterHealth::Healthy => return,
                },
                Err(_) => return,
            },
            _ = manager.wait_for_shutdown() => return,
        };
        tracing::error!(reason = %reason, "record store is failing, shutting down");
        manager.shutdown(ShutdownReason::FatalError(reason));
    })
}

/// 运行 app 直到其结束或收到关闭信号，然后在 grace 时限内关闭编排器
pub async fn run_with_graceful_shutdown<F>(
    manager: Arc<ShutdownManager>,
    orchestrator: Arc<Orchestrator>,
    grace: Duration,
    app: F,
) where
    F: Future<Output = ()>,
{
    manager.install_signal_handlers();

    tokio::select! {
        _ = app => {
            tracing::info!("input finished, waiting for queued tasks");
            tokio::select! {
                _ = orchestrator.wait_idle() => {}
                _ = manager.wait_for_shutdown() => {
                    tracing::info!("shutdown signal received while draining");
                }
            }
        }
        _ = manager.wait_for_shutdown() => {
            tracing::info!("shutdown signal received");
        }
    }

    if tokio::time::timeout(grace, orchestrator.shutdown()).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "orchestrator shutdown timed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_reason_is_broadcast() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::FatalError("disk full".into()));
        assert_eq!(rx.recv().await.unwrap(), ShutdownReason::FatalError("disk full".into()));
        manager.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_store_escalates_to_fatal_shutdown() {
        let manager = Arc::new(ShutdownManager::new());
        let mut reasons = manager.subscribe();
        let (health_tx, health_rx) = watch::channel(WriterHealth::Healthy);
        let watcher = escalate_store_failures(manager.clone(), health_rx, 2);

        health_tx.send_replace(WriterHealth::Failing {
            consecutive: 1,
            last_error: "disk busy".into(),
        });
        tokio::task::yield_now().await;
        assert!(!manager.is_shutdown());

        health_tx.send_replace(WriterHealth::Failing {
            consecutive: 2,
            last_error: "disk busy".into(),
        });
        watcher.await.unwrap();
        assert!(manager.is_shutdown());
        match reasons.recv().await.unwrap() {
            ShutdownReason::FatalError(reason) => assert!(reason.contains("disk busy")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writer_failures_trigger_escalation() {
        use crate::core::RetryPolicy;
        use crate::store::{MemoryStore, RecordStore, RecordWriter, StoreError, StoredRecord};
        use async_trait::async_trait;

        struct BrokenStore;

        #[async_trait]
        impl RecordStore for BrokenStore {
            async fn put(&self, _key: &str, _record: serde_json::Value) -> Result<(), StoreError> {
                Err(StoreError::Join("read-only filesystem".into()))
            }
            async fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>, StoreError> {
                MemoryStore::new().list(prefix).await
            }
            async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
                Ok(false)
            }
        }

        let manager = Arc::new(ShutdownManager::new());
        let writer = RecordWriter::spawn(
            Arc::new(BrokenStore),
            RetryPolicy::new(1, Duration::ZERO, Duration::ZERO, 1.0),
        );
        let watcher = escalate_store_failures(manager.clone(), writer.health(), 2);

        writer.submit("task/a/started", &serde_json::json!({}));
        writer.submit("task/b/started", &serde_json::json!({}));
        writer.flush().await;
        tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_escalation_watcher_ends_on_normal_shutdown() {
        let manager = Arc::new(ShutdownManager::new());
        let (_health_tx, health_rx) = watch::channel(WriterHealth::Healthy);
        let watcher = escalate_store_failures(manager.clone(), health_rx, 1);
        manager.shutdown(ShutdownReason::UserInitiated);
        watcher.await.unwrap();
    }
}
