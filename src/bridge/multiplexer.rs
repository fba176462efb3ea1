//! 关联 ID 多路复用器
//!
//! 多个调用方共享一条单线程脚本通道：每次 call 生成新的关联 ID 并登记 oneshot 发送端，
//! 出站提交经由唯一的写入任务按序送入通道；入站结果按 ID 取出并完成对应调用。
//! 通道拆除时 fail_all 完成所有未决调用，超时调用自动移出待决表。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::protocol::error_message;
use crate::bridge::{BridgeError, BridgeEvent, CorrelationId, ScriptChannel, Submission};

type Responder = oneshot::Sender<Result<serde_json::Value, BridgeError>>;

#[derive(Default)]
struct PendingTable {
    calls: HashMap<CorrelationId, Responder>,
    closed: bool,
}

type SharedTable = Arc<Mutex<PendingTable>>;

fn lock(table: &SharedTable) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 调用方的 future 被丢弃（超时或上层取消）时移除待决项
struct PendingGuard {
    table: SharedTable,
    id: CorrelationId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.table).calls.remove(&self.id);
    }
}

/// 面向脚本运行时的请求/响应桥
pub struct ScriptBridge {
    table: SharedTable,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<Submission>,
    call_timeout: Duration,
}

impl ScriptBridge {
    /// 创建桥并启动唯一的出站写入任务（需在 tokio 运行时内调用）
    pub fn new(channel: Arc<dyn ScriptChannel>, call_timeout: Duration) -> Arc<Self> {
        let table: SharedTable = Arc::new(Mutex::new(PendingTable::default()));
        let (outbound, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(channel, rx, table.clone()));
        Arc::new(Self {
            table,
            next_id: AtomicU64::new(1),
            outbound,
            call_timeout,
        })
    }

    /// 发起一次调用并等待与其关联 ID 匹配的响应
    pub async fn call(
        &self,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock(&self.table);
            if table.closed {
                return Err(BridgeError::ChannelClosed("bridge is closed".to_string()));
            }
            table.calls.insert(id, tx);
        }
        let _guard = PendingGuard {
            table: self.table.clone(),
            id,
        };

        tracing::debug!(correlation_id = id, operation, "bridge call submitted");
        let submission = Submission {
            operation: operation.to_string(),
            args,
            correlation_id: id,
        };
        if self.outbound.send(submission).is_err() {
            return Err(BridgeError::ChannelClosed("writer stopped".to_string()));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::ChannelClosed("call abandoned".to_string())),
            Err(_) => {
                tracing::warn!(correlation_id = id, operation, "bridge call timed out");
                Err(BridgeError::Timeout {
                    operation: operation.to_string(),
                    after: self.call_timeout,
                })
            }
        }
    }

    /// 入站成功结果；返回是否投递给了等待中的调用方
    pub fn on_result(&self, id: CorrelationId, payload: serde_json::Value) -> bool {
        self.complete(id, Ok(payload))
    }

    /// 入站错误结果
    pub fn on_error(&self, id: CorrelationId, payload: serde_json::Value) -> bool {
        self.complete(id, Err(BridgeError::Remote(error_message(&payload))))
    }

    pub fn dispatch(&self, event: BridgeEvent) -> bool {
        match event {
            BridgeEvent::Result {
                correlation_id,
                payload,
                domain,
            } => {
                tracing::trace!(correlation_id, ?domain, "bridge result");
                self.on_result(correlation_id, payload)
            }
            BridgeEvent::Error {
                correlation_id,
                payload,
                domain,
            } => {
                tracing::trace!(correlation_id, ?domain, "bridge error");
                self.on_error(correlation_id, payload)
            }
        }
    }

    /// 把运行时的事件流接入桥；事件流结束视为通道拆除
    pub fn spawn_event_pump(self: &Arc<Self>, mut events: mpsc::Receiver<BridgeEvent>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                bridge.dispatch(event);
            }
            let failed = bridge.fail_all("event stream closed");
            tracing::info!(failed, "bridge event pump stopped");
        })
    }

    /// 以 ChannelClosed 完成所有未决调用，返回被清理的数量
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(CorrelationId, Responder)> = lock(&self.table).calls.drain().collect();
        let count = drained.len();
        for (id, responder) in drained {
            tracing::debug!(correlation_id = id, reason, "failing pending bridge call");
            let _ = responder.send(Err(BridgeError::ChannelClosed(reason.to_string())));
        }
        if count > 0 {
            tracing::warn!(count, reason, "failed all pending bridge calls");
        }
        count
    }

    /// 关闭桥：之后的 call 立即失败
    pub fn close(&self, reason: &str) -> usize {
        lock(&self.table).closed = true;
        self.fail_all(reason)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.table).closed
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.table).calls.len()
    }

    fn complete(&self, id: CorrelationId, result: Result<serde_json::Value, BridgeError>) -> bool {
        let responder = lock(&self.table).calls.remove(&id);
        match responder {
            Some(tx) => tx.send(result).is_ok(),
            None => {
                tracing::warn!(correlation_id = id, "response for unknown or abandoned call, discarded");
                false
            }
        }
    }
}

/// 唯一写入任务：按入队顺序逐个提交，通道拒绝时立即让对应调用失败
async fn run_writer(
    channel: Arc<dyn ScriptChannel>,
    mut rx: mpsc::UnboundedReceiver<Submission>,
    table: SharedTable,
) {
    while let Some(submission) = rx.recv().await {
        let id = submission.correlation_id;
        if let Err(e) = channel.submit(submission).await {
            tracing::warn!(correlation_id = id, error = %e, "script channel rejected submission");
            if let Some(tx) = lock(&table).calls.remove(&id) {
                let _ = tx.send(Err(BridgeError::Submit(e.to_string())));
            }
        }
    }
}
