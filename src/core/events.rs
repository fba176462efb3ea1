//! 任务生命周期事件：started / progress / completed / failed
//!
//! 事件推送是尽力而为的：EventSink::emit 不阻塞、不返回错误，订阅者掉线不影响任务执行。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::TaskId;

/// 事件类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Started,
    Progress,
    Completed,
    Failed,
}

/// 单条生命周期事件（可序列化为 JSON 供展示层使用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: TaskId,
    pub message: String,
}

impl TaskEvent {
    pub fn started(task_id: &str, instruction: &str) -> Self {
        Self::new(TaskEventKind::Started, task_id, instruction)
    }

    pub fn progress(task_id: &str, message: impl Into<String>) -> Self {
        Self::new(TaskEventKind::Progress, task_id, message)
    }

    pub fn completed(task_id: &str, message: impl Into<String>) -> Self {
        Self::new(TaskEventKind::Completed, task_id, message)
    }

    pub fn failed(task_id: &str, reason: impl Into<String>) -> Self {
        Self::new(TaskEventKind::Failed, task_id, reason)
    }

    fn new(kind: TaskEventKind, task_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: task_id.to_string(),
            message: message.into(),
        }
    }
}

/// 生命周期事件接收方（通知栏、UI 状态等由外部实现）
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

/// 通过 broadcast 通道分发事件；没有订阅者时静默丢弃
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TaskEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

/// 仅写日志
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: TaskEvent) {
        match event.kind {
            TaskEventKind::Failed => {
                tracing::warn!(task_id = %event.task_id, "task failed: {}", event.message)
            }
            kind => tracing::info!(task_id = %event.task_id, ?kind, "{}", event.message),
        }
    }
}

/// 同时转发给多个 sink
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: TaskEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(4);
        sink.emit(TaskEvent::started("t1", "open camera"));
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let a = Arc::new(BroadcastSink::new(4));
        let b = Arc::new(BroadcastSink::new(4));
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(LogSink));

        fanout.emit(TaskEvent::failed("t1", "cancelled"));

        assert_eq!(rx_a.recv().await.unwrap().kind, TaskEventKind::Failed);
        assert_eq!(rx_b.recv().await.unwrap().message, "cancelled");
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let json = serde_json::to_value(TaskEvent::progress("t9", "step 1")).unwrap();
        assert_eq!(json["kind"], "progress");
        assert_eq!(json["task_id"], "t9");
    }
}
