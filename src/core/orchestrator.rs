//! 任务队列编排器
//!
//! 持有 FIFO 指令队列、唯一的「当前任务」槽与运行标志；同一时刻至多一个 Agent 循环在执行。
//! enqueue 在队列锁内完成「入队 + 检查并置位 is_running」，并发入队只会启动一个排空循环。
//! 单个任务的错误或 panic 在任务边界被捕获并记为失败记录，队列继续处理下一个任务。
//!
//! 停止策略：request_stop 之后 enqueue 仍然接受并排队，但不会自动开始，需调用 resume。

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::agent::{LoopOutcome, TaskRunner};
use crate::bridge::ScriptBridge;
use crate::core::{
    AgentError, EventSink, OrchestratorError, OrchestratorPhase, OrchestratorSnapshot, Task,
    TaskEvent, TaskId, TaskRecord, TASK_RECORD_PREFIX,
};
use crate::store::{load_records, RecordWriter, StoreError};

#[derive(Default)]
struct Inner {
    queue: VecDeque<Task>,
    is_running: bool,
    current: Option<Task>,
    current_cancel: Option<CancellationToken>,
    stopped: bool,
    shut_down: bool,
}

pub struct Orchestrator {
    inner: Mutex<Inner>,
    runner: Arc<dyn TaskRunner>,
    events: Arc<dyn EventSink>,
    writer: RecordWriter,
    bridge: Option<Arc<ScriptBridge>>,
    root_cancel: CancellationToken,
    running_tx: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        events: Arc<dyn EventSink>,
        writer: RecordWriter,
        bridge: Option<Arc<ScriptBridge>>,
    ) -> Arc<Self> {
        let (running_tx, _) = watch::channel(false);
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            runner,
            events,
            writer,
            bridge,
            root_cancel: CancellationToken::new(),
            running_tx,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 追加一条指令；没有排空循环且未停止时启动一个
    pub fn enqueue(self: &Arc<Self>, instruction: impl Into<String>) -> Result<TaskId, OrchestratorError> {
        let instruction = instruction.into();
        if instruction.trim().is_empty() {
            return Err(OrchestratorError::EmptyInstruction);
        }
        let task = Task::new(instruction.trim());
        let id = task.id.clone();

        let start = {
            let mut inner = self.lock();
            if inner.shut_down {
                return Err(OrchestratorError::ShutDown);
            }
            inner.queue.push_back(task);
            let start = !inner.is_running && !inner.stopped;
            if start {
                inner.is_running = true;
                self.running_tx.send_replace(true);
            }
            tracing::info!(task_id = %id, queued = inner.queue.len(), "task enqueued");
            start
        };

        if start {
            tokio::spawn(Arc::clone(self).drain());
        }
        Ok(id)
    }

    /// 协作式停止：取消当前任务并停止出队
    pub fn request_stop(&self) {
        let mut inner = self.lock();
        inner.stopped = true;
        if let Some(token) = &inner.current_cancel {
            token.cancel();
        }
        tracing::info!(queued = inner.queue.len(), "stop requested");
    }

    /// 解除停止；队列非空时重新开始排空
    pub fn resume(self: &Arc<Self>) {
        let start = {
            let mut inner = self.lock();
            if inner.shut_down {
                return;
            }
            inner.stopped = false;
            let start = !inner.is_running && !inner.queue.is_empty();
            if start {
                inner.is_running = true;
                self.running_tx.send_replace(true);
            }
            start
        };
        if start {
            tracing::info!("resuming queue");
            tokio::spawn(Arc::clone(self).drain());
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running
    }

    /// 当前执行中的指令
    pub fn current_task(&self) -> Option<String> {
        self.lock().current.as_ref().map(|t| t.instruction.clone())
    }

    /// 排队中（尚未开始）的指令
    pub fn pending(&self) -> Vec<String> {
        self.lock().queue.iter().map(|t| t.instruction.clone()).collect()
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        let inner = self.lock();
        let phase = if inner.shut_down {
            OrchestratorPhase::ShutDown
        } else if inner.is_running {
            OrchestratorPhase::Running
        } else if inner.stopped {
            OrchestratorPhase::Stopped
        } else {
            OrchestratorPhase::Idle
        };
        OrchestratorSnapshot {
            phase,
            is_running: inner.is_running,
            current_task: inner.current.clone(),
            pending: inner.queue.iter().map(|t| t.instruction.clone()).collect(),
        }
    }

    pub fn writer(&self) -> &RecordWriter {
        &self.writer
    }

    /// 读取已落盘的任务记录（started 与终态各一条）
    pub async fn records(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.writer.flush().await;
        load_records(self.writer.store().as_ref(), TASK_RECORD_PREFIX).await
    }

    /// 清理早于 retention 的任务记录
    pub fn prune_records(&self, retention: Duration) {
        let before = Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        self.writer.prune(TASK_RECORD_PREFIX, before);
    }

    /// 等待排空循环结束
    pub async fn wait_idle(&self) {
        let mut rx = self.running_tx.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// 停止、清空队列、关闭桥并等待当前任务收尾；之后 enqueue 返回 ShutDown
    pub async fn shutdown(&self) {
        let dropped = {
            let mut inner = self.lock();
            inner.shut_down = true;
            inner.stopped = true;
            if let Some(token) = &inner.current_cancel {
                token.cancel();
            }
            let dropped = inner.queue.len();
            inner.queue.clear();
            dropped
        };
        self.root_cancel.cancel();
        if let Some(bridge) = &self.bridge {
            bridge.close("orchestrator shutdown");
        }
        self.wait_idle().await;
        self.writer.flush().await;
        tracing::info!(dropped, "orchestrator shut down");
    }

    /// 单一排空循环；退出时与最后一次「队列为空」检查在同一把锁内清除 is_running
    async fn drain(self: Arc<Self>) {
        tracing::debug!("drain loop started");
        let mut guard = DrainGuard {
            orchestrator: self.as_ref(),
            armed: true,
        };
        loop {
            let next = {
                let mut inner = self.lock();
                let next = if inner.stopped {
                    None
                } else {
                    inner.queue.pop_front()
                };
                match next {
                    Some(task) => {
                        let token = self.root_cancel.child_token();
                        inner.current = Some(task.clone());
                        inner.current_cancel = Some(token.clone());
                        Some((task, token))
                    }
                    None => {
                        inner.is_running = false;
                        inner.current = None;
                        inner.current_cancel = None;
                        self.running_tx.send_replace(false);
                        None
                    }
                }
            };

            let Some((task, token)) = next else {
                guard.armed = false;
                tracing::debug!("drain loop finished");
                return;
            };

            self.execute(task, token).await;

            let mut inner = self.lock();
            inner.current = None;
            inner.current_cancel = None;
        }
    }

    /// 事件推送是尽力而为的：sink 的 panic 只记日志，不能终止排空循环
    fn emit(&self, event: TaskEvent) {
        let task_id = event.task_id.clone();
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| self.events.emit(event))) {
            tracing::error!(%task_id, reason = %panic_message(payload), "event sink panicked");
        }
    }

    async fn execute(&self, task: Task, cancel: CancellationToken) {
        let record = TaskRecord::started(task.clone());
        tracing::info!(task_id = %task.id, instruction = %task.instruction, "task started");
        self.emit(TaskEvent::started(&task.id, &task.instruction));
        self.writer.submit(record.key(), &record);

        let runner = Arc::clone(&self.runner);
        let events = Arc::clone(&self.events);
        let job_task = task.clone();
        let joined = tokio::spawn(async move {
            runner.run(&job_task, cancel, events.as_ref()).await
        })
        .await;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    "aborted".to_string()
                };
                tracing::error!(task_id = %task.id, %reason, "task crashed");
                LoopOutcome {
                    steps: 0,
                    result: Err(AgentError::Crashed(reason)),
                }
            }
        };

        let finished = record.finish(outcome.success(), outcome.steps, outcome.error_message());
        self.writer.submit(finished.key(), &finished);
        match &outcome.result {
            Ok(summary) => self.emit(TaskEvent::completed(&task.id, summary.clone())),
            Err(e) => self.emit(TaskEvent::failed(&task.id, e.user_message())),
        }
    }
}

/// 排空循环非正常退出（panic 或 future 被丢弃）时复位运行状态，避免 is_running 永久为 true
struct DrainGuard<'a> {
    orchestrator: &'a Orchestrator,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.orchestrator.lock();
        inner.is_running = false;
        inner.current = None;
        inner.current_cancel = None;
        self.orchestrator.running_tx.send_replace(false);
        tracing::error!(queued = inner.queue.len(), "drain loop exited abnormally");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
