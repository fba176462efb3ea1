//! Agent 主循环
//!
//! GATHER_STATE -> DECIDE -> ACT -> (done ? EXIT : GATHER_STATE)；
//! 每轮开头检查取消与步数上限。感知失败、无决策、执行失败都算失败步，
//! 连续失败达到预算即终止任务，成功的一步清零计数。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::prompt::{build_conversation, DEFAULT_SYSTEM_PROMPT};
use crate::agent::ActionHistory;
use crate::core::{AgentError, EventSink, Task, TaskEvent};
use crate::device::{ActionExecutor, Perception};
use crate::llm::{DecideError, Decider};

const MALFORMED_HINT: &str = "Your previous reply was not a valid decision. \
Reply with exactly one JSON object matching the schema, without markdown or prose.";

/// 单个任务的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub steps: usize,
    /// Ok 为完成时的结论，Err 为非成功终止原因
    pub result: Result<String, AgentError>,
}

impl LoopOutcome {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_message(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| e.to_string())
    }
}

/// 编排器驱动的单任务执行者
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task, cancel: CancellationToken, events: &dyn EventSink) -> LoopOutcome;
}

/// 循环参数
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_steps: usize,
    pub max_consecutive_failures: usize,
    pub history_limit: usize,
    pub system_prompt: String,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: 30,
            max_consecutive_failures: 3,
            history_limit: 12,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

pub struct AgentLoop {
    perception: Arc<dyn Perception>,
    executor: Arc<dyn ActionExecutor>,
    decider: Decider,
    settings: LoopSettings,
}

/// 连续失败计数
struct FailureBudget {
    consecutive: usize,
    limit: usize,
}

impl FailureBudget {
    fn record(&mut self, reason: AgentError) -> Result<(), AgentError> {
        self.consecutive += 1;
        if self.consecutive >= self.limit {
            return Err(AgentError::TooManyFailures {
                count: self.consecutive,
                last: Box::new(reason),
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

impl AgentLoop {
    pub fn new(
        perception: Arc<dyn Perception>,
        executor: Arc<dyn ActionExecutor>,
        decider: Decider,
        settings: LoopSettings,
    ) -> Self {
        Self {
            perception,
            executor,
            decider,
            settings,
        }
    }

    async fn run_steps(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        events: &dyn EventSink,
        step: &mut usize,
    ) -> Result<String, AgentError> {
        let mut history = ActionHistory::new(self.settings.history_limit);
        let mut budget = FailureBudget {
            consecutive: 0,
            limit: self.settings.max_consecutive_failures.max(1),
        };
        let mut hint: Option<&str> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if *step >= self.settings.max_steps {
                return Err(AgentError::StepLimit(self.settings.max_steps));
            }
            *step += 1;
            let n = *step;

            // GATHER_STATE
            let scene = match self.perception.capture().await {
                Ok(scene) => scene,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, step = n, error = %e, "screen capture failed");
                    events.emit(TaskEvent::progress(&task.id, format!("step {n}: screen capture failed")));
                    budget.record(AgentError::Perception(e.to_string()))?;
                    continue;
                }
            };

            // DECIDE
            let conversation = build_conversation(
                &self.settings.system_prompt,
                &task.instruction,
                &history,
                &scene,
                hint.take(),
            );
            let decision = match self.decider.decide_detailed(&conversation).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, step = n, error = %e, "no decision");
                    events.emit(TaskEvent::progress(&task.id, format!("step {n}: no usable decision")));
                    let reason = match e {
                        DecideError::Malformed(msg) => {
                            hint = Some(MALFORMED_HINT);
                            AgentError::NoDecision(msg)
                        }
                        DecideError::Unavailable(err) => AgentError::ModelUnavailable(err.to_string()),
                    };
                    budget.record(reason)?;
                    continue;
                }
            };

            // 取消可能在等待模型期间发生：丢弃这次决策
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            // ACT
            if let Some(action) = &decision.action {
                let result = self.executor.execute(action).await;
                let summary = format!("{} -> {}", action, result.message);
                history.push(n, summary.clone(), result.success);
                tracing::info!(task_id = %task.id, step = n, %action, success = result.success, "action executed");
                events.emit(TaskEvent::progress(&task.id, format!("step {n}: {summary}")));
                if !result.success {
                    budget.record(AgentError::ActionFailed(result.message))?;
                    continue;
                }
            }
            budget.reset();

            if decision.done {
                return Ok(decision.result.unwrap_or_else(|| "done".to_string()));
            }
        }
    }
}

#[async_trait]
impl TaskRunner for AgentLoop {
    async fn run(&self, task: &Task, cancel: CancellationToken, events: &dyn EventSink) -> LoopOutcome {
        let mut steps = 0;
        let result = self.run_steps(task, &cancel, events, &mut steps).await;
        match &result {
            Ok(summary) => tracing::info!(task_id = %task.id, steps, %summary, "task finished"),
            Err(e) => tracing::warn!(task_id = %task.id, steps, reason = %e, "task stopped"),
        }
        LoopOutcome { steps, result }
    }
}
