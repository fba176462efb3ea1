//! 编排器状态投影
//!
//! 展示层只需要轻量快照（是否运行、当前任务、排队中的指令），内部完整状态由 Orchestrator 维护。

use serde::Serialize;

use crate::core::Task;

/// 编排器阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    Idle,
    Running,
    /// request_stop 之后、resume 之前
    Stopped,
    ShutDown,
}

/// 对外可渲染的状态快照
#[derive(Clone, Debug, Serialize)]
pub struct OrchestratorSnapshot {
    pub phase: OrchestratorPhase,
    pub is_running: bool,
    pub current_task: Option<Task>,
    pub pending: Vec<String>,
}
