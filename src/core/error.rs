//! 任务级错误类型
//!
//! AgentError 描述 Agent 循环的非成功终止原因（取消、步数上限、连续失败等），
//! Display 保留完整错误链，写入任务记录与日志；user_message 是推送给用户的简短原因，
//! 不包含底层传输或解析错误细节。

use thiserror::Error;

/// Agent 循环终止原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("cancelled")]
    Cancelled,

    #[error("step limit ({0}) reached")]
    StepLimit(usize),

    /// 连续失败步数达到预算；last 为最后一次失败
    #[error("aborted after {count} consecutive failed steps: {last}")]
    TooManyFailures { count: usize, last: Box<AgentError> },

    #[error("screen capture failed: {0}")]
    Perception(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    /// 模型回复不是合法决策
    #[error("no decision from model: {0}")]
    NoDecision(String),

    /// 重试耗尽或不可重试的模型调用失败
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// 任务内部出现未处理异常（panic）
    #[error("task crashed: {0}")]
    Crashed(String),
}

impl AgentError {
    /// 面向用户的失败原因（生命周期事件使用）
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Cancelled => "stopped by user".to_string(),
            AgentError::StepLimit(n) => format!("step limit reached ({n} steps)"),
            AgentError::TooManyFailures { count, last } => {
                format!("gave up after {count} failed steps: {}", last.user_message())
            }
            AgentError::Perception(_) => "could not read the screen".to_string(),
            AgentError::ActionFailed(_) => "an action on the device failed".to_string(),
            AgentError::NoDecision(_) => "the assistant could not understand the model's reply".to_string(),
            AgentError::ModelUnavailable(_) => "the language model is unavailable".to_string(),
            AgentError::Crashed(_) => "the task stopped because of an internal error".to_string(),
        }
    }
}

/// 编排器对外接口的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("instruction is empty")]
    EmptyInstruction,

    #[error("orchestrator has been shut down")]
    ShutDown,
}
