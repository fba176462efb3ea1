//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / 脚本运行时桥接 / Mock）实现 LlmClient::complete（非流式）。
//! LlmError 只描述传输与可用性失败；输出格式问题由 Decider 处理。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// 传输 / 可用性错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request timed out")]
    Timeout,

    #[error("model returned an empty reply")]
    Empty,
}

impl LlmError {
    /// 是否值得由退避重试处理
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::Api(_))
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回模型原始文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
