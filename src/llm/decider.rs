//! Decider：把对话交给模型并解析出结构化决策
//!
//! 传输失败由退避重试处理；输出格式错误属于生产方错误，不在这一层重试。
//! decide 永不向外抛出：所有失败都转换为 None 并记录日志。

use std::sync::Arc;

use thiserror::Error;

use crate::agent::{parse_decision, Decision};
use crate::core::{retry_if, RetryError, RetryPolicy};
use crate::llm::{LlmClient, LlmError, Message};

/// 决策失败原因
#[derive(Error, Debug)]
pub enum DecideError {
    /// 重试耗尽或遇到不可重试的传输错误
    #[error("model unavailable: {0}")]
    Unavailable(#[from] RetryError<LlmError>),

    /// 回复不是合法的结构化输出
    #[error("malformed model output: {0}")]
    Malformed(String),
}

pub struct Decider {
    llm: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl Decider {
    pub fn new(llm: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { llm, policy }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 失败时返回 None，调用方决定是否重新提示
    pub async fn decide(&self, conversation: &[Message]) -> Option<Decision> {
        self.decide_detailed(conversation).await.ok()
    }

    pub async fn decide_detailed(&self, conversation: &[Message]) -> Result<Decision, DecideError> {
        let llm = &self.llm;
        let raw = retry_if(
            &self.policy,
            || llm.complete(conversation),
            LlmError::is_retryable,
        )
        .await
        .map_err(|e| {
            tracing::warn!(attempts = e.attempts(), error = %e, "model call failed");
            DecideError::from(e)
        })?;

        parse_decision(&raw).map_err(|reason| {
            tracing::warn!(%reason, "model reply is not a valid decision");
            DecideError::Malformed(reason)
        })
    }
}
