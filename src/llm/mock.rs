//! Mock LLM 客户端（用于测试与 dry-run，无需 API）
//!
//! 按顺序返回预置回复；预置用完后回复一个 done 决策，保证任务能够结束。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

const FALLBACK_REPLY: &str = r#"{"thought": "nothing left to do", "done": true, "result": "done"}"#;

/// 脚本化 Mock：每次 complete 弹出一条预置结果
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for r in replies {
            mock.push_reply(r);
        }
        mock
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.queue().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, err: LlmError) {
        self.queue().push_back(Err(err));
    }

    /// 已收到的 complete 调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue()
            .pop_front()
            .unwrap_or_else(|| Ok(FALLBACK_REPLY.to_string()))
    }
}
