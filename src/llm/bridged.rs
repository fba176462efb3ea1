//! 经由脚本运行时桥接的 LLM 客户端
//!
//! 运行时持有凭据与网络栈；这里只把消息交给 `llm.generate` 操作并读取回复中的 text。
//! 回复既不是字符串也没有 text 字段时视为协议不匹配（Decode，不重试）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::bridge::{BridgeError, ScriptBridge};
use crate::llm::{LlmClient, LlmError, Message};

pub const GENERATE_OPERATION: &str = "llm.generate";

pub struct BridgeLlmClient {
    bridge: Arc<ScriptBridge>,
    model: String,
}

impl BridgeLlmClient {
    pub fn new(bridge: Arc<ScriptBridge>, model: impl Into<String>) -> Self {
        Self {
            bridge,
            model: model.into(),
        }
    }
}

impl From<BridgeError> for LlmError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Timeout { .. } => LlmError::Timeout,
            BridgeError::ChannelClosed(msg)
            | BridgeError::Submit(msg)
            | BridgeError::Remote(msg) => LlmError::Transport(msg),
            BridgeError::Decode(msg) => LlmError::Api(msg),
        }
    }
}

#[async_trait]
impl LlmClient for BridgeLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let reply = self
            .bridge
            .call(
                GENERATE_OPERATION,
                json!({ "model": self.model, "messages": messages }),
            )
            .await?;

        let text = match &reply {
            serde_json::Value::String(s) => s.clone(),
            other => other
                .get("text")
                .and_then(|t| t.as_str())
                .map(str::to_string)
                .ok_or_else(|| BridgeError::Decode(format!("no text in {GENERATE_OPERATION} reply")))?,
        };
        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text)
    }
}
