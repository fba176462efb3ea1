//! 桥接协议：出站提交、入站事件与错误类型

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 关联 ID：在所有未完成调用中唯一（单调计数器）
pub type CorrelationId = u64;

/// 提交给脚本运行时的一次调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub operation: String,
    pub args: serde_json::Value,
    pub correlation_id: CorrelationId,
}

/// 脚本运行时回传的事件
///
/// domain 仅用于日志；路由只看 correlation_id。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Result {
        correlation_id: CorrelationId,
        payload: serde_json::Value,
        #[serde(default)]
        domain: Option<String>,
    },
    Error {
        correlation_id: CorrelationId,
        payload: serde_json::Value,
        #[serde(default)]
        domain: Option<String>,
    },
}

impl BridgeEvent {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            BridgeEvent::Result { correlation_id, .. } | BridgeEvent::Error { correlation_id, .. } => {
                *correlation_id
            }
        }
    }
}

/// 单次桥接调用的失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("call '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// 运行时返回了格式正确的错误负载
    #[error("runtime error: {0}")]
    Remote(String),

    /// 通道已拆除（服务解绑、运行时退出等）
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("submit failed: {0}")]
    Submit(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// 脚本运行时拒绝提交
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ChannelError(pub String);

/// 从错误负载中提取可读信息：字符串本身、{"message": ...} 或整段 JSON
pub(crate) fn error_message(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(error_message(&json!("boom")), "boom");
        assert_eq!(error_message(&json!({"message": "no service"})), "no service");
        assert_eq!(error_message(&json!({"code": 3})), r#"{"code":3}"#);
    }

    #[test]
    fn test_event_wire_format() {
        let ev: BridgeEvent = serde_json::from_value(json!({
            "type": "result",
            "correlation_id": 7,
            "payload": {"ok": true}
        }))
        .unwrap();
        assert_eq!(ev.correlation_id(), 7);
        assert!(matches!(ev, BridgeEvent::Result { domain: None, .. }));
    }
}
