//! 设备协作方：屏幕感知与动作执行
//!
//! 引擎只依赖这里的契约。真实实现通常位于脚本运行时一侧，
//! BridgePerception / BridgeActionExecutor 通过 ScriptBridge 调用它们；
//! DryRunDevice 用于没有设备时在本地跑通流程。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::agent::Action;
use crate::bridge::{BridgeError, ScriptBridge};

pub const CAPTURE_OPERATION: &str = "screen.capture";
pub const EXECUTE_OPERATION: &str = "action.execute";

/// 屏幕上的一个语义元素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub kind: String,
    /// [left, top, right, bottom]
    #[serde(default)]
    pub bounds: Option<[i32; 4]>,
}

/// 当前屏幕的结构化快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub elements: Vec<UiElement>,
    /// 感知子系统附带的原始描述
    #[serde(default)]
    pub raw: Option<String>,
}

impl SceneDescription {
    /// 写入提示词的紧凑 JSON
    pub fn to_prompt(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("perception unavailable: {0}")]
    Unavailable(String),

    #[error("invalid scene: {0}")]
    InvalidScene(String),
}

#[async_trait]
pub trait Perception: Send + Sync {
    async fn capture(&self) -> Result<SceneDescription, DeviceError>;
}

/// 执行失败以 ActionResult::failed 报告，不静默吞掉
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action) -> ActionResult;
}

pub struct BridgePerception {
    bridge: Arc<ScriptBridge>,
}

impl BridgePerception {
    pub fn new(bridge: Arc<ScriptBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Perception for BridgePerception {
    async fn capture(&self) -> Result<SceneDescription, DeviceError> {
        let value = self
            .bridge
            .call(CAPTURE_OPERATION, json!({}))
            .await
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| DeviceError::InvalidScene(e.to_string()))
    }
}

pub struct BridgeActionExecutor {
    bridge: Arc<ScriptBridge>,
}

impl BridgeActionExecutor {
    pub fn new(bridge: Arc<ScriptBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionExecutor for BridgeActionExecutor {
    async fn execute(&self, action: &Action) -> ActionResult {
        let args = match serde_json::to_value(action) {
            Ok(v) => v,
            Err(e) => return ActionResult::failed(format!("cannot encode action: {e}")),
        };
        match self.bridge.call(EXECUTE_OPERATION, args).await {
            Ok(value) => serde_json::from_value(value.clone())
                .unwrap_or_else(|_| ActionResult::ok(value.to_string())),
            Err(BridgeError::Remote(msg)) => ActionResult::failed(msg),
            Err(e) => ActionResult::failed(e.to_string()),
        }
    }
}

/// 无设备时使用：固定场景，动作只写日志
#[derive(Debug, Default)]
pub struct DryRunDevice;

#[async_trait]
impl Perception for DryRunDevice {
    async fn capture(&self) -> Result<SceneDescription, DeviceError> {
        Ok(SceneDescription {
            app: Some("launcher".to_string()),
            elements: vec![UiElement {
                id: "search".to_string(),
                text: Some("Search".to_string()),
                kind: "edit_text".to_string(),
                bounds: Some([40, 120, 1040, 220]),
            }],
            raw: None,
        })
    }
}

#[async_trait]
impl ActionExecutor for DryRunDevice {
    async fn execute(&self, action: &Action) -> ActionResult {
        tracing::info!(%action, "dry-run action");
        ActionResult::ok(format!("dry-run: {action}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MpscChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bridge_collaborators_use_their_operations() {
        let (channel, mut runtime) = MpscChannel::new();
        let bridge = ScriptBridge::new(Arc::new(channel), Duration::from_secs(5));
        let perception = BridgePerception::new(bridge.clone());
        let executor = BridgeActionExecutor::new(bridge.clone());

        let runtime_side = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let sub = runtime.recv().await.unwrap();
                assert_eq!(sub.operation, CAPTURE_OPERATION);
                bridge.on_result(
                    sub.correlation_id,
                    json!({"app": "com.android.settings", "elements": [{"id": "wifi", "text": "Wi-Fi", "kind": "switch"}]}),
                );

                let sub = runtime.recv().await.unwrap();
                assert_eq!(sub.operation, EXECUTE_OPERATION);
                assert_eq!(sub.args["type"], "tap_element");
                bridge.on_error(sub.correlation_id, json!("element not visible"));
            })
        };

        let scene = perception.capture().await.unwrap();
        assert_eq!(scene.elements[0].id, "wifi");

        let result = executor
            .execute(&Action::TapElement {
                element_id: "wifi".to_string(),
            })
            .await;
        assert!(!result.success);
        assert_eq!(result.message, "element not visible");
        runtime_side.await.unwrap();
    }

    #[tokio::test]
    async fn test_dry_run_always_succeeds() {
        let device = DryRunDevice;
        assert!(device.capture().await.unwrap().app.is_some());
        assert!(device.execute(&Action::Home).await.success);
    }
}
