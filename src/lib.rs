//! Pilot - 移动端助手任务编排引擎
//!
//! 模块划分：
//! - **agent**: 决策结构、提示词组装、运行历史与 Agent 主循环
//! - **bridge**: 关联 ID 多路复用的脚本运行时桥
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务模型、退避重试、事件、任务队列编排、构建与关闭
//! - **device**: 屏幕感知与动作执行抽象
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 脚本运行时 / Mock）
//! - **observability**: 日志初始化
//! - **store**: 任务记录存储与后台写入

pub mod agent;
pub mod bridge;
pub mod config;
pub mod core;
pub mod device;
pub mod llm;
pub mod observability;
pub mod store;

pub use crate::core::{Orchestrator, PilotBuilder};
