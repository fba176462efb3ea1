//! LLM 层：客户端抽象与实现（OpenAI 兼容 / 脚本运行时桥接 / Mock）与决策解析

pub mod bridged;
pub mod decider;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use bridged::BridgeLlmClient;
pub use decider::{DecideError, Decider};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};
