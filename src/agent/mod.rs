//! 执行层：决策结构、提示词组装、运行历史与 Agent 主循环

pub mod decision;
pub mod history;
pub mod loop_;
pub mod prompt;

pub use decision::{decision_schema, parse_decision, strip_formatting, Action, Decision};
pub use history::{ActionHistory, HistoryEntry};
pub use loop_::{AgentLoop, LoopOutcome, LoopSettings, TaskRunner};
pub use prompt::{build_conversation, DEFAULT_SYSTEM_PROMPT};
