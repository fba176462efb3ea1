//! 核心编排层：任务模型、退避重试、生命周期事件、任务队列编排、构建与关闭

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod task;

pub use builder::{create_llm_from_config, create_pilot_builder, BuildError, PilotBuilder};
pub use error::{AgentError, OrchestratorError};
pub use events::{BroadcastSink, EventSink, FanoutSink, LogSink, TaskEvent, TaskEventKind};
pub use orchestrator::Orchestrator;
pub use retry::{retry, retry_if, RetryError, RetryPolicy};
pub use shutdown::{escalate_store_failures, run_with_graceful_shutdown, ShutdownManager, ShutdownReason};
pub use state::{OrchestratorPhase, OrchestratorSnapshot};
pub use task::{Task, TaskId, TaskRecord, TaskStatus, TASK_RECORD_PREFIX};
