//! 关联式异步桥：在单条共享的脚本运行时通道上多路复用请求与响应
//!
//! 桥不理解 operation 的含义，只按关联 ID 把唯一的响应交给唯一的调用方。

pub mod channel;
pub mod multiplexer;
pub mod process;
pub mod protocol;

pub use channel::{MpscChannel, ScriptChannel};
pub use multiplexer::ScriptBridge;
pub use process::ProcessChannel;
pub use protocol::{BridgeError, BridgeEvent, ChannelError, CorrelationId, Submission};
