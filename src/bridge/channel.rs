//! 脚本运行时通道抽象
//!
//! ScriptChannel 只负责把 Submission 送进外部运行时；结果由运行时异步回传给 ScriptBridge。

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bridge::{ChannelError, Submission};

/// 外部单线程执行通道
#[async_trait]
pub trait ScriptChannel: Send + Sync {
    async fn submit(&self, submission: Submission) -> Result<(), ChannelError>;
}

/// 把提交转发到 mpsc 队列，由宿主运行时在另一端按序取出执行
#[derive(Debug, Clone)]
pub struct MpscChannel {
    tx: mpsc::UnboundedSender<Submission>,
}

impl MpscChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Submission>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ScriptChannel for MpscChannel {
    async fn submit(&self, submission: Submission) -> Result<(), ChannelError> {
        self.tx
            .send(submission)
            .map_err(|_| ChannelError("script runtime is not attached".to_string()))
    }
}
