//! 子进程脚本运行时
//!
//! 每个 Submission 序列化为一行 JSON 写入子进程 stdin；子进程 stdout 上的每一行是一个 BridgeEvent。
//! stdout 关闭（进程退出）时事件流结束，ScriptBridge 的事件泵随即让所有未决调用失败。

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};

use crate::bridge::{BridgeEvent, ChannelError, ScriptChannel, Submission};

pub struct ProcessChannel {
    stdin: Mutex<ChildStdin>,
    _child: Child,
}

impl ProcessChannel {
    /// 启动运行时进程，返回提交通道与入站事件流
    pub fn spawn(
        program: &str,
        args: &[String],
    ) -> std::io::Result<(Self, mpsc::Receiver<BridgeEvent>)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("runtime stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("runtime stdout unavailable"))?;

        tracing::info!(program, pid = ?child.id(), "script runtime started");

        let (tx, rx) = mpsc::channel(64);
        let program = program.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<BridgeEvent>(&line) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(%program, error = %e, "unparseable runtime output line"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(%program, error = %e, "runtime stdout read failed");
                        break;
                    }
                }
            }
            tracing::info!(%program, "script runtime output closed");
        });

        Ok((
            Self {
                stdin: Mutex::new(stdin),
                _child: child,
            },
            rx,
        ))
    }
}

#[async_trait]
impl ScriptChannel for ProcessChannel {
    async fn submit(&self, submission: Submission) -> Result<(), ChannelError> {
        let mut line =
            serde_json::to_string(&submission).map_err(|e| ChannelError(e.to_string()))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ChannelError(format!("runtime stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ChannelError(format!("runtime stdin: {e}")))
    }
}
