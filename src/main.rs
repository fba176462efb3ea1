//! Pilot - 移动端助手任务编排引擎
//!
//! 入口：初始化日志、加载配置、组装编排器，从 stdin 逐行读取指令并入队。
//! 控制命令：`:stop` 停止当前任务与出队，`:resume` 继续，`:status` 打印状态快照。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pilot::bridge::ProcessChannel;
use pilot::core::{
    create_pilot_builder, escalate_store_failures, run_with_graceful_shutdown, BroadcastSink,
    FanoutSink, LogSink, Orchestrator, ShutdownManager,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pilot::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let broadcast = Arc::new(BroadcastSink::new(256));
    let events = FanoutSink::new()
        .with(Arc::new(LogSink))
        .with(broadcast.clone());

    let mut builder = create_pilot_builder(config_path).with_events(Arc::new(events));
    if let Some(command) = builder.config().bridge.command.clone() {
        let args = builder.config().bridge.args.clone();
        let (channel, runtime_events) = ProcessChannel::spawn(&command, &args)
            .with_context(|| format!("Failed to start script runtime `{command}`"))?;
        builder = builder.with_runtime(Arc::new(channel), runtime_events);
    }
    let fatal_write_failures = builder.config().store.fatal_write_failures;
    let orchestrator = builder.build().context("Failed to build orchestrator")?;

    // 生命周期事件以 JSON 行输出到 stdout
    let mut rx = broadcast.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
        }
    });

    let shutdown = Arc::new(ShutdownManager::new());
    escalate_store_failures(
        shutdown.clone(),
        orchestrator.writer().health(),
        fatal_write_failures,
    );
    let input = read_instructions(orchestrator.clone());
    run_with_graceful_shutdown(shutdown, orchestrator, Duration::from_secs(10), async {
        if let Err(e) = input.await {
            tracing::error!(error = %e, "stdin read failed");
        }
    })
    .await;

    Ok(())
}

async fn read_instructions(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let line = line.trim();
        match line {
            "" => continue,
            ":stop" => orchestrator.request_stop(),
            ":resume" => orchestrator.resume(),
            ":status" => {
                let snapshot = orchestrator.snapshot();
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            instruction => match orchestrator.enqueue(instruction) {
                Ok(id) => tracing::debug!(task_id = %id, "accepted"),
                Err(e) => tracing::warn!(error = %e, "instruction rejected"),
            },
        }
    }
    Ok(())
}
