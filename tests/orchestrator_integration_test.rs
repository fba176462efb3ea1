//! 端到端集成测试：编排器 + Agent 循环 + 脚本运行时桥（模拟运行时）

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use pilot::bridge::{BridgeEvent, MpscChannel, Submission};
    use pilot::config::AppConfig;
    use pilot::core::{BroadcastSink, PilotBuilder, TaskEventKind, TaskStatus};
    use pilot::llm::MockLlmClient;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    const TAP: &str = r#"{"thought": "open it", "action": {"type": "tap", "x": 10, "y": 20}}"#;
    const DONE: &str = r#"```json
{"thought": "finished", "done": true, "result": "wifi is on"}
```"#;

    /// 模拟脚本运行时：应答截屏、执行动作与 LLM 生成请求
    fn spawn_fake_runtime(
        mut submissions: mpsc::UnboundedReceiver<Submission>,
        events: mpsc::Sender<BridgeEvent>,
        actions: Arc<AtomicUsize>,
    ) {
        tokio::spawn(async move {
            while let Some(sub) = submissions.recv().await {
                let payload = match sub.operation.as_str() {
                    "screen.capture" => json!({ "app": "com.android.settings", "elements": [] }),
                    "action.execute" => {
                        actions.fetch_add(1, Ordering::SeqCst);
                        json!({ "success": true, "message": "ok" })
                    }
                    "llm.generate" => {
                        let prompt = sub.args["messages"][1]["content"].as_str().unwrap_or_default();
                        let reply = if prompt.contains("(no actions yet)") { TAP } else { DONE };
                        json!({ "text": reply })
                    }
                    _ => Value::Null,
                };
                let event = BridgeEvent::Result {
                    correlation_id: sub.correlation_id,
                    payload,
                    domain: None,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.provider = "bridge".into();
        config.bridge.call_timeout_secs = 5;
        config
    }

    #[tokio::test]
    async fn test_tasks_run_through_script_runtime() {
        let (channel, submissions) = MpscChannel::new();
        let (events_tx, events_rx) = mpsc::channel(16);
        let actions = Arc::new(AtomicUsize::new(0));
        spawn_fake_runtime(submissions, events_tx, actions.clone());

        let sink = Arc::new(BroadcastSink::new(64));
        let mut lifecycle = sink.subscribe();
        let builder = PilotBuilder::new(config())
            .with_runtime(Arc::new(channel), events_rx)
            .with_events(sink.clone());
        let bridge = builder.bridge().cloned().unwrap();
        let orchestrator = builder.build().unwrap();

        let first = orchestrator.enqueue("turn on wifi").unwrap();
        let second = orchestrator.enqueue("turn on bluetooth").unwrap();
        orchestrator.wait_idle().await;

        let records = orchestrator.records().await.unwrap();
        assert_eq!(records.len(), 4);
        for id in [&first, &second] {
            let finished = records
                .iter()
                .find(|r| &r.task.id == id && r.status.is_terminal())
                .unwrap();
            assert_eq!(finished.status, TaskStatus::Completed);
            assert_eq!(finished.steps, Some(2));
        }
        assert_eq!(actions.load(Ordering::SeqCst), 2);

        let mut completed = Vec::new();
        while let Ok(event) = lifecycle.try_recv() {
            if event.kind == TaskEventKind::Completed {
                completed.push(event.message);
            }
        }
        assert_eq!(completed, vec!["wifi is on".to_string(), "wifi is on".to_string()]);

        orchestrator.shutdown().await;
        assert!(bridge.is_closed());
    }

    #[tokio::test]
    async fn test_unparseable_model_output_fails_task_and_queue_continues() {
        let llm = Arc::new(MockLlmClient::with_replies(["not json", "still not json", "nope"]));
        let mut config = AppConfig::default();
        config.app.max_consecutive_failures = 3;
        let orchestrator = PilotBuilder::new(config)
            .with_llm(llm.clone())
            .build()
            .unwrap();

        let broken = orchestrator.enqueue("book a table").unwrap();
        let fine = orchestrator.enqueue("open camera").unwrap();
        orchestrator.wait_idle().await;

        let records = orchestrator.records().await.unwrap();
        let terminal = |id: &str| {
            records
                .iter()
                .find(|r| r.task.id == id && r.status.is_terminal())
                .cloned()
                .unwrap()
        };
        assert_eq!(terminal(&broken).success, Some(false));
        assert!(terminal(&broken)
            .error_message
            .unwrap()
            .contains("consecutive"));
        assert_eq!(terminal(&fine).success, Some(true));
        // 三次格式错误各调用一次，第二个任务用兜底 done 回复
        assert_eq!(llm.calls(), 4);
    }

    #[tokio::test]
    async fn test_stop_then_resume_drains_queue() {
        let orchestrator = PilotBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient::new()))
            .build()
            .unwrap();

        orchestrator.request_stop();
        orchestrator.enqueue("first").unwrap();
        orchestrator.enqueue("second").unwrap();
        assert!(!orchestrator.is_running());
        assert_eq!(orchestrator.pending().len(), 2);

        orchestrator.resume();
        orchestrator.wait_idle().await;
        assert!(orchestrator.pending().is_empty());

        let records = orchestrator.records().await.unwrap();
        assert_eq!(records.iter().filter(|r| r.success == Some(true)).count(), 2);
    }
}
