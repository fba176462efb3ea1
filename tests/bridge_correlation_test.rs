//! 关联桥集成测试：乱序响应路由与通道拆除

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::future::join_all;
    use pilot::bridge::{BridgeError, BridgeEvent, MpscChannel, ScriptBridge};
    use rand::seq::SliceRandom;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_shuffled_responses_reach_their_callers() {
        const N: usize = 32;
        let (channel, mut submissions) = MpscChannel::new();
        let bridge = ScriptBridge::new(Arc::new(channel), Duration::from_secs(5));

        let calls = (0..N).map(|i| {
            let bridge = bridge.clone();
            tokio::spawn(async move { (i, bridge.call("echo", json!({ "n": i })).await) })
        });
        let calls = tokio::spawn(join_all(calls));

        let mut received = Vec::with_capacity(N);
        while received.len() < N {
            received.push(submissions.recv().await.unwrap());
        }
        received.shuffle(&mut rand::thread_rng());

        let (events_tx, events_rx) = mpsc::channel(N);
        let pump = bridge.spawn_event_pump(events_rx);
        for sub in received {
            events_tx
                .send(BridgeEvent::Result {
                    correlation_id: sub.correlation_id,
                    payload: json!({ "echo": sub.args["n"] }),
                    domain: Some("test".to_string()),
                })
                .await
                .unwrap();
        }

        for joined in calls.await.unwrap() {
            let (i, result) = joined.unwrap();
            assert_eq!(result.unwrap()["echo"], json!(i));
        }
        assert_eq!(bridge.pending_count(), 0);

        drop(events_tx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_fails_every_outstanding_call() {
        const K: usize = 5;
        let (channel, mut submissions) = MpscChannel::new();
        let bridge = ScriptBridge::new(Arc::new(channel), Duration::from_secs(30));

        let calls: Vec<_> = (0..K)
            .map(|i| {
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.call("screen.capture", json!({ "i": i })).await })
            })
            .collect();
        for _ in 0..K {
            submissions.recv().await.unwrap();
        }
        assert_eq!(bridge.pending_count(), K);

        let (events_tx, events_rx) = mpsc::channel::<BridgeEvent>(1);
        let pump = bridge.spawn_event_pump(events_rx);
        drop(events_tx);
        pump.await.unwrap();

        for call in calls {
            assert!(matches!(call.await.unwrap(), Err(BridgeError::ChannelClosed(_))));
        }
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_ignored() {
        let (channel, mut submissions) = MpscChannel::new();
        let bridge = ScriptBridge::new(Arc::new(channel), Duration::from_secs(2));

        let call = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("action.execute", json!({})).await }
        });
        let sub = submissions.recv().await.unwrap();

        assert!(matches!(call.await.unwrap(), Err(BridgeError::Timeout { .. })));
        assert_eq!(bridge.pending_count(), 0);
        assert!(!bridge.on_result(sub.correlation_id, json!("too late")));
    }
}
