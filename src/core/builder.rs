//! 引擎构建器：由配置统一组装 LLM、设备协作方、记录存储与编排器
//!
//! 不使用全局单例：ScriptBridge 与 Orchestrator 都是显式的 Arc 实例，由调用方持有。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::agent::{AgentLoop, LoopSettings, TaskRunner, DEFAULT_SYSTEM_PROMPT};
use crate::bridge::{BridgeEvent, ScriptBridge, ScriptChannel};
use crate::config::AppConfig;
use crate::core::{EventSink, LogSink, Orchestrator, RetryPolicy};
use crate::device::{ActionExecutor, BridgeActionExecutor, BridgePerception, DryRunDevice, Perception};
use crate::llm::{BridgeLlmClient, Decider, LlmClient, MockLlmClient, OpenAiClient};
use crate::store::{MemoryStore, RecordStore, RecordWriter, SqliteStore, StoreError};

/// 构建失败
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("record store: {0}")]
    Store(#[from] StoreError),

    /// provider = "bridge" 但没有接入脚本运行时
    #[error("llm provider \"bridge\" requires an attached script runtime ([bridge] command)")]
    MissingRuntime,
}

/// 按配置选择 LLM 后端；openai 缺少 API key 时回退到 Mock，bridge 缺少运行时则报错
pub fn create_llm_from_config(
    cfg: &AppConfig,
    bridge: Option<&Arc<ScriptBridge>>,
) -> Result<Arc<dyn LlmClient>, BuildError> {
    let provider = cfg.llm.provider.to_lowercase();
    let llm: Arc<dyn LlmClient> = match provider.as_str() {
        "openai" if std::env::var("OPENAI_API_KEY").is_ok() => {
            tracing::info!(model = %cfg.llm.model, "using OpenAI LLM");
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            ))
        }
        "bridge" => {
            let bridge = bridge.ok_or(BuildError::MissingRuntime)?;
            tracing::info!(model = %cfg.llm.model, "using script runtime LLM");
            Arc::new(BridgeLlmClient::new(bridge.clone(), cfg.llm.model.clone()))
        }
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            tracing::warn!(provider = other, "no API key for provider, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    };
    Ok(llm)
}

/// 记录写入的退避策略：次数来自配置，间隔远小于 LLM 退避
fn write_policy(cfg: &AppConfig) -> RetryPolicy {
    RetryPolicy::new(
        cfg.store.write_attempts,
        Duration::from_millis(200),
        Duration::from_secs(2),
        2.0,
    )
}

pub struct PilotBuilder {
    config: AppConfig,
    bridge: Option<Arc<ScriptBridge>>,
    events: Arc<dyn EventSink>,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn RecordStore>>,
    device: Option<(Arc<dyn Perception>, Arc<dyn ActionExecutor>)>,
}

impl PilotBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            bridge: None,
            events: Arc::new(LogSink),
            llm: None,
            store: None,
            device: None,
        }
    }

    /// 接入脚本运行时：按 [bridge] 配置的超时创建桥并启动入站事件泵。
    /// 设备协作方与 provider = "bridge" 的 LLM 都走这座桥。需在 tokio 运行时内调用。
    pub fn with_runtime(
        mut self,
        channel: Arc<dyn ScriptChannel>,
        events: mpsc::Receiver<BridgeEvent>,
    ) -> Self {
        let bridge = ScriptBridge::new(channel, self.config.bridge.call_timeout());
        bridge.spawn_event_pump(events);
        self.bridge = Some(bridge);
        self
    }

    /// 已由 with_runtime 创建的桥
    pub fn bridge(&self) -> Option<&Arc<ScriptBridge>> {
        self.bridge.as_ref()
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// 覆盖按配置选择的 LLM（测试用）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_device(mut self, perception: Arc<dyn Perception>, executor: Arc<dyn ActionExecutor>) -> Self {
        self.device = Some((perception, executor));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_llm(&self) -> Result<Arc<dyn LlmClient>, BuildError> {
        match &self.llm {
            Some(llm) => Ok(llm.clone()),
            None => create_llm_from_config(&self.config, self.bridge.as_ref()),
        }
    }

    /// 配置了 path 用 SQLite，否则用内存存储
    pub fn build_store(&self) -> Result<Arc<dyn RecordStore>, StoreError> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        match &self.config.store.path {
            Some(path) => {
                tracing::info!(path = %path.display(), "opening sqlite record store");
                Ok(Arc::new(SqliteStore::open(path)?))
            }
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }

    pub fn build_settings(&self) -> LoopSettings {
        let app = &self.config.app;
        LoopSettings {
            max_steps: app.max_steps,
            max_consecutive_failures: app.max_consecutive_failures,
            history_limit: app.history_limit,
            system_prompt: app
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn build_runner(&self) -> Result<Arc<dyn TaskRunner>, BuildError> {
        let (perception, executor): (Arc<dyn Perception>, Arc<dyn ActionExecutor>) =
            match (&self.device, &self.bridge) {
                (Some((p, e)), _) => (p.clone(), e.clone()),
                (None, Some(bridge)) => {
                    let perception: Arc<dyn Perception> = Arc::new(BridgePerception::new(bridge.clone()));
                    let executor: Arc<dyn ActionExecutor> = Arc::new(BridgeActionExecutor::new(bridge.clone()));
                    (perception, executor)
                }
                (None, None) => {
                    tracing::info!("no script runtime attached, using dry-run device");
                    let device = Arc::new(DryRunDevice);
                    let perception: Arc<dyn Perception> = device.clone();
                    let executor: Arc<dyn ActionExecutor> = device;
                    (perception, executor)
                }
            };
        let decider = Decider::new(self.build_llm()?, self.config.llm.retry.policy());
        Ok(Arc::new(AgentLoop::new(perception, executor, decider, self.build_settings())))
    }

    /// 组装编排器；需在 tokio 运行时内调用（会启动记录写入 worker）
    pub fn build(self) -> Result<Arc<Orchestrator>, BuildError> {
        let runner = self.build_runner()?;
        let store = self.build_store()?;
        let writer = RecordWriter::spawn(store, write_policy(&self.config));
        let orchestrator = Orchestrator::new(runner, self.events.clone(), writer, self.bridge.clone());

        let retention = Duration::from_secs(self.config.store.retention_hours * 3600);
        orchestrator.prune_records(retention);
        Ok(orchestrator)
    }
}

/// 从配置文件创建构建器；配置加载失败时使用默认配置
pub fn create_pilot_builder(config_path: Option<PathBuf>) -> PilotBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });
    PilotBuilder::new(config)
}
