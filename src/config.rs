//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PILOT__*` 覆盖（双下划线表示嵌套，如 `PILOT__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [app] 段：Agent 循环的步数上限、连续失败预算、历史长度
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 连续失败（决策 / 感知 / 执行）达到此值时终止任务
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,
    /// 提示词中保留的最近动作条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 覆盖内置 system prompt
    pub system_prompt: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_consecutive_failures: default_max_consecutive_failures(),
            history_limit: default_history_limit(),
            system_prompt: None,
        }
    }
}

fn default_max_steps() -> usize {
    30
}

fn default_max_consecutive_failures() -> usize {
    3
}

fn default_history_limit() -> usize {
    12
}

/// [llm] 段：后端选择与重试策略
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / bridge / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            retry: RetrySection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [llm.retry] 段：指数退避参数
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.factor,
        )
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    16_000
}

fn default_factor() -> f64 {
    2.0
}

/// [bridge] 段：脚本运行时进程与单次桥接调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// 运行时可执行文件；设置后以子进程方式接入（stdin/stdout 上的 JSON 行）
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl BridgeSection {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            command: None,
            args: Vec::new(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    30
}

/// [store] 段：任务记录存储位置与保留策略
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// SQLite 文件路径；未设置时使用内存存储
    pub path: Option<PathBuf>,
    /// 已完成任务记录的保留时长（小时）
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// 单条记录写入的最大尝试次数
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,
    /// 连续多少条记录重试耗尽后按致命错误关闭进程
    #[serde(default = "default_fatal_write_failures")]
    pub fatal_write_failures: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: None,
            retention_hours: default_retention_hours(),
            write_attempts: default_write_attempts(),
            fatal_write_failures: default_fatal_write_failures(),
        }
    }
}

fn default_retention_hours() -> u64 {
    72
}

fn default_write_attempts() -> u32 {
    3
}

fn default_fatal_write_failures() -> u32 {
    5
}

/// 从 config 目录加载配置，环境变量 PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_llm_backoff() {
        let cfg = AppConfig::default();
        let policy = cfg.llm.retry.policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(16));
        assert_eq!(cfg.app.max_steps, 30);
        assert_eq!(cfg.bridge.call_timeout_secs, 30);
        assert!(cfg.store.path.is_none());
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pilot.toml");
        std::fs::write(
            &path,
            "[app]\nmax_steps = 5\n\n[llm]\nprovider = \"mock\"\n\n[llm.retry]\nmax_attempts = 2\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.app.max_steps, 5);
        assert_eq!(cfg.app.history_limit, 12);
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.retry.max_attempts, 2);
        assert_eq!(cfg.llm.retry.max_delay_ms, 16_000);
    }
}
