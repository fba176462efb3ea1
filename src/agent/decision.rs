//! 决策：模型每一步输出的结构化下一动作（或 done 终止标记）
//!
//! parse_decision 先清理代码围栏与前后文字，再按 Decision 结构反序列化并校验；
//! 任何不是合法结构化输出的文本都是该次尝试的硬失败，不会被当作部分决策。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 设备动作（坐标为屏幕像素）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Tap {
        x: i32,
        y: i32,
    },
    /// 点击场景描述中的某个元素
    TapElement {
        element_id: String,
    },
    LongPress {
        x: i32,
        y: i32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    TypeText {
        text: String,
    },
    LaunchApp {
        package: String,
    },
    Back,
    Home,
    Wait {
        millis: u64,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Tap { x, y } => write!(f, "tap ({x}, {y})"),
            Action::TapElement { element_id } => write!(f, "tap element {element_id}"),
            Action::LongPress { x, y } => write!(f, "long press ({x}, {y})"),
            Action::Swipe { x1, y1, x2, y2, .. } => {
                write!(f, "swipe ({x1}, {y1}) -> ({x2}, {y2})")
            }
            Action::TypeText { text } => write!(f, "type \"{text}\""),
            Action::LaunchApp { package } => write!(f, "launch {package}"),
            Action::Back => write!(f, "back"),
            Action::Home => write!(f, "home"),
            Action::Wait { millis } => write!(f, "wait {millis}ms"),
        }
    }
}

/// 单步决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    /// 模型的简短推理
    #[serde(default)]
    pub thought: Option<String>,
    /// 下一步要执行的动作
    #[serde(default)]
    pub action: Option<Action>,
    /// 任务是否已完成
    #[serde(default)]
    pub done: bool,
    /// 完成时给用户的结论
    #[serde(default)]
    pub result: Option<String>,
}

impl Decision {
    pub fn act(action: Action) -> Self {
        Self {
            thought: None,
            action: Some(action),
            done: false,
            result: None,
        }
    }

    pub fn finish(result: impl Into<String>) -> Self {
        Self {
            thought: None,
            action: None,
            done: true,
            result: Some(result.into()),
        }
    }
}

/// Decision 的 JSON Schema（写入 system prompt）
pub fn decision_schema() -> String {
    let schema = schemars::schema_for!(Decision);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)\s*```").expect("static regex is valid")
    })
}

/// 去掉 ```json ... ``` 围栏与 JSON 对象之外的文字
pub fn strip_formatting(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = match fence_regex().captures(trimmed).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => trimmed.trim_start_matches("```").trim_end_matches("```").trim(),
    };
    match (inner.find('{'), inner.rfind('}')) {
        (Some(start), Some(end)) if start < end => &inner[start..=end],
        _ => inner,
    }
}

/// 解析模型原始输出；失败时返回可读原因
pub fn parse_decision(raw: &str) -> Result<Decision, String> {
    let json = strip_formatting(raw);
    let decision: Decision =
        serde_json::from_str(json).map_err(|e| format!("{}: {}", e, preview(json)))?;
    if decision.action.is_none() && !decision.done {
        return Err("decision has neither an action nor done=true".to_string());
    }
    Ok(decision)
}

fn preview(s: &str) -> String {
    const MAX: usize = 120;
    if s.chars().count() > MAX {
        format!("{}...", s.chars().take(MAX).collect::<String>())
    } else {
        s.to_string()
    }
}
