//! 提示词组装：system（含决策 schema）+ 任务指令 + 运行历史 + 当前屏幕

use crate::agent::{decision_schema, ActionHistory};
use crate::device::SceneDescription;
use crate::llm::Message;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You operate an Android phone on behalf of the user. \
Each turn you receive the task, the actions taken so far and the current screen. \
Reply with exactly one JSON object and nothing else. \
Set \"action\" to the single next action, or set \"done\" to true with a short \"result\" once the task is finished.";

/// 组装单步对话；hint 为上一轮格式错误时的纠正提示
pub fn build_conversation(
    system_prompt: &str,
    instruction: &str,
    history: &ActionHistory,
    scene: &SceneDescription,
    hint: Option<&str>,
) -> Vec<Message> {
    let system = format!(
        "{}\n\nDecision JSON schema:\n{}",
        system_prompt,
        decision_schema()
    );

    let history_block = if history.is_empty() {
        "(no actions yet)".to_string()
    } else {
        history.render()
    };

    let mut user = format!(
        "Task: {}\n\nActions so far:\n{}\n\nCurrent screen:\n{}",
        instruction,
        history_block,
        scene.to_prompt()
    );
    if let Some(hint) = hint {
        user.push_str("\n\nNote: ");
        user.push_str(hint);
    }

    vec![Message::system(system), Message::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_conversation_carries_task_history_and_hint() {
        let mut history = ActionHistory::new(4);
        history.push(1, "tap (1, 2) -> ok", true);
        let scene = SceneDescription {
            app: Some("com.example".into()),
            ..Default::default()
        };

        let msgs = build_conversation(
            DEFAULT_SYSTEM_PROMPT,
            "turn on wifi",
            &history,
            &scene,
            Some("reply with JSON only"),
        );
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("schema"));
        assert!(msgs[1].content.contains("turn on wifi"));
        assert!(msgs[1].content.contains("1. [ok] tap (1, 2)"));
        assert!(msgs[1].content.contains("com.example"));
        assert!(msgs[1].content.ends_with("reply with JSON only"));
    }
}
