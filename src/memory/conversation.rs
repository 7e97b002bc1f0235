//! 会话状态：按顺序追加的对话轮次
//!
//! 一个会话内只追加不修改；新会话从空序列开始。每次规划前整体渲染成 LLM 消息列表。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 会话中的一轮
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User { text: String },
    /// 规划器决定调用的工具
    ToolCall { name: String, arguments: Value },
    /// 工具调用的结果（成功或失败），下一次规划前必须已追加
    Observation { tool: String, result: Value },
    /// 规划器回复无法解析：保留原文，result 为 planner_protocol_error 失败（含纠正提示 hint）
    Correction { reply: String, result: Value },
    Answer { text: String },
}

#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Turn::User { text: text.into() });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 渲染为 LLM 消息：工具调用以规划器自己的 JSON 格式作为 assistant 消息，observation 作为 user 消息
    pub fn to_llm_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .flat_map(|turn| match turn {
                Turn::User { text } => vec![Message::user(text.clone())],
                Turn::ToolCall { name, arguments } => vec![Message::assistant(
                    serde_json::json!({ "tool_call": { "name": name, "arguments": arguments } })
                        .to_string(),
                )],
                Turn::Observation { tool, result } => {
                    vec![Message::user(format!("Observation from {tool}: {result}"))]
                }
                Turn::Correction { reply, result } => vec![
                    Message::assistant(reply.clone()),
                    Message::user(format!("Observation from planner: {result}")),
                ],
                Turn::Answer { text } => vec![Message::assistant(
                    serde_json::json!({ "final_answer": text }).to_string(),
                )],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_order_and_rendering() {
        let mut state = ConversationState::new();
        state.push_user("What's on today?");
        state.push(Turn::ToolCall {
            name: "list_events".into(),
            arguments: json!({}),
        });
        state.push(Turn::Observation {
            tool: "list_events".into(),
            result: json!({"status": "success", "payload": []}),
        });
        state.push(Turn::Answer {
            text: "Nothing scheduled.".into(),
        });

        let messages = state.to_llm_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], Message::user("What's on today?"));
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.contains("\"tool_call\""));
        assert!(messages[2].content.starts_with("Observation from list_events:"));
        assert!(messages[3].content.contains("Nothing scheduled."));
    }

    #[test]
    fn test_correction_renders_two_messages() {
        let mut state = ConversationState::new();
        state.push(Turn::Correction {
            reply: "sure thing".into(),
            result: json!({"status": "failure", "kind": "planner_protocol_error", "hint": "reply with JSON"}),
        });
        let messages = state.to_llm_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::assistant("sure thing"));
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content.starts_with("Observation from planner: "));
        assert!(messages[1].content.contains(r#""kind":"planner_protocol_error""#));
    }
}
