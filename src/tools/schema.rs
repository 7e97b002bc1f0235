//! 规划器回复格式的 JSON Schema（schemars 生成）
//!
//! 注入 system prompt，约束规划器每一步只输出一个工具调用或最终回答。

use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};

/// 规划器回复：二选一（仅用于 Schema 生成，实际解析见 react::planner）
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(untagged)]
enum PlannerReplyFormat {
    ToolCall {
        /// 本步要调用的唯一一个工具
        tool_call: ToolCallFormat,
    },
    FinalAnswer {
        /// 给用户的最终回答
        final_answer: String,
    },
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 list_events、create_event、search_mail
    name: String,
    /// 工具参数，键为参数名
    arguments: BTreeMap<String, serde_json::Value>,
}

/// 返回规划器回复格式的 JSON Schema 字符串，可拼入 system prompt
pub fn planner_reply_schema_json() -> String {
    let schema = schema_for!(PlannerReplyFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
