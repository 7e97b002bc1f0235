//! 逐步执行过程事件：供命令行与 Web 前端展示规划、工具调用、结果与最终回答

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON，Web 端按 NDJSON 逐行推送）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 当前是本轮第几步规划
    StepUpdate { step: usize, max_steps: usize },
    /// 正在请求规划器
    Thinking,
    /// 规划器选定了一个工具调用
    ToolInvoked {
        name: String,
        args: serde_json::Value,
    },
    /// 工具调用结束（成功或失败）
    ToolResult {
        name: String,
        ok: bool,
        summary: String,
    },
    /// 自动恢复动作（重试超时的只读操作 / 纠正规划器回复格式）
    Recovery { action: String, detail: String },
    /// 本轮的最终回答
    FinalAnswer { text: String },
    /// Token 使用统计（累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// 本轮以错误结束
    Error { kind: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let ev = ReactEvent::ToolResult {
            name: "list_events".into(),
            ok: true,
            summary: "no results".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["ok"], true);

        let v = serde_json::to_value(ReactEvent::Thinking).unwrap();
        assert_eq!(v, serde_json::json!({"type": "thinking"}));
    }
}
