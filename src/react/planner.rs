//! Planner：拼装 system prompt、请求规划器、解析回复
//!
//! 回复协议：每一步只允许二选一
//! - `{"tool_call": {"name": "...", "arguments": {...}}}`
//! - `{"final_answer": "..."}`
//!
//! 允许外层包一个 ```json 代码块或前后带少量文字；除此之外一律视为协议错误，不做猜测修补。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{ConversationState, Message};
use crate::react::system_context::system_context;
use crate::tools::{planner_reply_schema_json, Catalog};

/// 内置 system prompt；可用 config/prompts/system.md 覆盖，占位符 {context}、{tools}、{schema}
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a desktop assistant that manages the user's macOS Calendar and Mail by calling tools, one step at a time.
{context}

Rules:
- Each reply is exactly ONE JSON object: either one tool call or the final answer. Never both, never several tool calls.
- After every tool call you will receive an observation with the result. Base your answer only on observations; never invent events, messages or ids.
- Empty results (no events, no messages) are a valid, complete answer. Report them instead of searching again.
- If an observation reports a validation problem, fix the arguments or ask the user for the missing information in a final answer.
- Dates use YYYY-MM-DD and times use YYYY-MM-DDTHH:MM in the user's local time. Resolve words like "tomorrow" against the current date above.
- Use only the tools listed below. Keep arguments minimal and rely on defaults.

Reply format (JSON Schema):
{schema}

Available tools:
{tools}
"#;

/// 规划器选定的工具调用
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// 解析后的规划器回复
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerReply {
    ToolCall(ToolCall),
    FinalAnswer(String),
}

#[derive(Deserialize)]
struct RawReply {
    tool_call: Option<ToolCall>,
    final_answer: Option<String>,
}

fn fenced_json() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

/// 从回复文本中取出 JSON 对象：优先 ```json 代码块，其次第一个 `{` 到最后一个 `}`
fn extract_json(output: &str) -> Option<&str> {
    if let Some(caps) = fenced_json().and_then(|re| re.captures(output)) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    (end > start).then(|| &output[start..=end])
}

pub fn parse_planner_reply(output: &str) -> Result<PlannerReply, AgentError> {
    let json = extract_json(output)
        .ok_or_else(|| AgentError::PlannerProtocol("no JSON object found in reply".to_string()))?;
    let raw: RawReply = serde_json::from_str(json)
        .map_err(|e| AgentError::PlannerProtocol(format!("invalid reply JSON: {e}")))?;

    match (raw.tool_call, raw.final_answer) {
        (Some(call), None) => {
            if call.name.trim().is_empty() {
                return Err(AgentError::PlannerProtocol(
                    "tool_call.name is empty".to_string(),
                ));
            }
            Ok(PlannerReply::ToolCall(call))
        }
        (None, Some(text)) => Ok(PlannerReply::FinalAnswer(text)),
        (Some(_), Some(_)) => Err(AgentError::PlannerProtocol(
            "reply contains both tool_call and final_answer".to_string(),
        )),
        (None, None) => Err(AgentError::PlannerProtocol(
            "reply contains neither tool_call nor final_answer".to_string(),
        )),
    }
}

/// 读取 system prompt 模板：config/prompts/system.md 存在则用之，否则用内置模板
pub fn load_system_prompt_template() -> String {
    for path in ["config/prompts/system.md", "../config/prompts/system.md"] {
        if let Ok(text) = std::fs::read_to_string(path) {
            if !text.trim().is_empty() {
                tracing::info!(path, "using custom planner prompt");
                return text;
            }
        }
    }
    DEFAULT_SYSTEM_PROMPT.to_string()
}

/// Planner：持有 LLM 与 prompt 模板，每步把整个会话状态发给规划器
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    template: String,
    tools_json: String,
    schema_json: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, template: impl Into<String>, catalog: &Catalog) -> Self {
        Self {
            llm,
            template: template.into(),
            tools_json: catalog.to_schema_json(),
            schema_json: planner_reply_schema_json(),
        }
    }

    /// 用内置模板构造
    pub fn with_default_prompt(llm: Arc<dyn LlmClient>, catalog: &Catalog) -> Self {
        Self::new(llm, DEFAULT_SYSTEM_PROMPT, catalog)
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub fn render_system_prompt(&self, context: &str) -> String {
        self.template
            .replace("{context}", context)
            .replace("{schema}", &self.schema_json)
            .replace("{tools}", &self.tools_json)
    }

    /// 请求一次规划；返回规划器原始回复文本
    pub async fn plan(&self, state: &ConversationState) -> Result<String, AgentError> {
        let mut messages = vec![Message::system(self.render_system_prompt(&system_context()))];
        messages.extend(state.to_llm_messages());
        Ok(self.llm.complete(&messages).await?)
    }
}
