//! ExecutionResult：每次 Operation 调用恰好产生一个，创建后不再修改
//!
//! 所有失败路径都返回带类型的 Failure，而不是向上抛出；Orchestrator 把它原样写成 observation。

use serde::Serialize;
use serde_json::Value;

/// 失败分类（与 observation 中的 kind 字段一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 工具参数缺失 / 类型错误 / 未知参数
    Validation,
    /// Catalog 与 Bridge 不匹配（不支持的 target/action 组合）
    UnsupportedOperation,
    /// 自动化运行时未在超时内返回
    Timeout,
    /// 目标应用报告失败（非零退出码或 stderr）
    AutomationError,
    /// 输出形状与预期不符
    ParseError,
    /// Planner 回复无法解析
    PlannerProtocolError,
    /// 单轮规划步数超过上限
    StepLimitExceeded,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::UnsupportedOperation => "unsupported_operation",
            FailureKind::Timeout => "timeout",
            FailureKind::AutomationError => "automation_error",
            FailureKind::ParseError => "parse_error",
            FailureKind::PlannerProtocolError => "planner_protocol_error",
            FailureKind::StepLimitExceeded => "step_limit_exceeded",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// 仅 ParseError 携带，便于 Planner 与人工排查
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_output: None,
        }
    }

    pub fn parse_error(message: impl Into<String>, raw_output: &str) -> Self {
        Self {
            kind: FailureKind::ParseError,
            message: message.into(),
            raw_output: Some(raw_output.to_string()),
        }
    }
}

/// 单条记录（字段名 -> 值）
pub type Record = serde_json::Map<String, Value>;

/// 成功结果的载荷：记录列表、单条记录或计数
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    List(Vec<Record>),
    Single(Record),
    Count(u64),
}

impl Payload {
    /// 供 tool_result 事件展示的一行摘要
    pub fn summary(&self) -> String {
        match self {
            Payload::List(items) if items.is_empty() => "no results".to_string(),
            Payload::List(items) if items.len() == 1 => "1 result".to_string(),
            Payload::List(items) => format!("{} results", items.len()),
            Payload::Single(record) => record
                .iter()
                .take(3)
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{k}={s}"),
                    other => format!("{k}={other}"),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Payload::Count(n) => format!("count={n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { payload: Payload },
    Failure(Failure),
}

impl ExecutionResult {
    pub fn success(payload: Payload) -> Self {
        ExecutionResult::Success { payload }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ExecutionResult::Failure(Failure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExecutionResult::Failure(f) => Some(f.kind),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            ExecutionResult::Success { payload } => Some(payload),
            _ => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ExecutionResult::Success { payload } => payload.summary(),
            ExecutionResult::Failure(f) => format!("{}: {}", f.kind, f.message),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "status": "failure", "kind": "parse_error", "message": e.to_string() })
        })
    }
}

impl From<Failure> for ExecutionResult {
    fn from(f: Failure) -> Self {
        ExecutionResult::Failure(f)
    }
}
