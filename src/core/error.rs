//! Agent 错误类型与恢复动作
//!
//! 工具层面的失败（校验、超时、自动化错误……）都以 observation 形式交给规划器，不在这里出现；
//! AgentError 只描述会结束当前这一轮的情况。

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 规划器后端不可用（网络 / API / 超时）
    #[error("planner unavailable: {0}")]
    PlannerUnavailable(#[from] LlmError),

    /// 规划器回复无法解析
    #[error("planner protocol error: {0}")]
    PlannerProtocol(String),

    #[error("step limit exceeded: no final answer after {0} planning steps")]
    StepLimitExceeded(usize),

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 事件与日志中使用的错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::PlannerUnavailable(_) => "planner_unavailable",
            AgentError::PlannerProtocol(_) => "planner_protocol_error",
            AgentError::StepLimitExceeded(_) => "step_limit_exceeded",
            AgentError::Cancelled => "cancelled",
            AgentError::ConfigError(_) => "config_error",
        }
    }
}

/// 恢复引擎给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 立即重新执行同一个 Operation
    RetryOperation,
    /// 把结果写成 observation，回到规划
    Observe,
    /// 把提示注入下一轮，让规划器重试
    RetryWithPrompt(String),
    /// 结束当前这一轮
    Abort,
}
