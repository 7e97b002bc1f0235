//! 错误恢复引擎
//!
//! 集中决定什么时候自动重试：
//! - 只读动作超时：立即重试一次
//! - 有副作用的动作（创建 / 删除 / 发送 / 回复）超时：不重试，结果可能已经生效
//! - 其余工具失败：交给规划器决定
//! - 规划器回复格式错误：带纠正提示重新规划一次，连续第二次则结束本轮

use crate::bridge::{Action, FailureKind};
use crate::core::{AgentError, RecoveryAction};

/// 同一个 Operation 最多执行几次（含第一次）
pub const MAX_OPERATION_ATTEMPTS: u32 = 2;

/// 连续几次协议错误后结束本轮
pub const MAX_CONSECUTIVE_PROTOCOL_ERRORS: u32 = 2;

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 工具执行失败后的动作；attempt 从 1 开始
    pub fn on_tool_failure(&self, kind: FailureKind, action: Action, attempt: u32) -> RecoveryAction {
        match kind {
            FailureKind::Timeout if action.is_read_only() && attempt < MAX_OPERATION_ATTEMPTS => {
                RecoveryAction::RetryOperation
            }
            _ => RecoveryAction::Observe,
        }
    }

    /// 结束规划步骤的错误；consecutive 为包括本次在内的连续协议错误次数
    pub fn handle(&self, err: &AgentError, consecutive: u32) -> RecoveryAction {
        match err {
            AgentError::PlannerProtocol(raw) if consecutive < MAX_CONSECUTIVE_PROTOCOL_ERRORS => {
                RecoveryAction::RetryWithPrompt(format!(
                    "Your previous reply could not be parsed ({raw}). \
                     Reply with exactly one JSON object and nothing else: either \
                     {{\"tool_call\": {{\"name\": \"<tool>\", \"arguments\": {{...}}}}}} \
                     or {{\"final_answer\": \"<text>\"}}."
                ))
            }
            _ => RecoveryAction::Abort,
        }
    }
}
