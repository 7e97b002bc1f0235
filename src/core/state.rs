//! 会话阶段状态机
//!
//! AwaitingUserInput → Planning → (ToolDispatch → Planning)* → Answering → Done → AwaitingUserInput
//! 任一规划步骤出错时 Planning → Done（本轮结束，会话仍可继续）。

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingUserInput,
    Planning,
    ToolDispatch,
    Answering,
    Done,
}

impl SessionPhase {
    /// 合法的阶段转换
    pub fn can_transition(self, to: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, to),
            (AwaitingUserInput, Planning)
                | (Planning, ToolDispatch)
                | (Planning, Answering)
                | (Planning, Done)
                | (ToolDispatch, Planning)
                | (ToolDispatch, Done)
                | (Answering, Done)
                | (Done, AwaitingUserInput)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::AwaitingUserInput => "awaiting_user_input",
            SessionPhase::Planning => "planning",
            SessionPhase::ToolDispatch => "tool_dispatch",
            SessionPhase::Answering => "answering",
            SessionPhase::Done => "done",
        }
    }
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::AwaitingUserInput
    }
}

/// 跟踪当前阶段；非法转换只记录告警，不 panic
#[derive(Clone, Debug, Default)]
pub struct PhaseTracker {
    phase: SessionPhase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn advance(&mut self, to: SessionPhase) -> bool {
        let ok = self.phase.can_transition(to);
        if !ok {
            tracing::warn!(from = self.phase.as_str(), to = to.as_str(), "unexpected phase transition");
        }
        self.phase = to;
        ok
    }
}
