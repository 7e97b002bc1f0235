//! 逐步执行主循环
//!
//! Plan -> (ToolCall -> Execute -> Observation -> Plan)* -> FinalAnswer；同一会话同时只有一个动作在执行，
//! 下一次规划之前 observation 必然已经写入会话。规划器回复格式错误时带纠正提示重试一次；
//! 规划步数超过 max_steps、规划器不可用或被取消时结束本轮（会话仍可继续）。
//! 可选 event_tx：向命令行 / Web 前端推送每一步的过程事件。

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::bridge::{ExecutionResult, Failure, FailureKind};
use crate::core::{AgentError, PhaseTracker, RecoveryAction, RecoveryEngine, SessionPhase};
use crate::memory::{ConversationState, Turn};
use crate::react::planner::{parse_planner_reply, PlannerReply};
use crate::react::{Planner, ReactEvent};
use crate::tools::ToolExecutor;

/// 默认单轮最大规划步数
pub const DEFAULT_MAX_STEPS: usize = 12;

/// 本轮执行过的一个动作（供 "Actions taken" 汇总）
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub tool: String,
    pub ok: bool,
    pub summary: String,
}

/// 一轮对话的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    /// 实际使用的规划步数
    pub steps: usize,
    pub actions: Vec<ActionRecord>,
}

/// 单轮执行所需的组件
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    pub cancel_token: CancellationToken,
    pub max_steps: usize,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        recovery: &'a RecoveryEngine,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            recovery,
            cancel_token,
            max_steps: DEFAULT_MAX_STEPS,
            event_tx: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send_event(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 本轮以错误结束：推送 error 事件并回到 Done
    fn fail(&self, phase: &mut PhaseTracker, err: AgentError) -> AgentError {
        tracing::warn!(kind = err.kind(), error = %err, "turn ended with error");
        self.send_event(ReactEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        phase.advance(SessionPhase::Done);
        err
    }
}

/// 执行一轮：追加用户输入，循环规划与执行直到得到最终回答
pub async fn react_loop(
    session: &ReactSession<'_>,
    state: &mut ConversationState,
    phase: &mut PhaseTracker,
    user_input: &str,
) -> Result<TurnOutcome, AgentError> {
    let planner = session.planner;
    let executor = session.executor;
    let cancel = session.cancel_token.clone();

    if phase.phase() == SessionPhase::Done {
        phase.advance(SessionPhase::AwaitingUserInput);
    }
    state.push_user(user_input);
    let mut actions = Vec::new();
    let mut consecutive_protocol_errors = 0u32;

    for step in 1..=session.max_steps {
        if phase.phase() != SessionPhase::Planning {
            phase.advance(SessionPhase::Planning);
        }
        session.send_event(ReactEvent::StepUpdate {
            step,
            max_steps: session.max_steps,
        });

        if cancel.is_cancelled() {
            return Err(session.fail(phase, AgentError::Cancelled));
        }

        session.send_event(ReactEvent::Thinking);
        let planned = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = planner.plan(state) => r,
        };
        let raw = match planned {
            Ok(raw) => raw,
            Err(e) => return Err(session.fail(phase, e)),
        };
        tracing::debug!(step, reply = %raw, "planner reply");

        let reply = match parse_planner_reply(&raw) {
            Ok(reply) => {
                consecutive_protocol_errors = 0;
                reply
            }
            Err(e) => {
                consecutive_protocol_errors += 1;
                match session.recovery.handle(&e, consecutive_protocol_errors) {
                    RecoveryAction::RetryWithPrompt(hint) => {
                        session.send_event(ReactEvent::Recovery {
                            action: "retry_with_prompt".to_string(),
                            detail: e.to_string(),
                        });
                        state.push(Turn::Correction {
                            reply: raw,
                            result: failure_observation(FailureKind::PlannerProtocolError, &e, Some(hint)),
                        });
                        continue;
                    }
                    _ => return Err(session.fail(phase, e)),
                }
            }
        };

        match reply {
            PlannerReply::FinalAnswer(text) => {
                phase.advance(SessionPhase::Answering);
                state.push(Turn::Answer { text: text.clone() });
                session.send_event(ReactEvent::FinalAnswer { text: text.clone() });
                let (prompt_tokens, completion_tokens, total_tokens) = planner.token_usage();
                session.send_event(ReactEvent::TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                });
                phase.advance(SessionPhase::Done);
                return Ok(TurnOutcome {
                    answer: text,
                    steps: step,
                    actions,
                });
            }
            PlannerReply::ToolCall(call) => {
                phase.advance(SessionPhase::ToolDispatch);
                let arguments = match call.arguments {
                    Value::Null => Value::Object(Default::default()),
                    other => other,
                };
                session.send_event(ReactEvent::ToolInvoked {
                    name: call.name.clone(),
                    args: arguments.clone(),
                });
                state.push(Turn::ToolCall {
                    name: call.name.clone(),
                    arguments: arguments.clone(),
                });

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    o = executor.execute(&call.name, &arguments) => Some(o),
                };
                let Some(outcome) = outcome else {
                    state.push(Turn::Observation {
                        tool: call.name.clone(),
                        result: serde_json::json!({
                            "status": "failure",
                            "kind": "cancelled",
                            "message": "cancelled by user before the tool finished",
                            "tool": call.name,
                        }),
                    });
                    return Err(session.fail(phase, AgentError::Cancelled));
                };

                let summary = outcome.summary();
                session.send_event(ReactEvent::ToolResult {
                    name: call.name.clone(),
                    ok: outcome.ok(),
                    summary: summary.clone(),
                });
                actions.push(ActionRecord {
                    tool: call.name.clone(),
                    ok: outcome.ok(),
                    summary,
                });
                state.push(Turn::Observation {
                    tool: call.name,
                    result: outcome.observation(),
                });
            }
        }
    }

    let err = AgentError::StepLimitExceeded(session.max_steps);
    state.push(Turn::Observation {
        tool: "planner".to_string(),
        result: failure_observation(FailureKind::StepLimitExceeded, &err, None),
    });
    Err(session.fail(phase, err))
}

/// 非工具失败也按 ExecutionResult 的 JSON 形状写进会话
fn failure_observation(kind: FailureKind, err: &AgentError, hint: Option<String>) -> Value {
    let mut result = ExecutionResult::from(Failure::new(kind, err.to_string())).to_json();
    if let (Some(hint), Some(obj)) = (hint, result.as_object_mut()) {
        obj.insert("hint".to_string(), Value::String(hint));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AutomationBridge, RawOutput, RunnerError, ScriptProgram, ScriptRunner};
    use crate::filter::FilterPolicy;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::tools::Catalog;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct SilentRunner;

    #[async_trait]
    impl ScriptRunner for SilentRunner {
        async fn run(&self, _program: &ScriptProgram) -> Result<RawOutput, RunnerError> {
            Ok(RawOutput {
                stdout: "2\n".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    struct Fixture {
        llm: Arc<ScriptedLlmClient>,
        planner: Planner,
        executor: ToolExecutor,
        recovery: RecoveryEngine,
    }

    fn fixture(replies: &[&str]) -> Fixture {
        let llm = Arc::new(ScriptedLlmClient::new(replies.iter().copied()));
        let planner = Planner::with_default_prompt(llm.clone(), &Catalog::new());
        let bridge = AutomationBridge::new(
            Arc::new(SilentRunner),
            Arc::new(FilterPolicy::default()),
            Duration::from_secs(5),
        );
        Fixture {
            llm,
            planner,
            executor: ToolExecutor::new(Arc::new(bridge)),
            recovery: RecoveryEngine::new(),
        }
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let f = fixture(&[
            r#"{"tool_call": {"name": "count_unread_mail", "arguments": {}}}"#,
            r#"{"final_answer": "You have 2 unread messages."}"#,
        ]);
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new());
        let mut state = ConversationState::new();
        let mut phase = PhaseTracker::new();

        let out = react_loop(&session, &mut state, &mut phase, "any unread mail?")
            .await
            .unwrap();
        assert_eq!(out.answer, "You have 2 unread messages.");
        assert_eq!(out.steps, 2);
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].summary, "count=2");
        assert_eq!(phase.phase(), SessionPhase::Done);
        assert_eq!(state.len(), 4);

        // 第二次规划时 observation 已在会话中
        let second = &f.llm.calls()[1];
        assert!(second.last().unwrap().content.starts_with("Observation from count_unread_mail"));
    }

    #[tokio::test]
    async fn test_protocol_error_corrected_once() {
        let f = fixture(&["I think I should check mail.", r#"{"final_answer": "ok"}"#]);
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new());
        let mut state = ConversationState::new();
        let mut phase = PhaseTracker::new();

        let out = react_loop(&session, &mut state, &mut phase, "hi").await.unwrap();
        assert_eq!(out.answer, "ok");
        let Turn::Correction { reply, result } = &state.turns()[1] else {
            panic!("expected correction, got {:?}", state.turns()[1]);
        };
        assert_eq!(reply, "I think I should check mail.");
        assert_eq!(result["status"], "failure");
        assert_eq!(result["kind"], "planner_protocol_error");
        assert!(result["hint"].as_str().unwrap().contains("final_answer"));

        // 重新规划时规划器看到的是 planner_protocol_error observation
        let retry = &f.llm.calls()[1];
        let last = &retry.last().unwrap().content;
        assert!(last.starts_with("Observation from planner: "));
        assert!(last.contains("planner_protocol_error"));
    }

    #[tokio::test]
    async fn test_second_protocol_error_aborts() {
        let f = fixture(&["nope", "still nope", r#"{"final_answer": "never reached"}"#]);
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new());
        let mut state = ConversationState::new();
        let mut phase = PhaseTracker::new();

        let err = react_loop(&session, &mut state, &mut phase, "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::PlannerProtocol(_)));
        assert_eq!(f.llm.remaining(), 1);
        assert_eq!(phase.phase(), SessionPhase::Done);
    }

    #[tokio::test]
    async fn test_planner_unavailable_ends_turn() {
        let f = fixture(&[]);
        f.llm.push(Err(LlmError::Timeout(60)));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new())
            .with_event_tx(&tx);
        let mut state = ConversationState::new();
        let mut phase = PhaseTracker::new();

        let err = react_loop(&session, &mut state, &mut phase, "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::PlannerUnavailable(_)));
        drop(tx);

        let mut last = None;
        while let Some(ev) = rx.recv().await {
            last = Some(ev);
        }
        assert!(matches!(
            last,
            Some(ReactEvent::Error { ref kind, .. }) if kind == "planner_unavailable"
        ));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let call = r#"{"tool_call": {"name": "list_calendars"}}"#;
        let f = fixture(&[call, call, call, call]);
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new())
            .with_max_steps(3);
        let mut state = ConversationState::new();
        let mut phase = PhaseTracker::new();

        let err = react_loop(&session, &mut state, &mut phase, "loop").await.unwrap_err();
        assert_eq!(err, AgentError::StepLimitExceeded(3));
        assert_eq!(f.llm.calls().len(), 3);
        let Some(Turn::Observation { tool, result }) = state.last() else {
            panic!("expected observation, got {:?}", state.last());
        };
        assert_eq!(tool, "planner");
        assert_eq!(result["kind"], "step_limit_exceeded");
    }

    #[tokio::test]
    async fn test_cancelled_before_planning() {
        let f = fixture(&[r#"{"final_answer": "x"}"#]);
        let token = CancellationToken::new();
        token.cancel();
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, token);
        let mut state = ConversationState::new();
        let mut phase = PhaseTracker::new();

        let err = react_loop(&session, &mut state, &mut phase, "hi").await.unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
        assert!(f.llm.calls().is_empty());
    }
}
