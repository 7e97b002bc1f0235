//! 工具执行器
//!
//! 工具名 + JSON 参数 → Catalog 校验为 Operation → AutomationBridge 执行；
//! 只读动作超时由 RecoveryEngine 决定是否立即重试。每次调用输出一行结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde_json::Value;

use crate::bridge::{AutomationBridge, Diagnostics, ExecutionResult, FailureKind, Operation};
use crate::core::{RecoveryAction, RecoveryEngine};
use crate::tools::{Catalog, Problem};

const ARGS_PREVIEW_CHARS: usize = 200;

/// 一次工具调用的完整结果
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub tool: String,
    /// 校验通过时的 Operation；校验失败为 None
    pub operation: Option<Operation>,
    pub result: ExecutionResult,
    /// 校验问题列表（仅 validation 失败时非空）
    pub problems: Vec<Problem>,
    /// 实际执行次数（校验失败为 0）
    pub attempts: u32,
    pub diagnostics: Option<Diagnostics>,
}

impl ToolOutcome {
    pub fn ok(&self) -> bool {
        self.result.is_success()
    }

    pub fn summary(&self) -> String {
        self.result.summary()
    }

    /// 写入会话的 observation：结果 JSON 加上工具名，校验失败时附上问题列表
    pub fn observation(&self) -> Value {
        let mut obs = self.result.to_json();
        if let Value::Object(map) = &mut obs {
            map.insert("tool".to_string(), Value::String(self.tool.clone()));
            if !self.problems.is_empty() {
                if let Ok(problems) = serde_json::to_value(&self.problems) {
                    map.insert("problems".to_string(), problems);
                }
            }
        }
        obs
    }

    /// tool_audit 日志行；bridge.debug 打开时附带脚本与原始输出
    pub fn audit_record(&self, args: &Value, duration_ms: u64) -> Value {
        let mut audit = serde_json::json!({
            "event": "tool_audit",
            "tool": self.tool,
            "ok": self.ok(),
            "outcome": self.result.failure_kind().map(FailureKind::as_str).unwrap_or("ok"),
            "attempts": self.attempts,
            "duration_ms": duration_ms,
            "args_preview": args_preview(args),
        });
        if let (Some(diagnostics), Value::Object(map)) = (&self.diagnostics, &mut audit) {
            if let Ok(diagnostics) = serde_json::to_value(diagnostics) {
                map.insert("diagnostics".to_string(), diagnostics);
            }
        }
        audit
    }
}

pub struct ToolExecutor {
    catalog: Catalog,
    bridge: Arc<AutomationBridge>,
    recovery: RecoveryEngine,
    today: Option<NaiveDate>,
}

impl ToolExecutor {
    pub fn new(bridge: Arc<AutomationBridge>) -> Self {
        Self {
            catalog: Catalog::new(),
            bridge,
            recovery: RecoveryEngine::new(),
            today: None,
        }
    }

    /// 固定“今天”，使日期默认值可复现（测试用）
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn execute(&self, tool_name: &str, args: &Value) -> ToolOutcome {
        let start = Instant::now();
        let resolved = match self.today {
            Some(today) => self.catalog.resolve_at(tool_name, args, today),
            None => self.catalog.resolve(tool_name, args),
        };

        let outcome = match resolved {
            Err(e) => {
                tracing::debug!(tool = tool_name, error = %e, "tool call rejected");
                ToolOutcome {
                    tool: tool_name.to_string(),
                    operation: None,
                    result: ExecutionResult::failure(FailureKind::Validation, e.to_string()),
                    problems: e.problems,
                    attempts: 0,
                    diagnostics: None,
                }
            }
            Ok(op) => self.run(tool_name, op).await,
        };

        let audit = outcome.audit_record(args, start.elapsed().as_millis() as u64);
        tracing::info!(audit = %audit.to_string(), "tool");
        outcome
    }

    async fn run(&self, tool_name: &str, op: Operation) -> ToolOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let traced = self.bridge.execute_traced(&op).await;
            let retry = match traced.result.failure_kind() {
                Some(kind) => self.recovery.on_tool_failure(kind, op.action(), attempt),
                None => RecoveryAction::Observe,
            };
            if retry == RecoveryAction::RetryOperation {
                tracing::warn!(operation = %op.label(), attempt, "read-only operation timed out, retrying");
                continue;
            }
            return ToolOutcome {
                tool: tool_name.to_string(),
                operation: Some(op),
                result: traced.result,
                problems: Vec::new(),
                attempts: attempt,
                diagnostics: traced.diagnostics,
            };
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
