//! AutomationBridge：渲染 → 执行 → 分类 → 解析 → 后处理
//!
//! 每次 execute 恰好产生一个 ExecutionResult，任何失败都以 Failure 返回，不会 panic 或向上抛错。
//! Bridge 内部不做重试；是否重试由调用方（ToolExecutor）按恢复策略决定。

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use super::operation::{Action, Application, Operation};
use super::parse::parse_output;
use super::result::{ExecutionResult, FailureKind, Payload, Record};
use super::runner::{ProcessRunner, RawOutput, RunnerError, ScriptRunner};
use super::script::{render, OutputShape, RenderError};
use crate::config::AppConfig;
use crate::filter::FilterPolicy;

/// 调试信息：渲染出的脚本与原始输出，不进入 payload
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub script: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TracedExecution {
    pub result: ExecutionResult,
    /// 仅在 bridge.debug = true 时返回
    pub diagnostics: Option<Diagnostics>,
}

pub struct AutomationBridge {
    runner: Arc<dyn ScriptRunner>,
    policy: Arc<FilterPolicy>,
    timeout: Duration,
    debug: bool,
}

impl AutomationBridge {
    pub fn new(runner: Arc<dyn ScriptRunner>, policy: Arc<FilterPolicy>, timeout: Duration) -> Self {
        Self {
            runner,
            policy,
            timeout,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// 按 [bridge] 与 [calendar] 配置构造，使用真实的子进程执行器
    pub fn from_config(cfg: &AppConfig) -> Self {
        let runner = ProcessRunner::new(cfg.bridge.interpreter.clone(), cfg.bridge.script_flag.clone());
        Self::new(
            Arc::new(runner),
            Arc::new(cfg.calendar.clone()),
            Duration::from_secs(cfg.bridge.timeout_seconds),
        )
        .with_debug(cfg.bridge.debug)
    }

    pub async fn execute(&self, op: &Operation) -> ExecutionResult {
        self.execute_traced(op).await.result
    }

    pub async fn execute_traced(&self, op: &Operation) -> TracedExecution {
        let program = match render(op, &self.policy, self.timeout) {
            Ok(p) => p,
            Err(e) => {
                let kind = match e {
                    RenderError::InvalidArgument { .. } => FailureKind::Validation,
                    RenderError::Unsupported { .. } | RenderError::MissingArgument { .. } => {
                        FailureKind::UnsupportedOperation
                    }
                };
                tracing::warn!(operation = %op.label(), error = %e, "operation rejected before execution");
                return TracedExecution {
                    result: ExecutionResult::failure(kind, e.to_string()),
                    diagnostics: None,
                };
            }
        };

        let started = Instant::now();
        let run = self.runner.run(&program).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (result, raw) = match run {
            Ok(raw) => (self.classify(op, program.shape, &raw), Some(raw)),
            Err(RunnerError::Timeout(after)) => (
                ExecutionResult::failure(
                    FailureKind::Timeout,
                    format!("{} did not respond within {}s", op.target().app_name(), after.as_secs_f32()),
                ),
                None,
            ),
            Err(e) => (
                ExecutionResult::failure(FailureKind::AutomationError, e.to_string()),
                None,
            ),
        };

        let raw = raw.unwrap_or_default();
        tracing::debug!(
            operation = %op.label(),
            elapsed_ms,
            exit_code = ?raw.exit_code,
            stdout = %raw.stdout,
            stderr = %raw.stderr,
            script = %program.text,
            "script finished"
        );
        tracing::info!(
            operation = %op.label(),
            elapsed_ms,
            ok = result.is_success(),
            "bridge execute"
        );

        let diagnostics = self.debug.then(|| Diagnostics {
            script: program.text,
            stdout: raw.stdout,
            stderr: raw.stderr,
            exit_code: raw.exit_code,
            elapsed_ms,
        });
        TracedExecution {
            result,
            diagnostics,
        }
    }

    fn classify(&self, op: &Operation, shape: OutputShape, raw: &RawOutput) -> ExecutionResult {
        let stderr = raw.stderr.trim();
        if !raw.success() {
            let message = if stderr.is_empty() {
                match raw.exit_code {
                    Some(code) => format!("script exited with status {code}"),
                    None => "script terminated by signal".to_string(),
                }
            } else {
                stderr.to_string()
            };
            return ExecutionResult::failure(FailureKind::AutomationError, message);
        }
        if op.action().is_side_effecting() && !stderr.is_empty() {
            return ExecutionResult::failure(FailureKind::AutomationError, stderr.to_string());
        }
        match parse_output(shape, &raw.stdout) {
            Ok(payload) => ExecutionResult::success(self.post_process(op, payload)),
            Err(failure) => failure.into(),
        }
    }

    /// 可见性复核、关键字过滤、排序、截断
    fn post_process(&self, op: &Operation, payload: Payload) -> Payload {
        let Payload::List(mut items) = payload else {
            return payload;
        };

        if op.is_calendar_enumeration() {
            let field = if op.action() == Action::Calendars { "name" } else { "calendar" };
            items.retain(|r| self.policy.is_calendar_visible(text_field(r, field)));
        }

        match (op.target(), op.action()) {
            (Application::Calendar, Action::List | Action::Search) => {
                if op.action() == Action::Search {
                    let keyword = op.text("keyword").unwrap_or("").to_lowercase();
                    items.retain(|r| {
                        text_field(r, "title").to_lowercase().contains(&keyword)
                            || text_field(r, "description").to_lowercase().contains(&keyword)
                    });
                }
                items.sort_by(|a, b| {
                    cmp_field(a, b, "start")
                        .then_with(|| cmp_field(a, b, "calendar"))
                        .then_with(|| cmp_field(a, b, "title"))
                        .then_with(|| cmp_field(a, b, "event_id"))
                });
            }
            (Application::Mail, Action::Search) => {
                items.sort_by(|a, b| {
                    cmp_field(b, a, "date").then_with(|| cmp_id(b, a))
                });
            }
            _ => {}
        }

        if let Some(limit) = op.integer("limit") {
            items.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Payload::List(items)
    }
}

fn text_field<'r>(record: &'r Record, key: &str) -> &'r str {
    record.get(key).and_then(Value::as_str).unwrap_or("")
}

fn cmp_field(a: &Record, b: &Record, key: &str) -> Ordering {
    text_field(a, key).cmp(text_field(b, key))
}

fn cmp_id(a: &Record, b: &Record) -> Ordering {
    let id = |r: &Record| r.get("message_id").and_then(Value::as_i64).unwrap_or(0);
    id(a).cmp(&id(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::script::ScriptProgram;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    struct FakeRunner {
        reply: Result<RawOutput, Duration>,
        calls: AtomicUsize,
        scripts: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn ok(stdout: &str) -> Self {
            Self::with(Ok(RawOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }))
        }

        fn with(reply: Result<RawOutput, Duration>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
                scripts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScriptRunner for FakeRunner {
        async fn run(&self, program: &ScriptProgram) -> Result<RawOutput, RunnerError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.scripts.lock().unwrap().push(program.text.clone());
            self.reply.clone().map_err(RunnerError::Timeout)
        }
    }

    fn bridge(runner: Arc<FakeRunner>) -> AutomationBridge {
        AutomationBridge::new(runner, Arc::new(FilterPolicy::default()), Duration::from_secs(15))
    }

    fn list_events() -> Operation {
        Operation::new(Application::Calendar, Action::List)
            .with_arg("start_date", NaiveDate::from_ymd_opt(2026, 10, 18).unwrap())
            .with_arg("end_date", NaiveDate::from_ymd_opt(2026, 11, 17).unwrap())
            .with_arg("limit", 20i64)
    }

    fn event(id: &str, cal: &str, title: &str, start: &str) -> String {
        [id, cal, title, start, start, ""].join("\u{1f}")
    }

    #[tokio::test]
    async fn test_unsupported_pair_never_runs() {
        let runner = Arc::new(FakeRunner::ok(""));
        let result = bridge(runner.clone())
            .execute(&Operation::new(Application::Mail, Action::Create))
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::UnsupportedOperation));
        assert_eq!(runner.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_output_is_empty_list() {
        let runner = Arc::new(FakeRunner::ok("\n"));
        let result = bridge(runner).execute(&list_events()).await;
        assert_eq!(result, ExecutionResult::success(Payload::List(vec![])));
    }

    #[tokio::test]
    async fn test_hidden_calendar_excluded_and_sorted() {
        let out = [
            event("E2", "Work", "Review", "2026-10-20T10:00:00"),
            event("E9", "Birthdays", "Alice", "2026-10-19T00:00:00"),
            event("E1", "Home", "Gym", "2026-10-19T07:00:00"),
        ]
        .join("\u{1e}");
        let runner = Arc::new(FakeRunner::ok(&out));
        let result = bridge(runner).execute(&list_events()).await;
        let Some(Payload::List(items)) = result.payload() else {
            panic!("expected list, got {result:?}");
        };
        let ids: Vec<&str> = items.iter().map(|r| text_field(r, "event_id")).collect();
        assert_eq!(ids, vec!["E1", "E2"]);
    }

    #[tokio::test]
    async fn test_search_filters_keyword_and_limit() {
        let out = [
            event("E1", "Work", "Team standup", "2026-10-19T09:00:00"),
            event("E2", "Work", "Lunch", "2026-10-19T12:00:00"),
            event("E3", "Work", "STANDUP retro", "2026-10-20T09:00:00"),
        ]
        .join("\u{1e}");
        let op = Operation::new(Application::Calendar, Action::Search)
            .with_arg("keyword", "standup")
            .with_arg("start_date", NaiveDate::from_ymd_opt(2026, 10, 18).unwrap())
            .with_arg("end_date", NaiveDate::from_ymd_opt(2026, 11, 17).unwrap())
            .with_arg("limit", 1i64);
        let result = bridge(Arc::new(FakeRunner::ok(&out))).execute(&op).await;
        let Some(Payload::List(items)) = result.payload() else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(text_field(&items[0], "event_id"), "E1");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_automation_error() {
        let runner = Arc::new(FakeRunner::with(Ok(RawOutput {
            stdout: String::new(),
            stderr: "execution error: Calendar got an error: Can't get calendar \"Nope\". (-1728)\n".into(),
            exit_code: Some(1),
        })));
        let result = bridge(runner).execute(&list_events()).await;
        let ExecutionResult::Failure(f) = result else {
            panic!("expected failure");
        };
        assert_eq!(f.kind, FailureKind::AutomationError);
        assert!(f.message.contains("-1728"));
    }

    #[tokio::test]
    async fn test_stderr_on_silent_action_is_automation_error() {
        let runner = Arc::new(FakeRunner::with(Ok(RawOutput {
            stdout: "ok\n".into(),
            stderr: "warning: something\n".into(),
            exit_code: Some(0),
        })));
        let op = Operation::new(Application::Calendar, Action::Delete).with_arg("title", "Standup");
        let result = bridge(runner).execute(&op).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::AutomationError));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_failure() {
        let runner = Arc::new(FakeRunner::with(Err(Duration::from_secs(15))));
        let result = bridge(runner).execute(&list_events()).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_execute_is_deterministic() {
        let out = event("E1", "Work", "Standup", "2026-10-19T09:00:00");
        let runner = Arc::new(FakeRunner::ok(&out));
        let b = bridge(runner.clone());
        let first = b.execute(&list_events()).await;
        let second = b.execute(&list_events()).await;
        assert_eq!(first, second);
        let scripts = runner.scripts.lock().unwrap();
        assert_eq!(scripts[0], scripts[1]);
    }

    #[tokio::test]
    async fn test_diagnostics_only_in_debug() {
        let runner = Arc::new(FakeRunner::ok(""));
        let traced = bridge(runner.clone()).execute_traced(&list_events()).await;
        assert!(traced.diagnostics.is_none());

        let traced = bridge(runner).with_debug(true).execute_traced(&list_events()).await;
        let diag = traced.diagnostics.unwrap();
        assert!(diag.script.contains("tell application \"Calendar\""));
        assert_eq!(diag.exit_code, Some(0));
    }
}
