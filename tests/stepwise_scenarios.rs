//! 逐步执行端到端场景：脚本化规划器 + 假脚本执行器，不依赖 macOS

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use wren::agent::{AgentComponents, Session};
use wren::bridge::{AutomationBridge, RawOutput, RunnerError, ScriptProgram, ScriptRunner};
use wren::core::AgentError;
use wren::filter::FilterPolicy;
use wren::llm::{LlmClient, LlmError, ScriptedLlmClient};
use wren::memory::{Message, Turn};
use wren::react::{ReactEvent, DEFAULT_SYSTEM_PROMPT};
use wren::tools::{Catalog, ToolExecutor};

const RS: char = '\u{1e}';
const US: char = '\u{1f}';

/// 共享事件日志：记录规划与脚本执行的先后顺序
type Log = Arc<Mutex<Vec<String>>>;

/// 假执行器：按顺序返回预设输出，记录每个收到的脚本
struct FakeRunner {
    replies: Mutex<VecDeque<Result<RawOutput, RunnerError>>>,
    scripts: Mutex<Vec<String>>,
    log: Log,
}

impl FakeRunner {
    fn new(log: Log, replies: Vec<Result<RawOutput, RunnerError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            scripts: Mutex::new(Vec::new()),
            log,
        })
    }

    fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptRunner for FakeRunner {
    async fn run(&self, program: &ScriptProgram) -> Result<RawOutput, RunnerError> {
        self.log.lock().unwrap().push("run:start".to_string());
        self.scripts.lock().unwrap().push(program.text.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawOutput::default()));
        self.log.lock().unwrap().push("run:end".to_string());
        reply
    }
}

/// 记录每次规划时会话最后一条消息的规划器
struct LoggingPlanner {
    inner: ScriptedLlmClient,
    log: Log,
}

#[async_trait]
impl LlmClient for LoggingPlanner {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.log.lock().unwrap().push(format!("plan:{last}"));
        self.inner.complete(messages).await
    }
}

fn stdout(text: impl Into<String>) -> Result<RawOutput, RunnerError> {
    Ok(RawOutput {
        stdout: text.into(),
        stderr: String::new(),
        exit_code: Some(0),
    })
}

struct Harness {
    components: AgentComponents,
    runner: Arc<FakeRunner>,
    planner: Arc<LoggingPlanner>,
    log: Log,
}

fn harness(replies: &[&str], outputs: Vec<Result<RawOutput, RunnerError>>, max_steps: usize) -> Harness {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let runner = FakeRunner::new(log.clone(), outputs);
    let planner = Arc::new(LoggingPlanner {
        inner: ScriptedLlmClient::new(replies.iter().copied()),
        log: log.clone(),
    });
    let bridge = Arc::new(AutomationBridge::new(
        runner.clone(),
        Arc::new(FilterPolicy::default()),
        Duration::from_secs(15),
    ));
    let executor = ToolExecutor::new(bridge.clone())
        .with_today(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
    let components = AgentComponents::new(planner.clone(), bridge, DEFAULT_SYSTEM_PROMPT, max_steps)
        .with_executor(executor);
    Harness {
        components,
        runner,
        planner,
        log,
    }
}

#[tokio::test]
async fn create_standup_end_to_end() {
    let h = harness(
        &[
            r#"{"tool_call": {"name": "create_event", "arguments": {"title": "Standup", "start": "2026-10-19T09:00", "duration_minutes": 15}}}"#,
            r#"{"final_answer": "Standup is on your calendar for tomorrow at 09:00."}"#,
        ],
        vec![stdout("E-42\n")],
        12,
    );
    let mut session = Session::new();
    let out = session
        .process_message(&h.components, "Add a standup tomorrow at 9 for 15 minutes")
        .await
        .unwrap();

    assert_eq!(out.answer, "Standup is on your calendar for tomorrow at 09:00.");
    assert_eq!(out.actions.len(), 1);
    assert!(out.actions[0].ok);
    assert_eq!(out.actions[0].summary, "event_id=E-42");

    let scripts = h.runner.scripts();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].contains("summary:\"Standup\""));
    assert!(scripts[0].contains("set time of startDate to 32400"));
}

#[tokio::test]
async fn empty_search_is_a_complete_answer() {
    let h = harness(
        &[
            r#"{"tool_call": {"name": "search_events", "arguments": {"keyword": "dentist"}}}"#,
            r#"{"final_answer": "No dentist appointments in the next 30 days."}"#,
        ],
        vec![stdout("")],
        12,
    );
    let mut session = Session::new();
    let out = session
        .process_message(&h.components, "When is my dentist appointment?")
        .await
        .unwrap();

    assert_eq!(out.steps, 2);
    assert_eq!(out.actions[0].summary, "no results");
    assert!(out.actions[0].ok);

    let calls = h.planner.inner.calls();
    let observation = &calls[1].last().unwrap().content;
    assert!(observation.starts_with("Observation from search_events"));
    assert!(observation.contains(r#""payload":[]"#));
}

#[tokio::test]
async fn missing_recipient_is_reported_back_to_planner() {
    let h = harness(
        &[
            r#"{"tool_call": {"name": "send_email", "arguments": {"subject": "Notes", "body": "See attached."}}}"#,
            r#"{"final_answer": "Who should I send the notes to?"}"#,
        ],
        vec![],
        12,
    );
    let mut session = Session::new();
    let out = session
        .process_message(&h.components, "Email the meeting notes")
        .await
        .unwrap();

    assert_eq!(out.answer, "Who should I send the notes to?");
    assert!(!out.actions[0].ok);
    assert!(h.runner.scripts().is_empty());

    let calls = h.planner.inner.calls();
    let observation: Value = {
        let content = &calls[1].last().unwrap().content;
        let json = content.trim_start_matches("Observation from send_email: ");
        serde_json::from_str(json).unwrap()
    };
    assert_eq!(observation["kind"], "validation");
    assert_eq!(observation["problems"], json!([{"field": "to", "reason": "required"}]));
}

#[tokio::test]
async fn one_action_in_flight_and_observation_before_next_plan() {
    let event = format!("E1{US}Work{US}Review{US}2026-10-19T10:00:00{US}2026-10-19T11:00:00{US}");
    let h = harness(
        &[
            r#"{"tool_call": {"name": "list_events", "arguments": {}}}"#,
            r#"{"tool_call": {"name": "count_unread_mail"}}"#,
            r#"{"final_answer": "One review tomorrow and 4 unread messages."}"#,
        ],
        vec![stdout(event), stdout("4\n")],
        12,
    );
    let mut session = Session::new();
    session
        .process_message(&h.components, "Brief me")
        .await
        .unwrap();

    let log = h.log.lock().unwrap().clone();
    let kinds: Vec<&str> = log
        .iter()
        .map(|e| if e.starts_with("plan:") { "plan" } else { e.as_str() })
        .collect();
    assert_eq!(
        kinds,
        ["plan", "run:start", "run:end", "plan", "run:start", "run:end", "plan"]
    );
    assert!(log[3].starts_with("plan:Observation from list_events"));
    assert!(log[6].starts_with("plan:Observation from count_unread_mail"));
}

#[tokio::test]
async fn hidden_calendars_never_reach_the_planner() {
    let h = harness(
        &[
            r#"{"tool_call": {"name": "list_calendars"}}"#,
            r#"{"final_answer": "You have Work and Home."}"#,
        ],
        vec![stdout(format!("Work{RS}US Holidays{RS}Home{RS}Birthdays"))],
        12,
    );
    let mut session = Session::new();
    let out = session.process_message(&h.components, "Which calendars?").await.unwrap();
    assert_eq!(out.actions[0].summary, "2 results");

    let calls = h.planner.inner.calls();
    let observation = &calls[1].last().unwrap().content;
    assert!(observation.contains("Work"));
    assert!(!observation.contains("Birthdays"));
    assert!(!observation.contains("Holidays"));
}

#[tokio::test]
async fn search_excludes_rows_from_hidden_calendars() {
    let row = |id: &str, cal: &str, title: &str| {
        format!("{id}{US}{cal}{US}{title}{US}2026-10-20T12:00:00{US}2026-10-20T13:00:00{US}")
    };
    let output = [
        row("E1", "Work", "Team lunch"),
        row("E2", "Birthday", "Lunch for Sam's birthday"),
        row("E3", "Home", "Lunch prep"),
    ]
    .join(&RS.to_string());
    let h = harness(
        &[
            r#"{"tool_call": {"name": "search_events", "arguments": {"keyword": "lunch"}}}"#,
            r#"{"final_answer": "Two lunches on Tuesday."}"#,
        ],
        vec![stdout(output)],
        12,
    );
    let mut session = Session::new();
    let out = session.process_message(&h.components, "Any lunches?").await.unwrap();
    assert_eq!(out.actions[0].summary, "2 results");

    let Some(Turn::Observation { result, .. }) = session.state().turns().get(2) else {
        panic!("expected observation, got {:?}", session.state().turns());
    };
    let calendars: Vec<&str> = result["payload"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["calendar"].as_str().unwrap())
        .collect();
    assert_eq!(calendars, ["Home", "Work"]);

    let calls = h.planner.inner.calls();
    let observation = &calls[1].last().unwrap().content;
    assert!(!observation.contains("Birthday"));
    assert!(!observation.contains("Sam"));
}

/// 慢执行器：睡眠期间被取消时 future 被 drop，finished 保持 false
struct SlowRunner {
    delay: Duration,
    started: AtomicBool,
    finished: AtomicBool,
}

#[async_trait]
impl ScriptRunner for SlowRunner {
    async fn run(&self, _program: &ScriptProgram) -> Result<RawOutput, RunnerError> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        stdout("1\n")
    }
}

fn components_with_runner(replies: &[&str], runner: Arc<dyn ScriptRunner>) -> AgentComponents {
    let llm = Arc::new(ScriptedLlmClient::new(replies.iter().copied()));
    let bridge = Arc::new(AutomationBridge::new(
        runner,
        Arc::new(FilterPolicy::default()),
        Duration::from_secs(15),
    ));
    AgentComponents::new(llm, bridge, DEFAULT_SYSTEM_PROMPT, 12)
}

fn assert_cancelled_observation(session: &Session, tool: &str) {
    let Some(Turn::Observation { tool: observed, result }) = session.state().last() else {
        panic!("expected observation, got {:?}", session.state().last());
    };
    assert_eq!(observed, tool);
    assert_eq!(result["status"], "failure");
    assert_eq!(result["kind"], "cancelled");
}

#[tokio::test]
async fn cancel_during_tool_ends_turn_with_cancelled_observation() {
    let runner = Arc::new(SlowRunner {
        delay: Duration::from_secs(5),
        started: AtomicBool::new(false),
        finished: AtomicBool::new(false),
    });
    let components = components_with_runner(
        &[
            r#"{"tool_call": {"name": "count_unread_mail"}}"#,
            r#"{"final_answer": "You have 1 unread message."}"#,
        ],
        runner.clone(),
    );
    let mut session = Session::new();
    let supervisor = session.supervisor();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        supervisor.cancel_turn();
    });

    let started = std::time::Instant::now();
    let err = session
        .process_message(&components, "How much unread mail?")
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err, AgentError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(runner.started.load(Ordering::SeqCst));
    assert!(!runner.finished.load(Ordering::SeqCst));
    assert_cancelled_observation(&session, "count_unread_mail");

    // 下一轮不受影响
    let out = session.process_message(&components, "again").await.unwrap();
    assert_eq!(out.answer, "You have 1 unread message.");
}

/// 忽略渲染出的脚本，改跑固定 shell 命令的真实子进程执行器
#[cfg(unix)]
struct ShellRunner {
    inner: wren::bridge::ProcessRunner,
    command: String,
}

#[cfg(unix)]
#[async_trait]
impl ScriptRunner for ShellRunner {
    async fn run(&self, program: &ScriptProgram) -> Result<RawOutput, RunnerError> {
        let shell = ScriptProgram {
            text: self.command.clone(),
            timeout: program.timeout,
            shape: program.shape,
        };
        self.inner.run(&shell).await
    }
}

#[cfg(unix)]
#[tokio::test]
async fn cancel_during_tool_kills_script_process() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("finished");
    let runner = Arc::new(ShellRunner {
        inner: wren::bridge::ProcessRunner::new("sh", "-c"),
        command: format!("(sleep 1; touch {}) & wait", marker.display()),
    });
    let components = components_with_runner(&[r#"{"tool_call": {"name": "list_calendars"}}"#], runner);
    let mut session = Session::new();
    let supervisor = session.supervisor();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        supervisor.cancel_turn();
    });

    let err = session
        .process_message(&components, "Which calendars?")
        .await
        .unwrap_err();
    assert_eq!(err, AgentError::Cancelled);
    assert_cancelled_observation(&session, "list_calendars");

    // 后台子进程随进程组一起被 kill，不会再写文件
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn step_limit_ends_turn_but_session_survives() {
    let call = r#"{"tool_call": {"name": "list_accounts"}}"#;
    let h = harness(
        &[call, call, r#"{"final_answer": "Done."}"#],
        vec![stdout("iCloud"), stdout("iCloud")],
        2,
    );
    let mut session = Session::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let err = session
        .process_message_stream(&h.components, "loop forever", tx)
        .await
        .unwrap_err();
    assert_eq!(err, AgentError::StepLimitExceeded(2));

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    assert!(matches!(
        events.last(),
        Some(ReactEvent::Error { kind, .. }) if kind == "step_limit_exceeded"
    ));

    let out = session.process_message(&h.components, "stop").await.unwrap();
    assert_eq!(out.answer, "Done.");
}

#[tokio::test]
async fn read_only_timeout_is_retried_side_effect_is_not() {
    let h = harness(
        &[
            r#"{"tool_call": {"name": "list_mailboxes"}}"#,
            r#"{"tool_call": {"name": "send_email", "arguments": {"to": "a@example.com", "subject": "Hi", "body": "Hello"}}}"#,
            r#"{"final_answer": "Sending timed out; please check your Sent folder."}"#,
        ],
        vec![
            Err(RunnerError::Timeout(Duration::from_secs(15))),
            stdout(format!("iCloud{US}INBOX")),
            Err(RunnerError::Timeout(Duration::from_secs(15))),
        ],
        12,
    );
    let mut session = Session::new();
    let out = session.process_message(&h.components, "mailboxes then send").await.unwrap();

    assert!(out.actions[0].ok);
    assert!(!out.actions[1].ok);
    assert!(out.actions[1].summary.starts_with("timeout"));
    assert_eq!(h.runner.scripts().len(), 3);
}

#[tokio::test]
async fn same_operation_renders_and_executes_identically() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let output = format!("E1{US}Work{US}Standup{US}2026-10-19T09:00:00{US}2026-10-19T09:15:00{US}");
    let runner = FakeRunner::new(log, vec![stdout(output.clone()), stdout(output)]);
    let bridge = AutomationBridge::new(runner.clone(), Arc::new(FilterPolicy::default()), Duration::from_secs(15));

    let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
    let args = json!({"keyword": "stand"});
    let first = Catalog::new().resolve_at("search_events", &args, today).unwrap();
    let second = Catalog::new().resolve_at("search_events", &args, today).unwrap();
    assert_eq!(first, second);

    let a = bridge.execute(&first).await;
    let b = bridge.execute(&second).await;
    assert_eq!(a, b);
    assert!(a.is_success());

    let scripts = runner.scripts();
    assert_eq!(scripts[0], scripts[1]);
}
