//! Headless Agent 运行时
//!
//! 供命令行与 HTTP 前端共用的无界面逻辑：
//! AgentComponents::from_config 构建 Planner / ToolExecutor / Recovery（可多会话共享），
//! Session 持有单个会话的对话状态、阶段与取消令牌，process_message 对单条用户输入跑完一轮。
//! SessionStore 按 id 管理多个会话，会话之间互不共享状态。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};

use crate::bridge::AutomationBridge;
use crate::config::AppConfig;
use crate::core::{AgentError, PhaseTracker, RecoveryEngine, SessionPhase, SessionSupervisor};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::ConversationState;
use crate::react::{load_system_prompt_template, react_loop, Planner, ReactEvent, ReactSession, TurnOutcome};
use crate::tools::ToolExecutor;

/// 预构建的 Agent 组件：Planner、ToolExecutor、Recovery，可多会话共享
pub struct AgentComponents {
    pub planner: Planner,
    pub executor: ToolExecutor,
    pub recovery: RecoveryEngine,
    pub max_steps: usize,
}

impl AgentComponents {
    /// 按配置创建：规划器后端缺少 API Key 等配置问题直接返回错误
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let llm = create_llm_from_config(&cfg.llm)?;
        let bridge = Arc::new(AutomationBridge::from_config(cfg));
        Ok(Self::new(llm, bridge, load_system_prompt_template(), cfg.app.max_steps))
    }

    pub fn new(
        llm: Arc<dyn LlmClient>,
        bridge: Arc<AutomationBridge>,
        system_prompt: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        let executor = ToolExecutor::new(bridge);
        let planner = Planner::new(llm, system_prompt, executor.catalog());
        Self {
            planner,
            executor,
            recovery: RecoveryEngine::new(),
            max_steps,
        }
    }

    /// 替换执行器（测试中用于固定日期默认值）
    pub fn with_executor(mut self, executor: ToolExecutor) -> Self {
        self.executor = executor;
        self
    }
}

/// 会话状态快照（/api/status）
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub phase: SessionPhase,
    pub turns: usize,
    pub max_steps: usize,
}

/// 单个会话：对话状态、阶段跟踪与取消监管
pub struct Session {
    id: String,
    state: ConversationState,
    phase: PhaseTracker,
    supervisor: Arc<SessionSupervisor>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: ConversationState::new(),
            phase: PhaseTracker::new(),
            supervisor: Arc::new(SessionSupervisor::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.phase()
    }

    /// 共享的监管句柄，可在其他任务中 cancel_turn（如 Ctrl+C）
    pub fn supervisor(&self) -> Arc<SessionSupervisor> {
        self.supervisor.clone()
    }

    pub fn status(&self, max_steps: usize) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            phase: self.phase.phase(),
            turns: self.state.len(),
            max_steps,
        }
    }

    /// 处理单条用户消息（不推送事件）
    pub async fn process_message(
        &mut self,
        components: &AgentComponents,
        user_input: &str,
    ) -> Result<TurnOutcome, AgentError> {
        self.run_turn(components, user_input, None).await
    }

    /// 处理单条用户消息，并通过 event_tx 推送每一步的过程事件
    pub async fn process_message_stream(
        &mut self,
        components: &AgentComponents,
        user_input: &str,
        event_tx: mpsc::UnboundedSender<ReactEvent>,
    ) -> Result<TurnOutcome, AgentError> {
        self.run_turn(components, user_input, Some(&event_tx)).await
    }

    async fn run_turn(
        &mut self,
        components: &AgentComponents,
        user_input: &str,
        event_tx: Option<&mpsc::UnboundedSender<ReactEvent>>,
    ) -> Result<TurnOutcome, AgentError> {
        let cancel_token = self.supervisor.begin_turn();
        let mut session = ReactSession::new(
            &components.planner,
            &components.executor,
            &components.recovery,
            cancel_token,
        )
        .with_max_steps(components.max_steps);
        if let Some(tx) = event_tx {
            session = session.with_event_tx(tx);
        }
        tracing::info!(session_id = %self.id, "turn started");
        let result = react_loop(&session, &mut self.state, &mut self.phase, user_input).await;
        if let Ok(outcome) = &result {
            tracing::info!(
                session_id = %self.id,
                steps = outcome.steps,
                actions = outcome.actions.len(),
                "turn finished"
            );
        }
        result
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// 该会话正在执行一轮，不排队
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session {0} has a request in progress")]
pub struct SessionBusy(pub String);

pub type SharedSession = Arc<Mutex<Session>>;

/// 多会话存储（HTTP 前端）：每个 id 对应一个独立的 Session
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// id 为空或未知时新建一个会话（新 uuid）
    pub async fn get_or_create(&self, id: Option<&str>) -> SharedSession {
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            if let Some(session) = self.get(id).await {
                return session;
            }
        }
        self.create().await
    }

    async fn create(&self) -> SharedSession {
        let session = Session::new();
        let id = session.id().to_string();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, shared.clone());
        shared
    }

    /// 取得会话的独占权以执行一轮；同一会话已有一轮在执行时返回 SessionBusy
    pub async fn acquire(&self, id: Option<&str>) -> Result<OwnedMutexGuard<Session>, SessionBusy> {
        let shared = self.get_or_create(id).await;
        shared
            .try_lock_owned()
            .map_err(|_| SessionBusy(id.unwrap_or_default().to_string()))
    }

    /// 丢弃旧会话，换成一个新会话（新 id，空历史）
    pub async fn reset(&self, id: Option<&str>) -> Result<SharedSession, SessionBusy> {
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            let mut sessions = self.sessions.write().await;
            if let Some(old) = sessions.get(id) {
                if old.try_lock().is_err() {
                    return Err(SessionBusy(id.to_string()));
                }
                sessions.remove(id);
            }
        }
        Ok(self.create().await)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
