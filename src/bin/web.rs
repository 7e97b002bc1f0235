//! Wren Web UI
//!
//! 启动: cargo run --bin wren-web --features web
//! 浏览器访问 http://127.0.0.1:8080

#![cfg(feature = "web")]

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream::{self, TryStreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use wren::agent::{AgentComponents, SessionBusy, SessionStatus, SessionStore};
use wren::config::load_config;
use wren::react::ReactEvent;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

struct AppState {
    components: AgentComponents,
    /// 按 session_id 区分的会话；每个会话同一时间只允许一轮在执行
    sessions: SessionStore,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    /// 为空时新建会话，id 在响应第一行返回
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct SessionQuery {
    #[serde(default)]
    session_id: Option<String>,
}

fn ndjson_line<T: serde::Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "kind": "serialization", "message": e.to_string() })
            .to_string()
    });
    format!("{json}\n")
}

fn busy(e: SessionBusy) -> (StatusCode, String) {
    (StatusCode::CONFLICT, e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(None).context("Failed to load configuration")?;
    wren::observability::init(cfg.bridge.debug);

    let components = AgentComponents::from_config(&cfg).context("Failed to create agent")?;
    let state = Arc::new(AppState {
        components,
        sessions: SessionStore::new(),
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/api/status", get(api_status))
        .route("/api/session/clear", post(api_session_clear))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state);

    let addr = std::env::var("WREN_WEB_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "wren web listening");
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /api/status?session_id=...：会话 id、当前阶段、对话条数；未给 id 时新建会话
async fn api_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<SessionStatus>, (StatusCode, String)> {
    let session = state.sessions.get_or_create(q.session_id.as_deref()).await;
    let session = session
        .try_lock()
        .map_err(|_| (StatusCode::CONFLICT, "a request is in progress".to_string()))?;
    Ok(Json(session.status(state.components.max_steps)))
}

/// POST /api/session/clear：丢弃旧会话，返回新会话的 id，请求体可选 { "session_id": "..." }
async fn api_session_clear(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SessionQuery>>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let session = state
        .sessions
        .reset(req.session_id.as_deref())
        .await
        .map_err(busy)?;
    let id = session.lock().await.id().to_string();
    Ok(Json(serde_json::json!({ "session_id": id })))
}

/// POST /api/chat/stream：第一行是 session_id，之后逐行推送过程事件（NDJSON），最后一行是 final_answer 或 error
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, (StatusCode, String)> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }

    // 同一会话上一轮未结束时直接拒绝，不排队；其他会话不受影响
    let mut session = state
        .sessions
        .acquire(req.session_id.as_deref())
        .await
        .map_err(busy)?;
    let first_line = ndjson_line(&serde_json::json!({
        "type": "session_id",
        "session_id": session.id(),
    }));

    let (event_tx, event_rx) = mpsc::unbounded_channel::<ReactEvent>();
    let state_spawn = Arc::clone(&state);
    tokio::spawn(async move {
        // 错误已通过 error 事件推送
        let _ = session
            .process_message_stream(&state_spawn.components, &message, event_tx)
            .await;
    });

    let stream = stream::try_unfold(
        (event_rx, Some(first_line)),
        |(mut event_rx, first_line_opt)| async move {
            if let Some(line) = first_line_opt {
                return Ok::<_, std::convert::Infallible>(Some((Bytes::from(line), (event_rx, None))));
            }
            Ok(event_rx
                .recv()
                .await
                .map(|ev| (Bytes::from(ndjson_line(&ev)), (event_rx, None))))
        },
    );
    let stream = stream.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) });

    let mut res = Response::new(Body::from_stream(stream));
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/x-ndjson; charset=utf-8"),
    );
    Ok(res)
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Wren</title>
<style>
body { font-family: -apple-system, sans-serif; max-width: 760px; margin: 2em auto; }
#log { white-space: pre-wrap; border: 1px solid #ccc; padding: 1em; min-height: 20em; }
.step { color: #888; } .answer { color: #000; font-weight: bold; } .error { color: #b00; }
</style>
</head>
<body>
<h1>Wren</h1>
<div id="log"></div>
<form id="f"><input id="m" size="70" autofocus> <button>Send</button>
<button type="button" id="clear">Clear</button></form>
<script>
const log = document.getElementById('log');
let sessionId = null;
function add(text, cls) {
  const d = document.createElement('div'); d.className = cls; d.textContent = text; log.appendChild(d);
}
function render(ev) {
  switch (ev.type) {
    case 'session_id': sessionId = ev.session_id; break;
    case 'tool_invoked': add('-> ' + ev.name + ' ' + JSON.stringify(ev.args), 'step'); break;
    case 'tool_result': add('<- ' + ev.name + (ev.ok ? ' [ok] ' : ' [failed] ') + ev.summary, 'step'); break;
    case 'final_answer': add(ev.text, 'answer'); break;
    case 'error': add('Error (' + ev.kind + '): ' + ev.message, 'error'); break;
  }
}
document.getElementById('f').onsubmit = async (e) => {
  e.preventDefault();
  const m = document.getElementById('m'); const message = m.value.trim(); if (!message) return;
  m.value = ''; add('> ' + message, '');
  const res = await fetch('/api/chat/stream', {method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify({message, session_id: sessionId})});
  if (!res.ok) { add('Error: ' + await res.text(), 'error'); return; }
  const reader = res.body.getReader(); const dec = new TextDecoder(); let buf = '';
  for (;;) {
    const {value, done} = await reader.read(); if (done) break;
    buf += dec.decode(value, {stream: true});
    let i; while ((i = buf.indexOf('\n')) >= 0) { const line = buf.slice(0, i); buf = buf.slice(i + 1); if (line) render(JSON.parse(line)); }
  }
};
document.getElementById('clear').onclick = async () => {
  const res = await fetch('/api/session/clear', {method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify({session_id: sessionId})});
  if (!res.ok) { add('Error: ' + await res.text(), 'error'); return; }
  sessionId = (await res.json()).session_id; log.textContent = '';
};
</script>
</body>
</html>
"#;
