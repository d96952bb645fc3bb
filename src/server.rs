//! Web chat server.
//!
//! Serves a single-page chat UI and a JSON/SSE API over the RAG engine and
//! the agent workflow.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Chat page |
//! | `GET`  | `/health` | Liveness (returns version) |
//! | `GET`  | `/api/status` | Component health, collection info, models, agent metrics |
//! | `POST` | `/api/chat` | `{question, show_context?}` → answer JSON |
//! | `POST` | `/api/chat/stream` | SSE: `context`, `token`…, then `done` or `error` |
//! | `GET`  | `/api/agents` | Registered agent roles |
//! | `POST` | `/api/agents/run` | `{question}` → workflow result JSON |
//! | `POST` | `/api/agents/stream` | SSE: `progress`…, then `result`; stops when the client disconnects |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::agents::{
    registry_from_config, AgentInfo, AgentRegistry, Coordinator, PerformanceMetrics, ProgressFn,
};
use crate::config::Config;
use crate::rag::RagEngine;
use crate::status::{collect_status, StatusReport};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<RagEngine>,
    coordinator: Arc<Coordinator>,
    agents: Arc<Vec<AgentInfo>>,
}

impl AppState {
    /// Wire an engine and an agent registry together.
    ///
    /// The registry must contain the four workflow roles.
    pub fn new(engine: Arc<RagEngine>, registry: &AgentRegistry) -> anyhow::Result<Self> {
        Ok(Self {
            engine,
            coordinator: Arc::new(Coordinator::new(registry)?),
            agents: Arc::new(registry.list()),
        })
    }

    /// Build every provider from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let engine = Arc::new(RagEngine::from_config(config)?);
        let registry = registry_from_config(config, engine.clone())?;
        Self::new(engine, &registry)
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/status", get(handle_status))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/stream", post(handle_chat_stream))
        .route("/api/agents", get(handle_list_agents))
        .route("/api/agents/run", post(handle_agents_run))
        .route("/api/agents/stream", post(handle_agents_stream))
        .layer(cors)
        .with_state(state)
}

/// Serve on an already-bound listener until ctrl-c.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Starts the chat server on `[server].bind`.
///
/// Providers are built up front; an unreachable model or store does not
/// prevent startup and shows up in `/api/status` instead.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let health = state.engine.health().await;
    if !health.overall {
        tracing::warn!(
            llm = health.llm,
            embedding = health.embedding,
            vector_store = health.vector_store,
            "some components are unreachable"
        );
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("health-rag server listening on http://{}", config.server.bind);
    serve(listener, state).await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// A model or vector store call failed.
fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn require_question(question: &str) -> Result<String, AppError> {
    let q = question.trim();
    if q.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    Ok(q.to_string())
}

// ============ Handlers ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: StatusReport,
    agent_metrics: PerformanceMetrics,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: collect_status(&state.engine).await,
        agent_metrics: state.coordinator.metrics(),
    })
}

#[derive(Deserialize)]
struct ChatBody {
    question: String,
    /// Include the retrieved chunks in the answer. Defaults to `true`.
    #[serde(default)]
    show_context: Option<bool>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, AppError> {
    let question = require_question(&body.question)?;
    let mut answer = state
        .engine
        .try_query(&question)
        .await
        .map_err(|e| {
            tracing::error!(error = %format!("{:#}", e), "chat request failed");
            upstream_error(format!("{:#}", e))
        })?;
    if body.show_context == Some(false) {
        answer.context.retrieved_documents.clear();
    }
    Ok(Json(answer).into_response())
}

fn sse_event<T: Serialize>(name: &str, data: &T) -> Event {
    let payload = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string());
    Event::default().event(name).data(payload)
}

fn channel_stream(
    rx: mpsc::UnboundedReceiver<Event>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    })
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let question = require_question(&body.question)?;
    let show_context = body.show_context.unwrap_or(true);
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = state.engine.clone();

    tokio::spawn(async move {
        let mut answer = match engine.query_stream(&question).await {
            Ok(a) => a,
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!(error = %message, "streaming chat failed");
                let _ = tx.send(sse_event(
                    "error",
                    &serde_json::json!({ "message": message }),
                ));
                return;
            }
        };

        let mut context = answer.context.clone();
        if !show_context {
            context.retrieved_documents.clear();
        }
        if tx.send(sse_event("context", &context)).is_err() {
            return;
        }

        let mut response = String::new();
        while let Some(piece) = answer.tokens.next().await {
            match piece {
                Ok(text) => {
                    response.push_str(&text);
                    if tx
                        .send(sse_event("token", &serde_json::json!({ "text": text })))
                        .is_err()
                    {
                        // Client went away.
                        return;
                    }
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    tracing::error!(error = %message, "token stream failed");
                    let _ = tx.send(sse_event(
                        "error",
                        &serde_json::json!({ "message": message }),
                    ));
                    return;
                }
            }
        }

        let metrics = answer.finish_metrics();
        tracing::info!(
            total_time_ms = metrics.total_time_ms,
            chars = response.chars().count(),
            "streamed answer"
        );
        let _ = tx.send(sse_event(
            "done",
            &serde_json::json!({ "response": response, "metrics": metrics }),
        ));
    });

    Ok(Sse::new(channel_stream(rx)).keep_alive(KeepAlive::default()))
}

async fn handle_list_agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "agents": &*state.agents }))
}

#[derive(Deserialize)]
struct AgentsBody {
    question: String,
}

async fn handle_agents_run(
    State(state): State<AppState>,
    Json(body): Json<AgentsBody>,
) -> Result<Response, AppError> {
    let question = require_question(&body.question)?;
    let result = state
        .coordinator
        .run(&question, None)
        .await
        .map_err(|e| internal_error(format!("{:#}", e)))?;
    Ok(Json(result).into_response())
}

async fn handle_agents_stream(
    State(state): State<AppState>,
    Json(body): Json<AgentsBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let question = require_question(&body.question)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let coordinator = state.coordinator.clone();

    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let progress = move |line: &str| {
            let _ = progress_tx.send(sse_event(
                "progress",
                &serde_json::json!({ "message": line }),
            ));
        };
        let outcome = tokio::select! {
            outcome = coordinator.run(&question, Some(&progress as &ProgressFn)) => outcome,
            _ = tx.closed() => {
                tracing::info!("client disconnected, agent workflow cancelled");
                return;
            }
        };
        match outcome {
            Ok(result) => {
                let _ = tx.send(sse_event("result", &result));
            }
            Err(e) => {
                let _ = tx.send(sse_event(
                    "error",
                    &serde_json::json!({ "message": format!("{:#}", e) }),
                ));
            }
        }
    });

    Ok(Sse::new(channel_stream(rx)).keep_alive(KeepAlive::default()))
}

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Healthcare RAG Assistant</title>
<meta name="viewport" content="width=device-width, initial-scale=1">
<style>
  body { font-family: system-ui, sans-serif; max-width: 860px; margin: 2rem auto; padding: 0 1rem; color: #1f2933; }
  h1 { font-size: 1.5rem; }
  .note { background: #fff7e6; border-left: 4px solid #f0a500; padding: .5rem .75rem; font-size: .9rem; }
  form { display: flex; gap: .5rem; margin: 1rem 0; }
  input[type=text] { flex: 1; padding: .6rem; font-size: 1rem; }
  button { padding: .6rem 1rem; font-size: 1rem; cursor: pointer; }
  .opts { display: flex; gap: 1.5rem; font-size: .9rem; }
  #answer { white-space: pre-wrap; border: 1px solid #d9e2ec; border-radius: 6px; padding: 1rem; min-height: 6rem; }
  #context { font-size: .85rem; color: #52606d; white-space: pre-wrap; }
  #progress { font-size: .85rem; color: #52606d; }
  .err { color: #b42318; }
</style>
</head>
<body>
<h1>Healthcare RAG Assistant</h1>
<p class="note">Educational information only. This assistant does not provide medical advice;
consult a healthcare professional about your situation.</p>
<form id="ask">
  <input type="text" id="question" placeholder="Ask a health question, e.g. What are symptoms of diabetes?" autofocus>
  <button type="submit">Ask</button>
</form>
<div class="opts">
  <label><input type="checkbox" id="showContext"> Show retrieved context</label>
  <label><input type="checkbox" id="useAgents"> Use multi-agent workflow</label>
</div>
<h3>Answer</h3>
<div id="progress"></div>
<div id="answer"></div>
<h3>Context</h3>
<div id="context"></div>
<script>
async function readSse(resp, onEvent) {
  const reader = resp.body.getReader();
  const decoder = new TextDecoder();
  let buf = "";
  for (;;) {
    const { value, done } = await reader.read();
    if (done) break;
    buf += decoder.decode(value, { stream: true });
    let idx;
    while ((idx = buf.indexOf("\n\n")) >= 0) {
      const block = buf.slice(0, idx);
      buf = buf.slice(idx + 2);
      let name = "message", data = "";
      for (const line of block.split("\n")) {
        if (line.startsWith("event:")) name = line.slice(6).trim();
        else if (line.startsWith("data:")) data += line.slice(5).trim();
      }
      if (data) onEvent(name, JSON.parse(data));
    }
  }
}

function showContext(ctx) {
  const el = document.getElementById("context");
  if (!document.getElementById("showContext").checked) { el.textContent = ""; return; }
  const docs = (ctx.retrieved_documents || []).map((d, i) =>
    `${i + 1}. ${d.title} (${d.source || "Unknown"}, score ${d.score.toFixed(3)})`);
  el.textContent = ctx.context_summary + "\n" + docs.join("\n");
}

document.getElementById("ask").addEventListener("submit", async (ev) => {
  ev.preventDefault();
  const question = document.getElementById("question").value.trim();
  if (!question) return;
  const answer = document.getElementById("answer");
  const progress = document.getElementById("progress");
  answer.textContent = ""; answer.className = ""; progress.textContent = "";
  document.getElementById("context").textContent = "";
  const agents = document.getElementById("useAgents").checked;
  const url = agents ? "/api/agents/stream" : "/api/chat/stream";
  const resp = await fetch(url, {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify({ question, show_context: true }),
  });
  if (!resp.ok) {
    const body = await resp.json().catch(() => ({}));
    answer.className = "err";
    answer.textContent = (body.error && body.error.message) || resp.statusText;
    return;
  }
  await readSse(resp, (name, data) => {
    if (name === "context") showContext(data);
    else if (name === "token") answer.textContent += data.text;
    else if (name === "progress") progress.textContent += data.message + "\n";
    else if (name === "result") {
      answer.textContent = data.final_response;
      const s = data.summary;
      progress.textContent += `Status: ${s.workflow_status} (${s.successful_agents}/${s.total_agents} agents)\n`;
    } else if (name === "done") {
      const m = data.metrics;
      progress.textContent = `${m.documents_retrieved} documents, ${m.total_time_ms.toFixed(0)} ms`;
    } else if (name === "error") {
      answer.className = "err";
      answer.textContent = data.message;
    }
  });
});
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_question() {
        assert!(require_question("   ").is_err());
        assert_eq!(require_question("  What is BMI? ").ok().as_deref(), Some("What is BMI?"));
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: "upstream_error".into(),
                message: "ollama down".into(),
            },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["error"]["code"], "upstream_error");
        assert_eq!(upstream_error("x").status, StatusCode::BAD_GATEWAY);
    }
}
