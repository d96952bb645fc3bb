//! End-to-end tests for the web chat server.
//!
//! The server runs in-process on a free port with a deterministic embedder,
//! a scripted chat model and the in-memory vector store loaded with the
//! built-in corpus.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use health_rag::agents::{AgentRegistry, AgentSettings};
use health_rag::config::Config;
use health_rag::corpus::builtin_documents;
use health_rag::embedding::Embedder;
use health_rag::ingest::{ingest_documents, IngestOptions};
use health_rag::llm::{ChatModel, ChatRequest, Completion, TokenStream};
use health_rag::rag::RagEngine;
use health_rag::server::{serve, AppState};
use health_rag::vector_store::memory::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

// ─── Fakes ──────────────────────────────────────────────────────────

const TOPICS: [&str; 4] = ["diabetes", "sleep", "heart", "exercise"];

struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-embed"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v: Vec<f32> = TOPICS
                    .iter()
                    .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                    .collect();
                v.push(0.1);
                v
            })
            .collect())
    }
}

/// Answers with a fixed sentence after `delay`; fails every call when
/// `fail` is set.
struct ScriptedModel {
    fail: bool,
    delay: Duration,
}

const ANSWER: &str = "Regular checkups help. Please consult a healthcare professional.";

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ChatRequest) -> Result<Completion> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            bail!("model offline");
        }
        let text = if request.prompt.contains("Document 1") {
            ANSWER.to_string()
        } else {
            format!("{} (no context)", ANSWER)
        };
        Ok(Completion {
            text,
            prompt_tokens: Some(100),
            completion_tokens: Some(12),
        })
    }

    async fn generate_stream(&self, _request: &ChatRequest) -> Result<TokenStream> {
        if self.fail {
            bail!("model offline");
        }
        let words: Vec<Result<String>> = ANSWER
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(futures::stream::iter(words).boxed())
    }

    async fn health_check(&self) -> bool {
        !self.fail
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start_server(fail: bool) -> String {
    start_server_with(ScriptedModel {
        fail,
        delay: Duration::ZERO,
    })
    .await
}

async fn start_server_with(model: ScriptedModel) -> String {
    let config = Config::minimal();
    let store = Arc::new(MemoryStore::new("healthcare_docs"));
    ingest_documents(
        &config,
        &builtin_documents(),
        Some(&TopicEmbedder),
        Some(store.as_ref()),
        &IngestOptions::default(),
    )
    .await
    .unwrap();

    let llm: Arc<dyn ChatModel> = Arc::new(model);
    let engine = Arc::new(RagEngine::new(
        Arc::new(TopicEmbedder),
        llm.clone(),
        store,
        &config,
    ));
    let registry =
        AgentRegistry::healthcare(engine.clone(), llm, AgentSettings::from_config(&config));
    let state = AppState::new(engine, &registry).unwrap();

    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        serve(listener, state).await.unwrap();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

/// Split a `text/event-stream` body into `(event, data)` pairs.
fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim_start());
                }
            }
            let name = name?;
            Some((name, serde_json::from_str(&data).unwrap_or(Value::Null)))
        })
        .collect()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_and_index_page() {
    let base = start_server(false).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let page = client.get(&base).send().await.unwrap();
    assert!(page
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert!(page.text().await.unwrap().contains("Healthcare RAG Assistant"));
}

#[tokio::test]
async fn test_chat_returns_grounded_answer() {
    let base = start_server(false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({ "question": "What are common symptoms of diabetes?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["response"], ANSWER);
    assert!(body["error"].is_null());
    let docs = body["context"]["retrieved_documents"].as_array().unwrap();
    assert!(!docs.is_empty() && docs.len() <= 5);
    assert!(docs[0]["text"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("diabetes"));
    let scores: Vec<f64> = docs.iter().map(|d| d["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(body["metrics"]["llm_model"], "scripted");
    assert_eq!(body["metrics"]["documents_retrieved"], docs.len());
}

#[tokio::test]
async fn test_chat_without_context() {
    let base = start_server(false).await;
    let body: Value = reqwest::Client::new()
        .post(format!("{}/api/chat", base))
        .json(&json!({ "question": "How much sleep do I need?", "show_context": false }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["context"]["retrieved_documents"]
        .as_array()
        .unwrap()
        .is_empty());
    assert!(body["context"]["context_summary"]
        .as_str()
        .unwrap()
        .starts_with("Retrieved"));
}

#[tokio::test]
async fn test_chat_rejects_empty_question() {
    let base = start_server(false).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat", base))
        .json(&json!({ "question": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_chat_maps_model_failure_to_502() {
    let base = start_server(true).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat", base))
        .json(&json!({ "question": "What is a healthy heart rate?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "upstream_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("model offline"));
}

#[tokio::test]
async fn test_chat_stream_event_order() {
    let base = start_server(false).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat/stream", base))
        .json(&json!({ "question": "Tips for better sleep?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = parse_sse(&resp.text().await.unwrap());
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names.first(), Some(&"context"));
    assert_eq!(names.last(), Some(&"done"));
    assert!(names[1..names.len() - 1].iter().all(|n| *n == "token"));

    let streamed: String = events
        .iter()
        .filter(|(n, _)| n == "token")
        .map(|(_, d)| d["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(streamed, ANSWER);

    let (_, done) = events.last().unwrap();
    assert_eq!(done["response"], ANSWER);
    assert!(done["metrics"]["documents_retrieved"].as_u64().unwrap() >= 1);
    let (_, context) = &events[0];
    assert!(context["retrieved_documents"].as_array().is_some());
}

#[tokio::test]
async fn test_chat_stream_reports_error_event() {
    let base = start_server(true).await;
    let body = reqwest::Client::new()
        .post(format!("{}/api/chat/stream", base))
        .json(&json!({ "question": "What is hypertension?" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events = parse_sse(&body);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "error");
    assert!(events[0].1["message"]
        .as_str()
        .unwrap()
        .contains("model offline"));
}

#[tokio::test]
async fn test_agents_list_run_and_status() {
    let base = start_server(false).await;
    let client = reqwest::Client::new();

    let agents: Value = client
        .get(format!("{}/api/agents", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = agents["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["research", "analysis", "synthesis", "coordinator"]);

    let result: Value = client
        .post(format!("{}/api/agents/run", base))
        .json(&json!({ "question": "How does exercise help heart health?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["summary"]["workflow_status"], "completed");
    assert_eq!(result["summary"]["successful_agents"], 3);
    assert_eq!(result["research"]["status"], "completed");
    assert!(!result["final_response"].as_str().unwrap().is_empty());

    let status: Value = client
        .get(format!("{}/api/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["health"]["overall"], true);
    assert_eq!(status["llm_model"], "scripted");
    assert_eq!(status["available_models"], json!(["scripted"]));
    assert_eq!(status["model_available"], true);
    assert_eq!(status["agent_metrics"]["total_queries"], 1);
    assert!(status["collection_info"]["points_count"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_agents_stream_progress_then_result() {
    let base = start_server(false).await;
    let body = reqwest::Client::new()
        .post(format!("{}/api/agents/stream", base))
        .json(&json!({ "question": "What are diabetes warning signs?" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let events = parse_sse(&body);
    let (last, result) = events.last().unwrap();
    assert_eq!(last, "result");
    assert_eq!(result["summary"]["workflow_status"], "completed");

    let progress: Vec<&str> = events
        .iter()
        .filter(|(n, _)| n == "progress")
        .map(|(_, d)| d["message"].as_str().unwrap())
        .collect();
    assert_eq!(progress.first(), Some(&"Starting multi-agent workflow"));
    assert!(progress.contains(&"research agent started"));
    assert!(progress
        .iter()
        .any(|p| p.starts_with("Workflow completed: 3/3 agents succeeded")));
}

#[tokio::test]
async fn test_agents_run_rejects_empty_question() {
    let base = start_server(false).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/agents/run", base))
        .json(&json!({ "question": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_agents_stream_stops_when_client_disconnects() {
    let base = start_server_with(ScriptedModel {
        fail: false,
        delay: Duration::from_millis(400),
    })
    .await;
    let client = reqwest::Client::new();

    let mut resp = client
        .post(format!("{}/api/agents/stream", base))
        .json(&json!({ "question": "How much sleep do adults need?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let first = resp.chunk().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("progress"));
    drop(resp);

    // Long enough for all three model rounds to have finished.
    tokio::time::sleep(Duration::from_millis(2000)).await;
    let status: Value = client
        .get(format!("{}/api/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["agent_metrics"]["total_queries"], 0);
}
