//! Chat-completion providers.
//!
//! [`ChatModel`] is the seam between the RAG engine / agent workflow and a
//! hosted language model. Two wire protocols are supported:
//!
//! | Provider | Endpoint | Streaming format |
//! |----------|----------|------------------|
//! | `ollama` | `POST /api/generate` | newline-delimited JSON |
//! | `openai`, `azure_openai` | `POST {base}/chat/completions` | server-sent events, `[DONE]` |
//!
//! Streams yield text deltas. Dropping the stream closes the connection.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::http::{build_client, openai_url, probe, send_with_retry, ApiAuth};

/// A stream of generated text deltas.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// One generation request: a system prompt plus a single user turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A complete (non-streamed) generation.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &ChatRequest) -> Result<Completion>;

    async fn generate_stream(&self, request: &ChatRequest) -> Result<TokenStream>;

    /// Whether the model service answers at all.
    async fn health_check(&self) -> bool;

    /// Models the service reports as available.
    async fn list_models(&self) -> Result<Vec<String>>;
}

/// Create the [`ChatModel`] named by `config.provider`.
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        "openai" | "azure_openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config.endpoint(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": stream,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ChatRequest) -> Result<Completion> {
        let endpoint = format!("{}/api/generate", self.url);
        let body = self.body(request, false);

        let response = send_with_retry("Ollama", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .with_context(|| format!("generation with model '{}' failed", self.model))?;

        let json: serde_json::Value = response.json().await?;
        parse_ollama_completion(&json)
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<TokenStream> {
        let endpoint = format!("{}/api/generate", self.url);
        let body = self.body(request, true);

        let response = send_with_retry("Ollama", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .with_context(|| format!("generation with model '{}' failed", self.model))?;

        Ok(deltas(
            lines(response.bytes_stream()).map(|line| line.and_then(|l| parse_ollama_line(&l))),
        ))
    }

    async fn health_check(&self) -> bool {
        probe(&self.client, &format!("{}/", self.url)).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let endpoint = format!("{}/api/tags", self.url);
        let response = send_with_retry("Ollama", 0, || self.client.get(&endpoint)).await?;
        let json: serde_json::Value = response.json().await?;
        Ok(json
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub fn parse_ollama_completion(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))?;
    Ok(Completion {
        text: text.to_string(),
        prompt_tokens: json.get("prompt_eval_count").and_then(|v| v.as_u64()),
        completion_tokens: json.get("eval_count").and_then(|v| v.as_u64()),
    })
}

// ============ OpenAI-compatible ============

pub struct OpenAIChat {
    client: reqwest::Client,
    endpoint: String,
    models_endpoint: String,
    auth: ApiAuth,
    model: String,
    max_retries: u32,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let key = config.api_key()?;
        let base = config.endpoint();
        let version = config.api_version.as_deref();
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: openai_url(&config.provider, &base, &config.model, version, "chat/completions"),
            models_endpoint: openai_url(&config.provider, &base, &config.model, version, "models"),
            auth: ApiAuth::for_provider(&config.provider, key),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ChatRequest) -> Result<Completion> {
        let body = self.body(request, false);
        let response = send_with_retry("OpenAI", self.max_retries, || {
            self.auth.apply(self.client.post(&self.endpoint)).json(&body)
        })
        .await
        .with_context(|| format!("chat completion with model '{}' failed", self.model))?;

        let json: serde_json::Value = response.json().await?;
        parse_openai_completion(&json)
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<TokenStream> {
        let body = self.body(request, true);
        let response = send_with_retry("OpenAI", self.max_retries, || {
            self.auth.apply(self.client.post(&self.endpoint)).json(&body)
        })
        .await
        .with_context(|| format!("chat completion with model '{}' failed", self.model))?;

        Ok(sse_deltas(response.bytes_stream()))
    }

    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = send_with_retry("OpenAI", 0, || {
            self.auth.apply(self.client.get(&self.models_endpoint))
        })
        .await?;
        let json: serde_json::Value = response.json().await?;
        Ok(json
            .get("data")
            .and_then(|d| d.as_array())
            .map(|data| {
                data.iter()
                    .filter_map(|m| m.get("id").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub fn parse_openai_completion(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?;
    Ok(Completion {
        text: text.to_string(),
        prompt_tokens: json.pointer("/usage/prompt_tokens").and_then(|v| v.as_u64()),
        completion_tokens: json
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64()),
    })
}

// ============ Stream decoding ============

/// What one line of a streamed response means.
#[derive(Debug, PartialEq)]
pub enum StreamPiece {
    Text(String),
    Done,
    Skip,
}

/// Decode one NDJSON line from `/api/generate`.
pub fn parse_ollama_line(line: &str) -> Result<StreamPiece> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StreamPiece::Skip);
    }
    let json: serde_json::Value =
        serde_json::from_str(line).context("Invalid Ollama stream chunk")?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama stream error: {}", err);
    }
    if json.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
        return Ok(StreamPiece::Done);
    }
    match json.get("response").and_then(|r| r.as_str()) {
        Some(text) if !text.is_empty() => Ok(StreamPiece::Text(text.to_string())),
        _ => Ok(StreamPiece::Skip),
    }
}

/// Decode the `data` of one `/chat/completions` event.
pub fn parse_sse_data(data: &str) -> Result<StreamPiece> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(StreamPiece::Skip);
    }
    if data == "[DONE]" {
        return Ok(StreamPiece::Done);
    }
    let json: serde_json::Value = serde_json::from_str(data).context("Invalid SSE chunk")?;
    match json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => Ok(StreamPiece::Text(text.to_string())),
        _ => Ok(StreamPiece::Skip),
    }
}

/// Decode an SSE byte stream into text deltas.
pub fn sse_deltas<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    deltas(bytes.eventsource().map(|event| {
        event
            .map_err(|e| anyhow!("stream read failed: {}", e))
            .and_then(|event| parse_sse_data(&event.data))
    }))
}

/// Keep the text pieces, stopping at the first `Done`.
fn deltas<S>(pieces: S) -> TokenStream
where
    S: Stream<Item = Result<StreamPiece>> + Send + 'static,
{
    pieces
        .try_take_while(|piece| futures::future::ready(Ok(*piece != StreamPiece::Done)))
        .try_filter_map(|piece| {
            futures::future::ready(Ok(match piece {
                StreamPiece::Text(t) => Some(t),
                _ => None,
            }))
        })
        .boxed()
}

struct LineState<S> {
    inner: std::pin::Pin<Box<S>>,
    buf: Vec<u8>,
    eof: bool,
}

/// Split a byte stream into lines (without the trailing `\n` / `\r\n`).
/// A final line without a newline is still yielded.
pub fn lines<S, B, E>(inner: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = LineState {
        inner: Box::pin(inner),
        buf: Vec::new(),
        eof: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = st.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                return Some((Ok(line), st));
            }
            if st.eof {
                if st.buf.is_empty() {
                    return None;
                }
                let raw = std::mem::take(&mut st.buf);
                let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                return Some((Ok(line), st));
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => st.buf.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    st.eof = true;
                    st.buf.clear();
                    return Some((Err(anyhow!("stream read failed: {}", e)), st));
                }
                None => st.eof = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> {
        let owned: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    fn ollama_deltas(parts: &[&str]) -> TokenStream {
        deltas(lines(chunks(parts)).map(|line| line.and_then(|l| parse_ollama_line(&l))))
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let out: Vec<String> = lines(chunks(&["ab", "c\nde", "f\r\n", "tail"]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(out, vec!["abc", "def", "tail"]);
    }

    #[tokio::test]
    async fn test_ollama_stream_stops_at_done() {
        let body = [
            "{\"response\":\"Drink \",\"done\":false}\n",
            "{\"response\":\"water.\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n",
            "{\"response\":\"ignored\",\"done\":false}\n",
        ];
        let out: Vec<String> = ollama_deltas(&body).try_collect().await.unwrap();
        assert_eq!(out.concat(), "Drink water.");
    }

    #[tokio::test]
    async fn test_sse_stream() {
        let body = [
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Rest\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" well\"}}]}\n\ndata: [DONE]\n\n",
        ];
        let out: Vec<String> = sse_deltas(chunks(&body)).try_collect().await.unwrap();
        assert_eq!(out, vec!["Rest", " well"]);
    }

    #[tokio::test]
    async fn test_sse_event_data_spanning_lines() {
        let body = [
            "data: {\"choices\":[{\"delta\":\n",
            "data: {\"content\":\"Hi\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ];
        let out: Vec<String> = sse_deltas(chunks(&body)).try_collect().await.unwrap();
        assert_eq!(out, vec!["Hi"]);
    }

    #[tokio::test]
    async fn test_sse_invalid_json_is_an_error() {
        let body = ["data: {not json}\n\n"];
        let result: Result<Vec<String>> = sse_deltas(chunks(&body)).try_collect().await;
        assert!(result.unwrap_err().to_string().contains("Invalid SSE chunk"));
    }

    #[tokio::test]
    async fn test_stream_error_line_surfaces() {
        let body = ["{\"error\":\"model 'x' not found\"}\n"];
        let result: Result<Vec<String>> = ollama_deltas(&body).try_collect().await;
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_parse_ollama_completion_with_counts() {
        let json = serde_json::json!({
            "response": "Hello",
            "prompt_eval_count": 12,
            "eval_count": 3,
            "done": true
        });
        let c = parse_ollama_completion(&json).unwrap();
        assert_eq!(c.text, "Hello");
        assert_eq!(c.prompt_tokens, Some(12));
        assert_eq!(c.completion_tokens, Some(3));
    }

    #[test]
    fn test_parse_openai_completion() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hi" } }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 1 }
        });
        let c = parse_openai_completion(&json).unwrap();
        assert_eq!(c.text, "Hi");
        assert_eq!(c.completion_tokens, Some(1));
        assert!(parse_openai_completion(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_create_chat_model_unknown_provider() {
        let cfg = LlmConfig {
            provider: "bard".into(),
            ..Default::default()
        };
        assert!(create_chat_model(&cfg).is_err());
    }
}
