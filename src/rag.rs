//! The retrieve → assemble → generate pipeline.
//!
//! [`RagEngine`] owns one embedder, one chat model and one vector store and
//! answers single questions with no conversation memory:
//!
//! 1. embed the question,
//! 2. search the store for the `top_k` nearest chunks scoring at least
//!    `score_threshold`,
//! 3. format the hits into the prompt template,
//! 4. generate (whole, or as a token stream).
//!
//! [`RagEngine::query`] never fails. Pipeline errors come back as a
//! [`RagAnswer`] with an apology, the error string, empty context and
//! zeroed metrics.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::llm::{create_chat_model, ChatModel, ChatRequest, TokenStream};
use crate::models::{AnswerContext, QueryMetrics, RagAnswer, RetrievedChunk};
use crate::prompt;
use crate::vector_store::{create_store, CollectionInfo, VectorStore};

pub struct RagEngine {
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn VectorStore>,
    retrieval: RetrievalConfig,
    llm_provider: String,
    temperature: f32,
    max_tokens: u32,
}

/// Component reachability.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub llm: bool,
    pub embedding: bool,
    pub vector_store: bool,
    pub overall: bool,
}

/// Configuration and live status shown by `hrag status` and `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub version: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub embedding_model: String,
    pub vector_store: String,
    pub collection: String,
    pub collection_info: Option<CollectionInfo>,
    pub top_k: usize,
    pub score_threshold: f32,
    pub health: HealthReport,
}

/// Retrieval done, generation in flight.
pub struct StreamingAnswer {
    pub context: AnswerContext,
    pub tokens: TokenStream,
    metrics: QueryMetrics,
    started: Instant,
    generation_started: Instant,
}

impl StreamingAnswer {
    /// Final metrics, timed up to now. Call after the token stream ends.
    pub fn finish_metrics(&self) -> QueryMetrics {
        let mut metrics = self.metrics.clone();
        metrics.generation_time_ms = elapsed_ms(self.generation_started);
        metrics.total_time_ms = elapsed_ms(self.started);
        metrics
    }
}

struct Retrieval {
    hits: Vec<RetrievedChunk>,
    embedding_time_ms: f64,
    search_time_ms: f64,
}

fn elapsed_ms(since: Instant) -> f64 {
    (since.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

impl RagEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        store: Arc<dyn VectorStore>,
        config: &Config,
    ) -> Self {
        Self {
            embedder,
            llm,
            store,
            retrieval: config.retrieval.clone(),
            llm_provider: config.llm.provider.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        }
    }

    /// Build the providers named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let llm = create_chat_model(&config.llm)?;
        let store = create_store(&config.vector_store)?;
        Ok(Self::new(embedder, llm, store, config))
    }

    pub fn llm(&self) -> &Arc<dyn ChatModel> {
        &self.llm
    }

    /// Embed `question` and return the matching chunks, best first.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>> {
        Ok(self.retrieve_timed(question).await?.hits)
    }

    async fn retrieve_timed(&self, question: &str) -> Result<Retrieval> {
        if question.trim().is_empty() {
            bail!("question must not be empty");
        }

        let t = Instant::now();
        let vector = self
            .embedder
            .embed_query(question)
            .await
            .with_context(|| format!("embedding with '{}' failed", self.embedder.model_name()))?;
        let embedding_time_ms = elapsed_ms(t);

        let t = Instant::now();
        let hits = self
            .store
            .search(
                &vector,
                self.retrieval.top_k,
                self.retrieval.score_threshold,
            )
            .await
            .with_context(|| format!("vector search in '{}' failed", self.store.collection()))?;
        let search_time_ms = elapsed_ms(t);

        tracing::debug!(
            hits = hits.len(),
            embedding_time_ms,
            search_time_ms,
            "retrieved context"
        );

        Ok(Retrieval {
            hits,
            embedding_time_ms,
            search_time_ms,
        })
    }

    fn chat_request(&self, question: &str, hits: &[RetrievedChunk]) -> ChatRequest {
        let context = prompt::format_context(hits, self.retrieval.max_context_chars);
        ChatRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            prompt: prompt::build_user_prompt(question, &context),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn base_metrics(&self, retrieval: &Retrieval) -> QueryMetrics {
        QueryMetrics {
            embedding_time_ms: retrieval.embedding_time_ms,
            search_time_ms: retrieval.search_time_ms,
            documents_retrieved: retrieval.hits.len(),
            average_similarity_score: prompt::average_score(&retrieval.hits),
            llm_model: self.llm.model_name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            ..Default::default()
        }
    }

    /// Answer one question. Failures become an error answer.
    pub async fn query(&self, question: &str) -> RagAnswer {
        match self.try_query(question).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "query failed");
                self.error_answer(question, &format!("{:#}", e))
            }
        }
    }

    /// Like [`query`](Self::query) but propagates the error.
    pub async fn try_query(&self, question: &str) -> Result<RagAnswer> {
        let span = tracing::info_span!("rag_query", question_len = question.len());
        async {
            let started = Instant::now();
            let retrieval = self.retrieve_timed(question).await?;
            let request = self.chat_request(question, &retrieval.hits);

            let t = Instant::now();
            let completion = self
                .llm
                .generate(&request)
                .await
                .with_context(|| format!("generation with '{}' failed", self.llm.model_name()))?;
            let generation_time_ms = elapsed_ms(t);

            let mut metrics = self.base_metrics(&retrieval);
            metrics.generation_time_ms = generation_time_ms;
            metrics.total_time_ms = elapsed_ms(started);
            metrics.prompt_tokens = completion.prompt_tokens;
            metrics.completion_tokens = completion.completion_tokens;

            tracing::info!(
                total_time_ms = metrics.total_time_ms,
                documents = metrics.documents_retrieved,
                "query processed"
            );

            Ok::<_, anyhow::Error>(RagAnswer {
                query: question.to_string(),
                response: completion.text,
                context: AnswerContext {
                    context_summary: prompt::summarize_context(&retrieval.hits),
                    retrieved_documents: retrieval.hits,
                },
                metrics,
                error: None,
            })
        }
        .instrument(span)
        .await
    }

    /// Retrieve, then start a streamed generation.
    pub async fn query_stream(&self, question: &str) -> Result<StreamingAnswer> {
        let started = Instant::now();
        let retrieval = self.retrieve_timed(question).await?;
        let request = self.chat_request(question, &retrieval.hits);

        let generation_started = Instant::now();
        let tokens = self
            .llm
            .generate_stream(&request)
            .await
            .with_context(|| format!("generation with '{}' failed", self.llm.model_name()))?;

        let metrics = self.base_metrics(&retrieval);
        Ok(StreamingAnswer {
            context: AnswerContext {
                context_summary: prompt::summarize_context(&retrieval.hits),
                retrieved_documents: retrieval.hits,
            },
            tokens,
            metrics,
            started,
            generation_started,
        })
    }

    pub fn error_answer(&self, question: &str, error: &str) -> RagAnswer {
        RagAnswer {
            query: question.to_string(),
            response: prompt::error_response(error),
            context: AnswerContext {
                retrieved_documents: Vec::new(),
                context_summary: prompt::ERROR_CONTEXT_SUMMARY.to_string(),
            },
            metrics: QueryMetrics {
                llm_model: self.llm.model_name().to_string(),
                embedding_model: self.embedder.model_name().to_string(),
                ..Default::default()
            },
            error: Some(error.to_string()),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let (llm, embedding, vector_store) = tokio::join!(
            self.llm.health_check(),
            self.embedder.health_check(),
            self.store.health_check()
        );
        HealthReport {
            llm,
            embedding,
            vector_store,
            overall: llm && embedding && vector_store,
        }
    }

    pub async fn system_info(&self) -> SystemInfo {
        let health = self.health().await;
        let collection_info = if health.vector_store {
            match self.store.collection_info().await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(error = %e, "collection info unavailable");
                    None
                }
            }
        } else {
            None
        };

        SystemInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            llm_provider: self.llm_provider.clone(),
            llm_model: self.llm.model_name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            vector_store: self.store.provider().to_string(),
            collection: self.store.collection().to_string(),
            collection_info,
            top_k: self.retrieval.top_k,
            score_threshold: self.retrieval.score_threshold,
            health,
        }
    }
}
