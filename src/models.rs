//! Core data models used throughout the assistant.
//!
//! These types represent the documents, chunks, retrieved context and
//! answers that flow through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};

/// A knowledge-base document before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub source: String,
    pub category: String,
    pub body: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A span of a document's text, as stored in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub title: String,
    pub source: String,
    pub category: String,
    pub text: String,
    pub hash: String,
}

/// A chunk returned by a similarity search, with its score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    #[serde(flatten)]
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Timing and retrieval statistics for one RAG query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub total_time_ms: f64,
    pub embedding_time_ms: f64,
    pub search_time_ms: f64,
    pub generation_time_ms: f64,
    pub documents_retrieved: usize,
    pub average_similarity_score: f32,
    pub llm_model: String,
    pub embedding_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
}

/// Retrieved context attached to an answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerContext {
    pub retrieved_documents: Vec<RetrievedChunk>,
    pub context_summary: String,
}

/// The result of one RAG query, as shown in the UI.
///
/// `error` is set when the pipeline failed; `response` then carries a
/// user-facing apology rather than a generated answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    pub query: String,
    pub response: String,
    pub context: AnswerContext,
    pub metrics: QueryMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RagAnswer {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
