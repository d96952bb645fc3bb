//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers everything the ingestion and query
//! pipelines need from a similarity-search backend. Implementations:
//!
//! - [`memory::MemoryStore`]: brute-force cosine search in process memory.
//! - [`qdrant::QdrantStore`]: Qdrant REST API.
//! - [`azure_search::AzureSearchStore`]: Azure AI Search REST API.
//!
//! Every backend returns at most `top_k` hits, each scoring at least the
//! threshold, highest score first. Backends that cannot filter by score
//! server-side filter the response through [`apply_retrieval_policy`].

pub mod azure_search;
pub mod memory;
pub mod qdrant;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::VectorStoreConfig;
use crate::models::{DocumentChunk, RetrievedChunk};

/// A chunk together with its embedding, ready to be written.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub chunk: DocumentChunk,
    pub vector: Vec<f32>,
}

/// Collection (or index) metadata reported by a backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub vector_size: Option<usize>,
    pub distance: String,
    pub points_count: Option<u64>,
    pub status: String,
}

/// What [`VectorStore::ensure_collection`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    /// The collection existed with the right vector size.
    Existing,
    Created,
    /// The collection existed with a different vector size (or a rebuild
    /// was requested) and was dropped and created again.
    Recreated,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name (`memory`, `qdrant`, `azure_search`).
    fn provider(&self) -> &str;

    /// Collection or index name.
    fn collection(&self) -> &str;

    /// Make sure the collection exists with vectors of size `dims`.
    ///
    /// A collection with a different vector size is recreated; so is any
    /// existing collection when `recreate` is true.
    async fn ensure_collection(&self, dims: usize, recreate: bool) -> Result<EnsureOutcome>;

    /// Insert or overwrite points by chunk id.
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedChunk>>;

    /// `None` when the collection does not exist.
    async fn collection_info(&self) -> Result<Option<CollectionInfo>>;

    /// Returns `false` when there was nothing to delete.
    async fn delete_collection(&self) -> Result<bool>;

    async fn health_check(&self) -> bool;
}

/// Instantiate the backend named by `config.provider`.
pub fn create_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryStore::new(&config.collection))),
        "qdrant" => Ok(Arc::new(qdrant::QdrantStore::new(config)?)),
        "azure_search" => Ok(Arc::new(azure_search::AzureSearchStore::new(config)?)),
        other => bail!("Unknown vector_store provider: {}", other),
    }
}

/// Drop hits under the threshold, sort by descending score, keep `top_k`.
pub fn apply_retrieval_policy(
    mut hits: Vec<RetrievedChunk>,
    top_k: usize,
    score_threshold: f32,
) -> Vec<RetrievedChunk> {
    hits.retain(|h| h.score >= score_threshold);
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

/// Chunk fields stored next to each vector.
pub(crate) fn chunk_payload(chunk: &DocumentChunk) -> serde_json::Value {
    serde_json::json!({
        "document_id": chunk.document_id,
        "chunk_index": chunk.chunk_index,
        "title": chunk.title,
        "source": chunk.source,
        "category": chunk.category,
        "text": chunk.text,
        "hash": chunk.hash,
    })
}

/// Rebuild a chunk from a stored payload. Missing fields become empty.
pub(crate) fn chunk_from_payload(id: String, payload: &serde_json::Value) -> DocumentChunk {
    let field = |name: &str| {
        payload
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    DocumentChunk {
        id,
        document_id: field("document_id"),
        chunk_index: payload
            .get("chunk_index")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        title: field("title"),
        source: field("source"),
        category: field("category"),
        text: field("text"),
        hash: field("hash"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: chunk_from_payload(id.to_string(), &serde_json::json!({})),
            score,
        }
    }

    #[test]
    fn test_policy_filters_sorts_and_truncates() {
        let hits = vec![hit("a", 0.2), hit("b", 0.9), hit("c", 0.5), hit("d", 0.7)];
        let out = apply_retrieval_policy(hits, 2, 0.3);
        let ids: Vec<_> = out.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let out = apply_retrieval_policy(vec![hit("a", 0.3)], 5, 0.3);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_payload_roundtrip_keeps_metadata() {
        let chunk = DocumentChunk {
            id: "p1".into(),
            document_id: "d1".into(),
            chunk_index: 2,
            title: "First Aid Essentials".into(),
            source: "Emergency Medicine".into(),
            category: "emergency".into(),
            text: "Apply pressure to bleeding wounds.".into(),
            hash: "abc".into(),
        };
        let back = chunk_from_payload("p1".into(), &chunk_payload(&chunk));
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_create_store_memory() {
        let cfg = VectorStoreConfig {
            provider: "memory".into(),
            ..Default::default()
        };
        let store = create_store(&cfg).unwrap();
        assert_eq!(store.provider(), "memory");
        assert_eq!(store.collection(), "healthcare_docs");
    }
}
