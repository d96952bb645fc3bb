//! Qdrant backend over the REST API (default port 6333).
//!
//! Collections use cosine distance. Each point's payload carries the chunk
//! text and metadata; the point id is the chunk id.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use super::{
    apply_retrieval_policy, chunk_from_payload, chunk_payload, CollectionInfo, EnsureOutcome,
    VectorPoint, VectorStore,
};
use crate::config::VectorStoreConfig;
use crate::http::{build_client, send_with_retry};
use crate::models::RetrievedChunk;

const MAX_RETRIES: u32 = 2;

pub struct QdrantStore {
    client: reqwest::Client,
    url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config.endpoint(),
            collection: config.collection.clone(),
            api_key: config.api_key()?,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, format!("{}{}", self.url, path));
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    fn collection_path(&self) -> String {
        format!("/collections/{}", self.collection)
    }

    async fn create(&self, dims: usize) -> Result<()> {
        let body = serde_json::json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });
        send_with_retry("Qdrant", MAX_RETRIES, || {
            self.request(reqwest::Method::PUT, &self.collection_path())
                .json(&body)
        })
        .await
        .with_context(|| format!("failed to create collection '{}'", self.collection))?;
        tracing::info!(collection = %self.collection, dims, "created collection");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn provider(&self) -> &str {
        "qdrant"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn ensure_collection(&self, dims: usize, recreate: bool) -> Result<EnsureOutcome> {
        match self.collection_info().await? {
            None => {
                self.create(dims).await?;
                Ok(EnsureOutcome::Created)
            }
            Some(info) if info.vector_size == Some(dims) && !recreate => {
                tracing::info!(collection = %self.collection, "using existing collection");
                Ok(EnsureOutcome::Existing)
            }
            Some(info) => {
                tracing::warn!(
                    collection = %self.collection,
                    existing = ?info.vector_size,
                    dims,
                    "recreating collection"
                );
                self.delete_collection().await?;
                self.create(dims).await?;
                Ok(EnsureOutcome::Recreated)
            }
        }
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        let points: Vec<serde_json::Value> = points
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.chunk.id,
                    "vector": p.vector,
                    "payload": chunk_payload(&p.chunk),
                })
            })
            .collect();
        let body = serde_json::json!({ "points": points });
        let path = format!("{}/points?wait=true", self.collection_path());

        send_with_retry("Qdrant", MAX_RETRIES, || {
            self.request(reqwest::Method::PUT, &path).json(&body)
        })
        .await
        .with_context(|| format!("failed to upsert into '{}'", self.collection))?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let body = serde_json::json!({
            "vector": vector,
            "limit": top_k,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        let path = format!("{}/points/search", self.collection_path());

        let response = send_with_retry("Qdrant", MAX_RETRIES, || {
            self.request(reqwest::Method::POST, &path).json(&body)
        })
        .await
        .with_context(|| {
            format!(
                "search in '{}' failed (does the query vector size of {} match the collection?)",
                self.collection,
                vector.len()
            )
        })?;

        let json: serde_json::Value = response.json().await?;
        let hits = parse_search_response(&json)?;
        tracing::debug!(collection = %self.collection, hits = hits.len(), "qdrant search");
        Ok(apply_retrieval_policy(hits, top_k, score_threshold))
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let response = self
            .request(reqwest::Method::GET, &self.collection_path())
            .send()
            .await
            .with_context(|| format!("is Qdrant running at {}?", self.url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Qdrant API error {}: {}", status, body));
        }

        let json: serde_json::Value = response.json().await?;
        Ok(Some(parse_collection_info(&self.collection, &json)))
    }

    async fn delete_collection(&self) -> Result<bool> {
        let response = send_with_retry("Qdrant", MAX_RETRIES, || {
            self.request(reqwest::Method::DELETE, &self.collection_path())
        })
        .await
        .with_context(|| format!("failed to delete collection '{}'", self.collection))?;
        let json: serde_json::Value = response.json().await.unwrap_or_default();
        Ok(json.get("result").and_then(|r| r.as_bool()).unwrap_or(true))
    }

    async fn health_check(&self) -> bool {
        match self.request(reqwest::Method::GET, "/collections").send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Parse `{"result": [{"id", "score", "payload"}]}`.
pub fn parse_search_response(json: &serde_json::Value) -> Result<Vec<RetrievedChunk>> {
    let result = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result array"))?;

    Ok(result
        .iter()
        .map(|hit| {
            let id = match hit.get("id") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let empty = serde_json::Value::Null;
            let payload = hit.get("payload").unwrap_or(&empty);
            RetrievedChunk {
                chunk: chunk_from_payload(id, payload),
                score: hit.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
            }
        })
        .collect())
}

pub fn parse_collection_info(name: &str, json: &serde_json::Value) -> CollectionInfo {
    let vectors = json.pointer("/result/config/params/vectors");
    CollectionInfo {
        name: name.to_string(),
        vector_size: vectors
            .and_then(|v| v.get("size"))
            .and_then(|s| s.as_u64())
            .map(|s| s as usize),
        distance: vectors
            .and_then(|v| v.get("distance"))
            .and_then(|d| d.as_str())
            .unwrap_or("unknown")
            .to_string(),
        points_count: json.pointer("/result/points_count").and_then(|c| c.as_u64()),
        status: json
            .pointer("/result/status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_response() {
        let json = serde_json::json!({
            "result": [
                {
                    "id": "2b6a1c3e-0000-5000-8000-000000000000",
                    "score": 0.82,
                    "payload": {
                        "title": "Sleep and Health",
                        "source": "Sleep Medicine Research",
                        "text": "Adults need 7-9 hours.",
                        "chunk_index": 0
                    }
                },
                { "id": 7, "score": 0.41, "payload": {} }
            ],
            "status": "ok"
        });
        let hits = parse_search_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.title, "Sleep and Health");
        assert_eq!(hits[1].chunk.id, "7");
        assert!((hits[0].score - 0.82).abs() < 1e-6);
    }

    #[test]
    fn test_parse_collection_info() {
        let json = serde_json::json!({
            "result": {
                "status": "green",
                "points_count": 42,
                "config": { "params": { "vectors": { "size": 768, "distance": "Cosine" } } }
            }
        });
        let info = parse_collection_info("healthcare_docs", &json);
        assert_eq!(info.vector_size, Some(768));
        assert_eq!(info.points_count, Some(42));
        assert_eq!(info.distance, "Cosine");
        assert_eq!(info.status, "green");
    }

    #[test]
    fn test_parse_search_rejects_garbage() {
        assert!(parse_search_response(&serde_json::json!({"status": "error"})).is_err());
    }
}
