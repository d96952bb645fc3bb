//! Azure AI Search backend over the REST API.
//!
//! The index holds one document per chunk with a vector field (default
//! `content_vector`) configured for HNSW with cosine metric. Azure reports
//! cosine hits as `1 / (1 + (1 - cos))`; scores are converted back to
//! cosine similarity so the configured threshold means the same thing for
//! every backend. The threshold is applied client-side.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};

use super::{
    apply_retrieval_policy, CollectionInfo, EnsureOutcome, VectorPoint, VectorStore,
};
use crate::config::VectorStoreConfig;
use crate::http::{build_client, send_with_retry};
use crate::models::{DocumentChunk, RetrievedChunk};

const MAX_RETRIES: u32 = 2;
const SELECT_FIELDS: &str = "id,document_id,chunk_index,title,source,category,content,hash";

pub struct AzureSearchStore {
    client: reqwest::Client,
    endpoint: String,
    index: String,
    api_key: String,
    api_version: String,
    vector_field: String,
}

impl AzureSearchStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let api_key = config
            .api_key()?
            .ok_or_else(|| anyhow!("Azure AI Search requires an API key"))?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: config.endpoint(),
            index: config.collection.clone(),
            api_key,
            api_version: config.api_version.clone(),
            vector_field: config.vector_field.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let sep = if path.contains('?') { '&' } else { '?' };
        self.client
            .request(
                method,
                format!(
                    "{}{}{}api-version={}",
                    self.endpoint, path, sep, self.api_version
                ),
            )
            .header("api-key", &self.api_key)
    }

    fn index_path(&self) -> String {
        format!("/indexes/{}", self.index)
    }

    async fn create(&self, dims: usize) -> Result<()> {
        let body = index_definition(&self.index, &self.vector_field, dims);
        send_with_retry("Azure AI Search", MAX_RETRIES, || {
            self.request(Method::PUT, &self.index_path()).json(&body)
        })
        .await
        .with_context(|| format!("failed to create index '{}'", self.index))?;
        tracing::info!(index = %self.index, dims, "created search index");
        Ok(())
    }

    async fn document_count(&self) -> Option<u64> {
        let path = format!("{}/docs/$count", self.index_path());
        let resp = self.request(Method::GET, &path).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let text = resp.text().await.ok()?;
        text.trim().trim_start_matches('\u{feff}').parse().ok()
    }
}

#[async_trait]
impl VectorStore for AzureSearchStore {
    fn provider(&self) -> &str {
        "azure_search"
    }

    fn collection(&self) -> &str {
        &self.index
    }

    async fn ensure_collection(&self, dims: usize, recreate: bool) -> Result<EnsureOutcome> {
        match self.collection_info().await? {
            None => {
                self.create(dims).await?;
                Ok(EnsureOutcome::Created)
            }
            Some(info) if info.vector_size == Some(dims) && !recreate => Ok(EnsureOutcome::Existing),
            Some(info) => {
                tracing::warn!(
                    index = %self.index,
                    existing = ?info.vector_size,
                    dims,
                    "recreating search index"
                );
                self.delete_collection().await?;
                self.create(dims).await?;
                Ok(EnsureOutcome::Recreated)
            }
        }
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        let value: Vec<serde_json::Value> = points
            .iter()
            .map(|p| {
                let mut doc = serde_json::json!({
                    "@search.action": "mergeOrUpload",
                    "id": p.chunk.id,
                    "document_id": p.chunk.document_id,
                    "chunk_index": p.chunk.chunk_index,
                    "title": p.chunk.title,
                    "source": p.chunk.source,
                    "category": p.chunk.category,
                    "content": p.chunk.text,
                    "hash": p.chunk.hash,
                });
                doc[self.vector_field.as_str()] = serde_json::json!(p.vector);
                doc
            })
            .collect();
        let body = serde_json::json!({ "value": value });
        let path = format!("{}/docs/index", self.index_path());

        let response = send_with_retry("Azure AI Search", MAX_RETRIES, || {
            self.request(Method::POST, &path).json(&body)
        })
        .await
        .with_context(|| format!("failed to upload documents to '{}'", self.index))?;

        let json: serde_json::Value = response.json().await?;
        let failed = json
            .get("value")
            .and_then(|v| v.as_array())
            .map(|results| {
                results
                    .iter()
                    .filter(|r| r.get("status").and_then(|s| s.as_bool()) == Some(false))
                    .count()
            })
            .unwrap_or(0);
        if failed > 0 {
            return Err(anyhow!(
                "{} of {} documents failed to index in '{}'",
                failed,
                points.len(),
                self.index
            ));
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let body = serde_json::json!({
            "select": SELECT_FIELDS,
            "top": top_k,
            "vectorQueries": [{
                "kind": "vector",
                "vector": vector,
                "fields": self.vector_field,
                "k": top_k,
            }],
        });
        let path = format!("{}/docs/search", self.index_path());

        let response = send_with_retry("Azure AI Search", MAX_RETRIES, || {
            self.request(Method::POST, &path).json(&body)
        })
        .await
        .with_context(|| format!("search in index '{}' failed", self.index))?;

        let json: serde_json::Value = response.json().await?;
        let hits = parse_search_response(&json)?;
        Ok(apply_retrieval_policy(hits, top_k, score_threshold))
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let response = self
            .request(Method::GET, &self.index_path())
            .send()
            .await
            .with_context(|| format!("is Azure AI Search reachable at {}?", self.endpoint))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Azure AI Search API error {}: {}", status, body));
        }

        let json: serde_json::Value = response.json().await?;
        let vector_size = json
            .get("fields")
            .and_then(|f| f.as_array())
            .and_then(|fields| {
                fields
                    .iter()
                    .find(|f| f.get("name").and_then(|n| n.as_str()) == Some(self.vector_field.as_str()))
            })
            .and_then(|f| f.get("dimensions"))
            .and_then(|d| d.as_u64())
            .map(|d| d as usize);

        Ok(Some(CollectionInfo {
            name: self.index.clone(),
            vector_size,
            distance: "Cosine".to_string(),
            points_count: self.document_count().await,
            status: "ready".to_string(),
        }))
    }

    async fn delete_collection(&self) -> Result<bool> {
        let response = self
            .request(Method::DELETE, &self.index_path())
            .send()
            .await
            .with_context(|| format!("failed to delete index '{}'", self.index))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("Azure AI Search API error {}: {}", s, body))
            }
        }
    }

    async fn health_check(&self) -> bool {
        match self.request(Method::GET, "/indexes?$select=name").send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Convert an Azure cosine `@search.score` back to cosine similarity.
pub fn score_to_cosine(score: f64) -> f32 {
    if score <= 0.0 {
        return -1.0;
    }
    (2.0 - 1.0 / score) as f32
}

pub fn parse_search_response(json: &serde_json::Value) -> Result<Vec<RetrievedChunk>> {
    let value = json
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Invalid Azure AI Search response: missing value array"))?;

    Ok(value
        .iter()
        .map(|doc| {
            let field = |name: &str| {
                doc.get(name)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            RetrievedChunk {
                chunk: DocumentChunk {
                    id: field("id"),
                    document_id: field("document_id"),
                    chunk_index: doc.get("chunk_index").and_then(|v| v.as_i64()).unwrap_or(0),
                    title: field("title"),
                    source: field("source"),
                    category: field("category"),
                    text: field("content"),
                    hash: field("hash"),
                },
                score: score_to_cosine(
                    doc.get("@search.score").and_then(|s| s.as_f64()).unwrap_or(0.0),
                ),
            }
        })
        .collect())
}

fn index_definition(index: &str, vector_field: &str, dims: usize) -> serde_json::Value {
    serde_json::json!({
        "name": index,
        "fields": [
            { "name": "id", "type": "Edm.String", "key": true, "filterable": true },
            { "name": "document_id", "type": "Edm.String", "filterable": true },
            { "name": "chunk_index", "type": "Edm.Int64", "filterable": true, "sortable": true },
            { "name": "title", "type": "Edm.String", "searchable": true, "analyzer": "en.microsoft" },
            { "name": "source", "type": "Edm.String", "filterable": true },
            { "name": "category", "type": "Edm.String", "filterable": true, "facetable": true },
            { "name": "content", "type": "Edm.String", "searchable": true, "analyzer": "en.microsoft" },
            { "name": "hash", "type": "Edm.String" },
            {
                "name": vector_field,
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "dimensions": dims,
                "vectorSearchProfile": "hrag-vector-profile"
            }
        ],
        "vectorSearch": {
            "algorithms": [
                { "name": "hrag-hnsw", "kind": "hnsw", "hnswParameters": { "metric": "cosine" } }
            ],
            "profiles": [
                { "name": "hrag-vector-profile", "algorithm": "hrag-hnsw" }
            ]
        }
    })
}
