//! In-memory [`VectorStore`] for tests and offline demos.
//!
//! Points live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{
    apply_retrieval_policy, CollectionInfo, EnsureOutcome, VectorPoint, VectorStore,
};
use crate::embedding::cosine_similarity;
use crate::models::RetrievedChunk;

struct Collection {
    dims: usize,
    points: HashMap<String, VectorPoint>,
}

pub struct MemoryStore {
    name: String,
    inner: RwLock<Option<Collection>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: RwLock::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|c| c.as_ref().map(|c| c.points.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory store lock poisoned")
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn provider(&self) -> &str {
        "memory"
    }

    fn collection(&self) -> &str {
        &self.name
    }

    async fn ensure_collection(&self, dims: usize, recreate: bool) -> Result<EnsureOutcome> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        let outcome = match guard.as_ref() {
            None => EnsureOutcome::Created,
            Some(c) if c.dims == dims && !recreate => return Ok(EnsureOutcome::Existing),
            Some(_) => EnsureOutcome::Recreated,
        };
        *guard = Some(Collection {
            dims,
            points: HashMap::new(),
        });
        Ok(outcome)
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        let collection = guard
            .as_mut()
            .ok_or_else(|| anyhow!("collection '{}' does not exist", self.name))?;
        for p in points {
            if p.vector.len() != collection.dims {
                bail!(
                    "vector dimension mismatch: collection '{}' has {}, got {}",
                    self.name,
                    collection.dims,
                    p.vector.len()
                );
            }
        }
        for p in points {
            collection.points.insert(p.chunk.id.clone(), p.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let guard = self.inner.read().map_err(poisoned)?;
        let collection = guard
            .as_ref()
            .ok_or_else(|| anyhow!("collection '{}' does not exist", self.name))?;
        if vector.len() != collection.dims {
            bail!(
                "vector dimension mismatch: collection '{}' has {}, query has {}",
                self.name,
                collection.dims,
                vector.len()
            );
        }

        let hits = collection
            .points
            .values()
            .map(|p| RetrievedChunk {
                chunk: p.chunk.clone(),
                score: cosine_similarity(vector, &p.vector),
            })
            .collect();

        Ok(apply_retrieval_policy(hits, top_k, score_threshold))
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let guard = self.inner.read().map_err(poisoned)?;
        Ok(guard.as_ref().map(|c| CollectionInfo {
            name: self.name.clone(),
            vector_size: Some(c.dims),
            distance: "Cosine".to_string(),
            points_count: Some(c.points.len() as u64),
            status: "green".to_string(),
        }))
    }

    async fn delete_collection(&self) -> Result<bool> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        Ok(guard.take().is_some())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentChunk;

    fn point(id: &str, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            chunk: DocumentChunk {
                id: id.to_string(),
                document_id: format!("doc-{}", id),
                chunk_index: 0,
                title: id.to_string(),
                source: "test".to_string(),
                category: "general".to_string(),
                text: format!("text {}", id),
                hash: String::new(),
            },
            vector,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new("test");
        store.ensure_collection(2, false).await.unwrap();
        store
            .upsert(&[
                point("x", vec![1.0, 0.0]),
                point("y", vec![0.0, 1.0]),
                point("xy", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_orders_and_thresholds() {
        let store = seeded().await;
        let hits = store.search(&[1.0, 0.1], 5, 0.3).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "xy"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_search_top_k() {
        let store = seeded().await;
        let hits = store.search(&[1.0, 1.0], 1, -1.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "xy");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = seeded().await;
        store.upsert(&[point("x", vec![0.5, 0.5])]).await.unwrap();
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_errors() {
        let store = seeded().await;
        let err = store.search(&[1.0, 0.0, 0.0], 5, 0.0).await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
        assert!(store.upsert(&[point("z", vec![1.0])]).await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_collection_outcomes() {
        let store = MemoryStore::new("t");
        assert_eq!(store.ensure_collection(4, false).await.unwrap(), EnsureOutcome::Created);
        assert_eq!(store.ensure_collection(4, false).await.unwrap(), EnsureOutcome::Existing);
        assert_eq!(store.ensure_collection(8, false).await.unwrap(), EnsureOutcome::Recreated);
        assert_eq!(store.ensure_collection(8, true).await.unwrap(), EnsureOutcome::Recreated);
        let info = store.collection_info().await.unwrap().unwrap();
        assert_eq!(info.vector_size, Some(8));
    }

    #[tokio::test]
    async fn test_delete_and_missing_collection() {
        let store = seeded().await;
        assert!(store.delete_collection().await.unwrap());
        assert!(!store.delete_collection().await.unwrap());
        assert!(store.collection_info().await.unwrap().is_none());
        assert!(store.search(&[1.0, 0.0], 5, 0.0).await.is_err());
    }
}
