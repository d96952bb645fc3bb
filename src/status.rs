//! Component health overview for `hrag status`.
//!
//! Probes the chat model, the embedding service and the vector store, lists
//! the models the chat service reports, and shows the collection's size.

use anyhow::Result;
use serde::Serialize;

use crate::rag::{RagEngine, SystemInfo};
use crate::vector_store::{CollectionInfo, VectorStore};

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub system: SystemInfo,
    pub available_models: Vec<String>,
    /// Whether the configured chat model is among `available_models`.
    /// `None` when the list could not be fetched.
    pub model_available: Option<bool>,
}

pub async fn collect_status(engine: &RagEngine) -> StatusReport {
    let system = engine.system_info().await;
    let (available_models, model_available) = match engine.llm().list_models().await {
        Ok(models) => {
            let wanted = engine.llm().model_name();
            // Ollama reports `name:tag`; an untagged name means `:latest`.
            let found = models.iter().any(|m| {
                m == wanted || m.strip_suffix(":latest") == Some(wanted)
            });
            (models, Some(found))
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not list models");
            (Vec::new(), None)
        }
    };
    StatusReport {
        system,
        available_models,
        model_available,
    }
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "UNREACHABLE"
    }
}

pub fn print_status(report: &StatusReport) {
    let s = &report.system;
    println!("Health RAG Status");
    println!("=================");
    println!();
    println!("{:<14} {:<28} STATUS", "COMPONENT", "NAME");
    println!(
        "{:<14} {:<28} {}",
        "llm",
        format!("{}/{}", s.llm_provider, s.llm_model),
        mark(s.health.llm)
    );
    println!(
        "{:<14} {:<28} {}",
        "embedding",
        s.embedding_model,
        mark(s.health.embedding)
    );
    println!(
        "{:<14} {:<28} {}",
        "vector_store",
        format!("{}/{}", s.vector_store, s.collection),
        mark(s.health.vector_store)
    );
    println!();

    match &s.collection_info {
        Some(info) => {
            println!("  Collection:  {} ({})", info.name, info.status);
            if let Some(size) = info.vector_size {
                println!("  Dimensions:  {} ({})", size, info.distance);
            }
            if let Some(count) = info.points_count {
                println!("  Points:      {}", count);
            }
        }
        None if s.health.vector_store => {
            println!("  Collection:  {} (not created; run `hrag ingest`)", s.collection)
        }
        None => {}
    }
    println!("  Retrieval:   top_k={} threshold={}", s.top_k, s.score_threshold);

    match report.model_available {
        Some(true) => {}
        Some(false) => println!(
            "\n  Warning: model '{}' not found among {} available models",
            s.llm_model,
            report.available_models.len()
        ),
        None => {}
    }
    println!();
    println!(
        "  Overall:     {}",
        if s.health.overall { "healthy" } else { "degraded" }
    );
}

/// `hrag status`: print the report, or emit it as JSON.
pub async fn run_status(engine: &RagEngine, json: bool) -> Result<StatusReport> {
    let report = collect_status(engine).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&report);
    }
    Ok(report)
}

/// `hrag collection info`.
pub async fn run_collection_info(store: &dyn VectorStore, json: bool) -> Result<Option<CollectionInfo>> {
    let info = store.collection_info().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(info);
    }
    match &info {
        Some(info) => {
            println!("Collection: {}", info.name);
            println!("  provider:   {}", store.provider());
            println!("  status:     {}", info.status);
            println!("  distance:   {}", info.distance);
            match info.vector_size {
                Some(size) => println!("  dimensions: {}", size),
                None => println!("  dimensions: unknown"),
            }
            match info.points_count {
                Some(count) => println!("  points:     {}", count),
                None => println!("  points:     unknown"),
            }
        }
        None => println!("Collection '{}' does not exist.", store.collection()),
    }
    Ok(info)
}

/// `hrag collection delete`.
pub async fn run_collection_delete(store: &dyn VectorStore) -> Result<bool> {
    let deleted = store.delete_collection().await?;
    if deleted {
        tracing::info!(collection = store.collection(), "collection deleted");
        println!("Deleted collection '{}'.", store.collection());
    } else {
        println!("Collection '{}' does not exist.", store.collection());
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::memory::MemoryStore;

    #[tokio::test]
    async fn test_collection_info_and_delete() {
        let store = MemoryStore::new("healthcare_docs");
        assert!(run_collection_info(&store, false).await.unwrap().is_none());

        store.ensure_collection(4, false).await.unwrap();
        let info = run_collection_info(&store, true).await.unwrap().unwrap();
        assert_eq!(info.vector_size, Some(4));
        assert_eq!(info.points_count, Some(0));

        assert!(run_collection_delete(&store).await.unwrap());
        assert!(!run_collection_delete(&store).await.unwrap());
    }
}
