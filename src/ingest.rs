//! Ingestion pipeline: corpus → chunking → embedding → vector store.
//!
//! The collection's vector size is taken from the first embedding batch.
//! An existing collection with a different size is recreated before any
//! point is written, so the store never mixes dimensionalities. Chunk ids
//! are deterministic, which makes re-running ingestion idempotent.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::corpus;
use crate::embedding::{create_embedder, embed_batch, Embedder};
use crate::models::{DocumentChunk, SourceDocument};
use crate::vector_store::{create_store, EnsureOutcome, VectorPoint, VectorStore};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Drop and recreate the collection even if its vector size matches.
    pub recreate: bool,
    /// Load and chunk only; no embedding or store calls.
    pub dry_run: bool,
    /// Ingest at most this many documents.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub dims: Option<usize>,
    pub collection: String,
    pub outcome: Option<EnsureOutcome>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Split every document with the configured chunk size.
pub fn chunk_documents(docs: &[SourceDocument], max_tokens: usize) -> Vec<DocumentChunk> {
    docs.iter()
        .flat_map(|d| chunk_document(d, max_tokens))
        .collect()
}

/// Embed and upsert `chunks` in batches of `batch_size`.
pub async fn index_chunks(
    chunks: &[DocumentChunk],
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    batch_size: usize,
    recreate: bool,
) -> Result<(usize, Option<usize>, Option<EnsureOutcome>)> {
    let mut embedded = 0;
    let mut dims: Option<usize> = None;
    let mut outcome = None;

    for (i, batch) in chunks.chunks(batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batch(embedder, &texts)
            .await
            .with_context(|| format!("embedding batch {} failed", i))?;

        let size = match dims {
            Some(d) => d,
            None => {
                let d = vectors.first().map(|v| v.len()).unwrap_or(0);
                if d == 0 {
                    bail!("embedding provider returned empty vectors");
                }
                let o = store.ensure_collection(d, recreate).await?;
                tracing::info!(collection = store.collection(), dims = d, outcome = ?o, "collection ready");
                outcome = Some(o);
                dims = Some(d);
                d
            }
        };
        if let Some(v) = vectors.iter().find(|v| v.len() != size) {
            bail!(
                "embedding provider returned mixed vector sizes ({} and {})",
                size,
                v.len()
            );
        }

        let points: Vec<VectorPoint> = batch
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint { chunk, vector })
            .collect();
        store.upsert(&points).await?;
        embedded += points.len();
        tracing::debug!(batch = i, embedded, total = chunks.len(), "upserted batch");
    }

    Ok((embedded, dims, outcome))
}

/// Run ingestion with explicit providers.
pub async fn ingest_documents(
    config: &Config,
    docs: &[SourceDocument],
    embedder: Option<&dyn Embedder>,
    store: Option<&dyn VectorStore>,
    options: &IngestOptions,
) -> Result<IngestReport> {
    let docs = match options.limit {
        Some(n) => &docs[..n.min(docs.len())],
        None => docs,
    };
    let started_at = Utc::now();
    let chunks = chunk_documents(docs, config.chunking.max_tokens);

    let mut report = IngestReport {
        documents: docs.len(),
        chunks: chunks.len(),
        embedded: 0,
        dims: None,
        collection: config.vector_store.collection.clone(),
        outcome: None,
        dry_run: options.dry_run,
        started_at,
        finished_at: started_at,
    };

    if options.dry_run || chunks.is_empty() {
        return Ok(report);
    }

    let (Some(embedder), Some(store)) = (embedder, store) else {
        bail!("ingestion needs an embedder and a vector store");
    };

    let (embedded, dims, outcome) = index_chunks(
        &chunks,
        embedder,
        store,
        config.embedding.batch_size,
        options.recreate,
    )
    .await?;
    report.embedded = embedded;
    report.dims = dims;
    report.outcome = outcome;
    report.finished_at = Utc::now();
    Ok(report)
}

/// `hrag ingest`: load the configured corpus and index it.
pub async fn run_ingest(config: &Config, options: &IngestOptions) -> Result<IngestReport> {
    let docs = corpus::load_documents(&config.corpus)?;
    tracing::info!(documents = docs.len(), "loaded corpus");

    let report = if options.dry_run {
        ingest_documents(config, &docs, None, None, options).await?
    } else {
        let embedder = create_embedder(&config.embedding)?;
        let store = create_store(&config.vector_store)?;
        if !store.health_check().await {
            bail!(
                "vector store '{}' is not reachable at {}",
                store.provider(),
                config.vector_store.endpoint()
            );
        }
        ingest_documents(
            config,
            &docs,
            Some(embedder.as_ref()),
            Some(store.as_ref()),
            options,
        )
        .await?
    };

    print_report(&report);
    Ok(report)
}

pub fn print_report(report: &IngestReport) {
    if report.dry_run {
        println!("ingest (dry-run)");
    } else {
        println!("ingest");
    }
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    if !report.dry_run {
        println!("  embedded: {}", report.embedded);
        if let Some(dims) = report.dims {
            println!("  dims: {}", dims);
        }
        if let Some(outcome) = report.outcome {
            let what = match outcome {
                EnsureOutcome::Existing => "existing",
                EnsureOutcome::Created => "created",
                EnsureOutcome::Recreated => "recreated",
            };
            println!("  collection: {} ({})", report.collection, what);
        }
        let took = report.finished_at - report.started_at;
        println!("  took: {:.1}s", took.num_milliseconds() as f64 / 1000.0);
        println!(
            "  finished: {}",
            report.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
}
