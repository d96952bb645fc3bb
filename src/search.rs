//! Retrieval-only search: `hrag search "<query>"`.
//!
//! Runs the same embed → vector search step as a chat question, applies the
//! configured top-k and score threshold, and prints the matching chunks
//! without calling the chat model. Useful for tuning retrieval settings.

use anyhow::Result;

use crate::models::RetrievedChunk;
use crate::prompt::truncate_chars;
use crate::rag::RagEngine;

const EXCERPT_CHARS: usize = 200;

pub async fn run_search(
    engine: &RagEngine,
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<Vec<RetrievedChunk>> {
    let mut hits = engine.retrieve(query).await?;
    if let Some(n) = limit {
        hits.truncate(n);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(hits);
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(hits);
    }

    for (i, hit) in hits.iter().enumerate() {
        let c = &hit.chunk;
        let source = if c.source.is_empty() {
            "Unknown"
        } else {
            &c.source
        };
        println!("{}. [{:.3}] {} / {}", i + 1, hit.score, source, c.title);
        println!("    category: {}", c.category);
        println!("    chunk: {}", c.chunk_index);
        let flat = c.text.replace('\n', " ");
        let excerpt = truncate_chars(flat.trim(), EXCERPT_CHARS);
        if excerpt.len() < flat.trim().len() {
            println!("    excerpt: \"{}…\"", excerpt);
        } else {
            println!("    excerpt: \"{}\"", excerpt);
        }
        println!("    id: {}", c.id);
        println!();
    }

    Ok(hits)
}
