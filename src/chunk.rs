//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`DocumentChunk`]s that respect a
//! configurable `max_tokens` limit. Splitting occurs on paragraph
//! boundaries (`\n\n`) to keep related sentences together; a paragraph
//! longer than the limit is hard-split on the last newline or space.
//!
//! Chunk ids are UUID v5 values derived from the document id and chunk
//! index, so re-ingesting the same corpus overwrites points in the vector
//! store instead of duplicating them.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{DocumentChunk, SourceDocument};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split a document into chunks with contiguous indices starting at 0.
pub fn chunk_document(doc: &SourceDocument, max_tokens: usize) -> Vec<DocumentChunk> {
    split_text(&doc.body, max_tokens * CHARS_PER_TOKEN)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(doc, i as i64, text))
        .collect()
}

/// Split text into pieces of at most `max_chars` bytes on paragraph
/// boundaries. Always returns at least one piece.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars.min(remaining.len()));
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                // A single char wider than max_chars still has to make progress.
                let actual_split = if actual_split == 0 {
                    remaining
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| i)
                        .unwrap_or(remaining.len())
                } else {
                    actual_split
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Deterministic chunk id for `(document_id, index)`.
pub fn chunk_id(document_id: &str, index: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}#{}", document_id, index).as_bytes(),
    )
    .to_string()
}

fn make_chunk(doc: &SourceDocument, index: i64, text: String) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        id: chunk_id(&doc.id, index),
        document_id: doc.id.clone(),
        chunk_index: index,
        title: doc.title.clone(),
        source: doc.source.clone(),
        category: doc.category.clone(),
        text,
        hash,
    }
}
