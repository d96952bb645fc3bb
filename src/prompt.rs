//! Prompt assembly for the healthcare assistant.

use std::collections::HashSet;

use crate::models::RetrievedChunk;

/// System prompt sent with every RAG generation.
pub const SYSTEM_PROMPT: &str = "You are a helpful healthcare AI assistant. You provide accurate, \
educational health information based on the context provided. Always include appropriate \
medical disclaimers and encourage users to consult healthcare professionals for medical advice.

Guidelines:
- Be informative but not diagnostic
- Include relevant medical disclaimers
- Encourage professional consultation when appropriate
- Be clear about limitations of AI health advice";

pub const NO_CONTEXT: &str = "No relevant documents found in the knowledge base.";

pub const NO_CONTEXT_SUMMARY: &str = "No relevant documents found.";

pub const ERROR_CONTEXT_SUMMARY: &str = "Error occurred during processing";

/// Format retrieved chunks as numbered documents, cut to `max_chars` chars.
///
/// Whole documents are kept while they fit; the first one that does not
/// fit is cut short and the rest are dropped.
pub fn format_context(chunks: &[RetrievedChunk], max_chars: usize) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let mut out = String::new();
    let mut used = 0;
    for (i, hit) in chunks.iter().enumerate() {
        let source = if hit.chunk.source.is_empty() {
            "Unknown"
        } else {
            &hit.chunk.source
        };
        let block = format!(
            "Document {} (Relevance: {:.3}, Source: {}):\n{}\n",
            i + 1,
            hit.score,
            source,
            hit.chunk.text
        );
        let sep = if out.is_empty() { "" } else { "\n" };
        let block_chars = block.chars().count();

        if used + sep.len() + block_chars > max_chars {
            let room = max_chars.saturating_sub(used + sep.len());
            if room > 0 {
                out.push_str(sep);
                out.push_str(truncate_chars(&block, room));
            }
            break;
        }
        out.push_str(sep);
        out.push_str(&block);
        used += sep.len() + block_chars;
    }
    out
}

/// The first `max_chars` chars of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

pub fn build_user_prompt(question: &str, context: &str) -> String {
    format!(
        "Based on the following healthcare information, please answer the user's question.

Context:
{context}

User Question: {question}

Please provide a helpful, accurate response based on the context above. Include appropriate medical disclaimers."
    )
}

/// Mean score rounded to 3 decimals; `0.0` when empty.
pub fn average_score(chunks: &[RetrievedChunk]) -> f32 {
    if chunks.is_empty() {
        return 0.0;
    }
    let sum: f32 = chunks.iter().map(|c| c.score).sum();
    let avg = sum / chunks.len() as f32;
    (avg * 1000.0).round() / 1000.0
}

pub fn summarize_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_SUMMARY.to_string();
    }
    let sources: HashSet<&str> = chunks
        .iter()
        .map(|c| {
            if c.chunk.source.is_empty() {
                "Unknown"
            } else {
                c.chunk.source.as_str()
            }
        })
        .collect();
    format!(
        "Retrieved {} documents from {} sources with average relevance score {}",
        chunks.len(),
        sources.len(),
        average_score(chunks)
    )
}

/// User-facing text returned when the pipeline fails.
pub fn error_response(error: &str) -> String {
    format!(
        "I apologize, but I encountered an error while processing your question: '{}'. \
Please try again, and consult a healthcare professional for urgent medical questions.",
        error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentChunk;

    fn hit(source: &str, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: DocumentChunk {
                id: "id".into(),
                document_id: "doc".into(),
                chunk_index: 0,
                title: "t".into(),
                source: source.into(),
                category: "general".into(),
                text: text.into(),
                hash: String::new(),
            },
            score,
        }
    }

    #[test]
    fn test_format_context() {
        let chunks = vec![
            hit("CDC", "Wash hands.", 0.91234),
            hit("", "Sleep 7-9 hours.", 0.5),
        ];
        let ctx = format_context(&chunks, 10_000);
        assert_eq!(
            ctx,
            "Document 1 (Relevance: 0.912, Source: CDC):\nWash hands.\n\n\
Document 2 (Relevance: 0.500, Source: Unknown):\nSleep 7-9 hours.\n"
        );
    }

    #[test]
    fn test_empty_context_fallback() {
        assert_eq!(format_context(&[], 100), NO_CONTEXT);
        assert_eq!(summarize_context(&[]), NO_CONTEXT_SUMMARY);
        assert_eq!(average_score(&[]), 0.0);
    }

    #[test]
    fn test_truncation_keeps_whole_documents_first() {
        let chunks = vec![hit("A", "short", 0.9), hit("B", &"x".repeat(500), 0.8)];
        let first = format_context(&chunks[..1], 10_000);
        let ctx = format_context(&chunks, first.len() + 20);
        assert!(ctx.starts_with(&first));
        assert_eq!(ctx.len(), first.len() + 20);
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let chunks = vec![hit("A", &"é".repeat(100), 0.9)];
        let header = "Document 1 (Relevance: 0.900, Source: A):\n";
        let ctx = format_context(&chunks, header.len() + 30);
        assert_eq!(ctx.chars().count(), header.len() + 30);
        assert!(ctx.ends_with(&"é".repeat(30)));

        let whole = format_context(&chunks, header.len() + 101);
        assert!(whole.ends_with(&format!("{}\n", "é".repeat(100))));
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("héllo", 10), "héllo");
    }

    #[test]
    fn test_summary_counts_distinct_sources() {
        let chunks = vec![hit("CDC", "a", 0.8), hit("CDC", "b", 0.6), hit("WHO", "c", 0.4)];
        assert_eq!(
            summarize_context(&chunks),
            "Retrieved 3 documents from 2 sources with average relevance score 0.6"
        );
    }

    #[test]
    fn test_average_rounds_to_three_places() {
        let chunks = vec![hit("a", "", 0.12345), hit("b", "", 0.5)];
        assert!((average_score(&chunks) - 0.312).abs() < 1e-6);
    }

    #[test]
    fn test_user_prompt_layout() {
        let p = build_user_prompt("What is hypertension?", "CTX");
        assert!(p.contains("Context:\nCTX\n\nUser Question: What is hypertension?"));
        assert!(p.ends_with("Include appropriate medical disclaimers."));
    }

    #[test]
    fn test_error_response_quotes_error() {
        assert!(error_response("boom").contains("'boom'"));
    }
}
