//! Token-aware chunking with overlap.
//!
//! The chunker asks the embedder to tokenize the whole string, then
//! walks fixed token windows. Inside every non-final window it hunts the
//! last 30% of the text for a clean break: a paragraph break first, then
//! a sentence terminator, then a line break. The starting character
//! position of each chunk is estimated from the average characters per
//! token.

use std::sync::Arc;

use spall_core::types::Chunk;
use spall_core::{RequestContext, Result};
use spall_llm::EmbeddingProvider;

/// Maximum tokens per chunk.
pub const MAX_CHUNK_TOKENS: usize = 512;
/// Token overlap between consecutive chunks.
pub const CHUNK_OVERLAP: usize = 64;
/// Window step: `MAX_CHUNK_TOKENS - CHUNK_OVERLAP`.
pub const CHUNK_STEP: usize = MAX_CHUNK_TOKENS - CHUNK_OVERLAP;

/// Fraction of the window text searched for a clean break point.
const BREAK_ZONE: f64 = 0.3;

const SENTENCE_BREAKS: [&str; 6] = [". ", ".\n", "? ", "?\n", "! ", "!\n"];

/// Splits `text` into chunks of up to [`MAX_CHUNK_TOKENS`] tokens with
/// [`CHUNK_OVERLAP`] tokens of overlap.
pub async fn chunk_text(
    provider: &Arc<dyn EmbeddingProvider>,
    ctx: &RequestContext,
    text: &str,
) -> Result<Vec<Chunk>> {
    let tokens = provider.tokenize(text).await?;
    let total = tokens.len();
    if total <= MAX_CHUNK_TOKENS {
        return Ok(vec![Chunk {
            text: text.to_string(),
            pos: 0,
        }]);
    }

    let char_count = text.chars().count();
    let avg_chars_per_token = char_count as f64 / total as f64;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        ctx.checkpoint().await?;
        let end = (start + MAX_CHUNK_TOKENS).min(total);
        let mut chunk_text = provider.detokenize(&tokens[start..end]).await?;
        if end < total {
            if let Some(cut) = find_break(&chunk_text) {
                chunk_text.truncate(cut);
            }
        }
        let pos = (start as f64 * avg_chars_per_token).floor() as usize;
        chunks.push(Chunk {
            text: chunk_text,
            pos,
        });
        if end >= total {
            break;
        }
        start += CHUNK_STEP;
    }
    Ok(chunks)
}

/// Finds the byte index to truncate at, searching the last
/// [`BREAK_ZONE`] of the window. Sentence breaks keep the terminator
/// character; paragraph and line breaks cut before the newline.
fn find_break(text: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    if chars.is_empty() {
        return None;
    }
    let zone_start_char = ((chars.len() as f64) * (1.0 - BREAK_ZONE)) as usize;
    let zone_start = chars.get(zone_start_char).map(|(i, _)| *i)?;
    let zone = &text[zone_start..];

    if let Some(idx) = zone.rfind("\n\n") {
        return Some(zone_start + idx);
    }
    if let Some(idx) = SENTENCE_BREAKS
        .iter()
        .filter_map(|b| zone.rfind(b))
        .max()
    {
        // Keep the punctuation, drop the following whitespace.
        return Some(zone_start + idx + 1);
    }
    zone.rfind('\n').map(|idx| zone_start + idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spall_llm::MockEmbeddingProvider;

    fn provider() -> Arc<dyn EmbeddingProvider> {
        // The mock tokenizes one char per token.
        Arc::new(MockEmbeddingProvider::new(4))
    }

    #[tokio::test]
    async fn short_text_is_one_chunk_at_zero() {
        let ctx = RequestContext::new();
        let chunks = chunk_text(&provider(), &ctx, "short note").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short note");
        assert_eq!(chunks[0].pos, 0);
    }

    #[tokio::test]
    async fn long_text_windows_with_overlap() {
        let ctx = RequestContext::new();
        // 1000 tokens with the char-per-token mock.
        let text: String = "x".repeat(1000);
        let chunks = chunk_text(&provider(), &ctx, &text).await.unwrap();
        // Windows: [0,512), [448,960), [896,1000)
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].pos, 0);
        assert_eq!(chunks[1].pos, 448);
        assert_eq!(chunks[2].pos, 896);
        assert_eq!(chunks[2].text.len(), 104);
        // No break characters anywhere, so windows stay full-size.
        assert_eq!(chunks[0].text.len(), 512);
    }

    #[tokio::test]
    async fn paragraph_break_wins_in_zone() {
        let ctx = RequestContext::new();
        // A paragraph break sits at char 400, inside the last 30% of the
        // first 512-char window (zone starts at ~358).
        let mut text = "a".repeat(400);
        text.push_str("\n\n");
        text.push_str(&"b".repeat(600));
        let chunks = chunk_text(&provider(), &ctx, &text).await.unwrap();
        assert_eq!(chunks[0].text.len(), 400);
        assert!(chunks[0].text.ends_with('a'));
    }

    #[tokio::test]
    async fn sentence_break_used_when_no_paragraph() {
        let ctx = RequestContext::new();
        let mut text = "a".repeat(398);
        text.push_str(". ");
        text.push_str(&"b".repeat(600));
        let chunks = chunk_text(&provider(), &ctx, &text).await.unwrap();
        // Truncated just past the period (kept), dropping the space.
        assert!(chunks[0].text.ends_with('.'));
        assert_eq!(chunks[0].text.len(), 399);
    }

    #[tokio::test]
    async fn line_break_is_the_fallback() {
        let ctx = RequestContext::new();
        let mut text = "a".repeat(400);
        text.push('\n');
        text.push_str(&"b".repeat(600));
        let chunks = chunk_text(&provider(), &ctx, &text).await.unwrap();
        assert_eq!(chunks[0].text.len(), 400);
    }

    #[tokio::test]
    async fn break_outside_zone_is_ignored() {
        let ctx = RequestContext::new();
        // Break at char 100 is well before the 70% mark of the window.
        let mut text = "a".repeat(100);
        text.push_str("\n\n");
        text.push_str(&"b".repeat(900));
        let chunks = chunk_text(&provider(), &ctx, &text).await.unwrap();
        assert_eq!(chunks[0].text.len(), 512);
    }

    #[tokio::test]
    async fn cancelled_context_stops_chunking() {
        let ctx = RequestContext::new();
        ctx.abort();
        let text = "x".repeat(1000);
        let err = chunk_text(&provider(), &ctx, &text).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
