//! Word-window text chunker.
//!
//! Splits a note's text into [`Chunk`]s of at most `chunk_words`
//! whitespace-separated words, optionally overlapping by `overlap_words`.
//! Words are re-joined with single spaces, so chunk text is normalized
//! whitespace regardless of the source layout.
//!
//! Each chunk carries a SHA-256 hash of its text so embeddings can be
//! reused when a resync produces an identical chunk.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Split text into word windows. Returns chunks with contiguous indices
/// starting at 0; empty or whitespace-only text yields no chunks.
pub fn chunk_text(
    source_file: &str,
    text: &str,
    chunk_words: usize,
    overlap_words: usize,
) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || chunk_words == 0 {
        return Vec::new();
    }

    let step = chunk_words.saturating_sub(overlap_words).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_words).min(words.len());
        let piece = words[start..end].join(" ");
        chunks.push(make_chunk(source_file, chunks.len(), &piece));
        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

fn make_chunk(source_file: &str, index: usize, text: &str) -> Chunk {
    Chunk {
        source_file: source_file.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: content_hash(text),
    }
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
