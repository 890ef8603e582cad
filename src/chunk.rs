//! Whitespace normalization and the overlapping text chunker.
//!
//! Page text is normalized (runs of spaces collapsed, paragraph breaks
//! preserved) and split into fixed-size character windows with a
//! configurable overlap. Each chunk receives the deterministic identifier
//! `{source}:{page}:{index}`, where `index` starts at 0 on every page —
//! re-ingesting the same documents therefore produces the same id set.
//!
//! Each chunk also carries a SHA-256 hash of its content for staleness
//! detection when a document is edited in place.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, PageBlock};

/// Collapse whitespace runs: spaces and tabs become a single space,
/// blank-line runs become a single paragraph break, edges are trimmed.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_break = false;
    let mut newlines = 0usize;

    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            pending_break = true;
            continue;
        }
        if c.is_whitespace() {
            pending_break = true;
            continue;
        }
        if pending_break && !out.is_empty() {
            if newlines >= 2 {
                out.push_str("\n\n");
            } else {
                out.push(' ');
            }
        }
        out.push(c);
        pending_break = false;
        newlines = 0;
    }

    out
}

/// Split text into overlapping windows of `chunk_size` characters.
///
/// Consecutive windows share `overlap` characters. Splitting is measured
/// in characters, not bytes, so multi-byte text never breaks mid-codepoint.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    out
}

/// Normalize and chunk a sequence of page blocks, assigning ids.
///
/// The chunk index resets to 0 whenever `(source, page)` changes and
/// increments for consecutive chunks of the same page. Pages that are
/// empty after normalization produce no chunks.
pub fn chunk_pages(pages: &[PageBlock], chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for page in pages {
        let normalized = normalize_whitespace(&page.text);
        if normalized.is_empty() {
            continue;
        }

        for (index, content) in split_text(&normalized, chunk_size, overlap)
            .into_iter()
            .enumerate()
        {
            chunks.push(make_chunk(&page.source, page.page, index as i64, &content));
        }
    }

    chunks
}

fn make_chunk(source: &str, page: i64, chunk_index: i64, content: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}:{}", source, page, chunk_index),
        source: source.to_string(),
        page,
        chunk_index,
        content: content.to_string(),
        hash,
    }
}
