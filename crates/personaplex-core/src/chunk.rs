//! Fixed-window text chunker with overlap.
//!
//! Splits extracted document text into [`Chunk`]s of at most `chunk_size`
//! characters, where consecutive chunks share exactly `overlap` characters.
//! Sizes are measured in Unicode scalar values, so multi-byte text is never
//! split inside a character.
//!
//! # Algorithm
//!
//! 1. Window `i` starts at character `i × (chunk_size − overlap)`.
//! 2. Each window spans `chunk_size` characters, or up to the end of text.
//! 3. Chunking stops at the first window that reaches the end of the text.
//!
//! For a document of `L > chunk_size` characters this yields
//! `ceil((L − overlap) / (chunk_size − overlap))` chunks; shorter non-empty
//! documents yield one chunk and empty text yields none.
//!
//! # Example
//!
//! ```rust
//! use personaplex_core::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams::new(10, 3).unwrap();
//! let chunks = chunk_text("abcdefghijklmnop", &params);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "abcdefghij");
//! assert_eq!(chunks[1].text, "hijklmnop");
//! ```

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Nominal chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;
/// Characters shared between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Validated chunking parameters. `overlap < chunk_size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if overlap >= chunk_size {
            bail!(
                "chunk overlap ({}) must be smaller than chunk_size ({})",
                overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split text into overlapping windows.
///
/// Returns chunks with contiguous indices starting at 0. Each chunk's
/// `hash` is the SHA-256 of its text.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<Chunk> {
    // Byte offset of every character, plus the end of the string.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = offsets.len() - 1;

    let mut chunks = Vec::new();
    if total_chars == 0 {
        return chunks;
    }

    let mut start = 0usize;
    let mut chunk_index: i64 = 0;
    loop {
        let end = (start + params.chunk_size).min(total_chars);
        chunks.push(make_chunk(chunk_index, &text[offsets[start]..offsets[end]]));
        if end == total_chars {
            break;
        }
        chunk_index += 1;
        start += params.stride();
    }

    chunks
}

/// Expected chunk count for a text of `total_chars` characters.
pub fn expected_chunk_count(total_chars: usize, params: &ChunkParams) -> usize {
    if total_chars == 0 {
        0
    } else if total_chars <= params.chunk_size {
        1
    } else {
        (total_chars - params.overlap).div_ceil(params.stride())
    }
}

fn make_chunk(index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());

    Chunk {
        chunk_index: index,
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    }
}
