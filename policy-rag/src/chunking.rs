//! Document chunking.
//!
//! [`Chunker`] slides a window of `chunk_size` characters over the text,
//! advancing so that consecutive windows share `overlap` characters. Before
//! cutting at the hard limit it looks back a few characters for a paragraph,
//! line, sentence or word break and cuts there instead, so chunks rarely end
//! mid-word. Sizes stay bounded: a chunk never exceeds `chunk_size`.

use crate::config::RagConfig;
use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// Break strength at a candidate cut position; higher is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Break {
    None,
    Word,
    Sentence,
    Line,
    Paragraph,
}

/// Splits text into overlapping, boundary-aware windows.
///
/// # Example
///
/// ```rust
/// use policy_rag::Chunker;
///
/// let chunker = Chunker::new(40, 10).unwrap();
/// let chunks = chunker
///     .split("Claims must be filed within 30 days. Coverage begins 24 hours after enrollment.")
///     .unwrap();
/// assert_eq!(chunks[0].text, "Claims must be filed within 30 days. ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    lookback: usize,
}

impl Chunker {
    /// Create a chunker that looks back up to a quarter of `chunk_size` for a break.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] unless `0 <= overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_overlap ({overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, overlap, lookback: chunk_size / 4 })
    }

    /// Create a chunker that always cuts at the hard limit.
    pub fn fixed(chunk_size: usize, overlap: usize) -> Result<Self> {
        Ok(Self::new(chunk_size, overlap)?.with_lookback(0))
    }

    /// Create a chunker from pipeline configuration.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Ok(Self::new(config.chunk_size, config.chunk_overlap)?
            .with_lookback(config.effective_lookback()))
    }

    /// Set how many characters before the hard cutoff are searched for a break.
    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback.min(self.chunk_size - 1);
        self
    }

    /// Maximum chunk size in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Overlap between consecutive chunks in characters.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// A stable description of the parameters, part of the index cache key.
    pub fn fingerprint(&self) -> String {
        format!("size={};overlap={};lookback={}", self.chunk_size, self.overlap, self.lookback)
    }

    /// Split raw text into chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] if `text` is empty.
    pub fn split(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.is_empty() {
            return Err(RagError::EmptyDocument { document_id: "<inline>".to_string() });
        }
        Ok(self.split_nonempty(text))
    }

    /// Split a document into chunks, stamping each with its starting page.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] if the document has no
    /// non-whitespace text.
    pub fn chunk_document(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.is_blank() {
            return Err(RagError::EmptyDocument { document_id: document.id.clone() });
        }
        let mut chunks = self.split_nonempty(&document.text);
        for chunk in &mut chunks {
            chunk.page = document.page_for_offset(chunk.start_offset);
        }
        Ok(chunks)
    }

    fn split_nonempty(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        // Byte position of every char, plus the end of the string.
        let bytes: Vec<usize> =
            text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let total = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut prev_end = 0;

        loop {
            let hard_end = (start + self.chunk_size).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.cut_position(&chars, start.max(prev_end) + 1, hard_end)
            };

            chunks.push(Chunk {
                id: chunks.len(),
                text: text[bytes[start]..bytes[end]].to_string(),
                start_offset: start,
                end_offset: end,
                page: None,
            });

            if end == total {
                break;
            }
            prev_end = end;
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        chunks
    }

    /// Pick the cut position in `[min_end, hard_end]` with the strongest
    /// break, preferring the latest one on ties.
    fn cut_position(&self, chars: &[char], min_end: usize, hard_end: usize) -> usize {
        let low = hard_end.saturating_sub(self.lookback).max(min_end);
        if low >= hard_end {
            return hard_end;
        }

        let mut best = (Break::None, hard_end);
        for candidate in (low..=hard_end).rev() {
            let strength = break_at(chars, candidate);
            if strength > best.0 {
                best = (strength, candidate);
            }
        }
        best.1
    }
}

/// Classify the break between `chars[pos - 1]` and `chars[pos]`.
fn break_at(chars: &[char], pos: usize) -> Break {
    if pos == 0 || pos >= chars.len() {
        return Break::None;
    }
    let before = chars[pos - 1];
    let before2 = if pos >= 2 { Some(chars[pos - 2]) } else { None };

    if before == '\n' && before2 == Some('\n') {
        Break::Paragraph
    } else if before == '\n' {
        Break::Line
    } else if before.is_whitespace() && matches!(before2, Some('.' | '!' | '?' | '。')) {
        Break::Sentence
    } else if before.is_whitespace() || chars[pos].is_whitespace() {
        Break::Word
    } else {
        Break::None
    }
}

/// Split `text` with a default [`Chunker`].
///
/// # Errors
///
/// Returns [`RagError::InvalidConfiguration`] for bad sizes and
/// [`RagError::EmptyDocument`] for empty text.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    Chunker::new(chunk_size, overlap)?.split(text)
}
