//! Data types for documents, chunks, and search results.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A source document: extracted text plus an optional page map.
///
/// Immutable once ingested. `page_offsets` holds the character offset at
/// which each page starts, in increasing order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Identifier for the document (file stem for loaded documents).
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Character offsets at which each page begins. Empty if unknown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_offsets: Vec<usize>,
    /// Optional URI pointing to the original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Document {
    /// Create a document without page information.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), page_offsets: Vec::new(), source_uri: None }
    }

    /// Build a document from per-page texts, recording where each page starts.
    pub fn from_pages<I, S>(id: impl Into<String>, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        let mut page_offsets = Vec::new();
        let mut offset = 0;
        for page in pages {
            let page = page.as_ref();
            page_offsets.push(offset);
            text.push_str(page);
            offset += page.chars().count();
        }
        Self { id: id.into(), text, page_offsets, source_uri: None }
    }

    /// Attach a source URI.
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    /// Returns `true` if the document has no non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// The 1-based page containing the given character offset, if pages are known.
    pub fn page_for_offset(&self, offset: usize) -> Option<usize> {
        if self.page_offsets.is_empty() {
            return None;
        }
        Some(self.page_offsets.partition_point(|&start| start <= offset).max(1))
    }

    /// Hex SHA-256 of the document text, used as its content identity.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A contiguous window of document text, the unit of retrieval.
///
/// Offsets count characters, not bytes. Ids run `0..n` in document order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk in document order.
    pub id: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Character offset of the first character.
    pub start_offset: usize,
    /// Character offset one past the last character.
    pub end_offset: usize,
    /// 1-based page on which the chunk starts, when the document has a page map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl Chunk {
    /// Number of characters covered by the chunk.
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    /// Returns `true` if the chunk covers no characters.
    pub fn is_empty(&self) -> bool {
        self.end_offset == self.start_offset
    }

    /// The first `max_chars` characters of the chunk text.
    pub fn excerpt(&self, max_chars: usize) -> &str {
        match self.text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &self.text[..byte_idx],
            None => &self.text,
        }
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}
