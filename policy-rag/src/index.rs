//! In-memory vector index over the chunks of one document.
//!
//! A [`VectorIndex`] is built once from the chunks of a [`Document`] and is
//! immutable afterwards, so it can be shared behind an `Arc` by any number
//! of concurrent retrievals. Search is brute-force cosine similarity with
//! ties broken by ascending chunk id. Indexes serialize to versioned JSON
//! and round-trip exactly.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::document::{Chunk, Document, SearchResult};
use crate::embedding::{EmbeddingProvider, space_label};
use crate::error::{RagError, Result};

/// Version written into serialized indexes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// A chunk and its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The indexed chunk.
    pub chunk: Chunk,
    /// The chunk's embedding.
    pub vector: Vec<f32>,
}

/// Chunk vectors plus source text for one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    format_version: u32,
    document_id: String,
    content_hash: String,
    embedding_model: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed `chunks` in batches of `batch_size` and build the index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingFailure`] if any batch fails to embed or
    /// returns malformed vectors; nothing is built in that case.
    pub async fn build(
        document: &Document,
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let embedded = embedder.embed_batch(&texts).await.map_err(|e| {
                error!(
                    document.id = %document.id,
                    error = %e,
                    "embedding failed during index build"
                );
                match e {
                    RagError::EmbeddingFailure { .. } => e,
                    other => RagError::EmbeddingFailure {
                        provider: embedder.model().to_string(),
                        message: other.to_string(),
                    },
                }
            })?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingFailure {
                    provider: embedder.model().to_string(),
                    message: format!(
                        "expected {} embeddings, provider returned {}",
                        batch.len(),
                        embedded.len()
                    ),
                });
            }
            debug!(batch_size = batch.len(), "embedded chunk batch");
            vectors.extend(embedded);
        }

        let index = Self::from_embeddings(
            document.id.clone(),
            document.content_hash(),
            embedder.model(),
            chunks,
            vectors,
        )?;
        if index.dimensions != embedder.dimensions() {
            return Err(RagError::EmbeddingFailure {
                provider: embedder.model().to_string(),
                message: format!(
                    "provider declares {} dimensions but produced {}",
                    embedder.dimensions(),
                    index.dimensions
                ),
            });
        }

        info!(
            document.id = %index.document_id,
            chunk_count = index.len(),
            dimensions = index.dimensions,
            model = %index.embedding_model,
            "built vector index"
        );
        Ok(index)
    }

    /// Assemble an index from chunks and precomputed vectors.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] for zero chunks and
    /// [`RagError::EmbeddingFailure`] if the vectors are missing, empty,
    /// of mixed dimensionality, or contain non-finite values.
    pub fn from_embeddings(
        document_id: impl Into<String>,
        content_hash: impl Into<String>,
        embedding_model: impl Into<String>,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        let document_id = document_id.into();
        let embedding_model = embedding_model.into();
        if chunks.is_empty() {
            return Err(RagError::EmptyDocument { document_id });
        }
        if chunks.len() != vectors.len() {
            return Err(RagError::EmbeddingFailure {
                provider: embedding_model,
                message: format!("{} chunks but {} vectors", chunks.len(), vectors.len()),
            });
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();
        let dimensions = entries[0].vector.len();

        let index = Self {
            format_version: INDEX_FORMAT_VERSION,
            document_id,
            content_hash: content_hash.into(),
            embedding_model,
            dimensions,
            entries,
        };
        index.check_vectors()?;
        Ok(index)
    }

    fn check_vectors(&self) -> Result<()> {
        let failure = |message: String| RagError::EmbeddingFailure {
            provider: self.embedding_model.clone(),
            message,
        };
        if self.dimensions == 0 {
            return Err(failure("embeddings must not be empty".to_string()));
        }
        for entry in &self.entries {
            if entry.vector.len() != self.dimensions {
                return Err(failure(format!(
                    "chunk {} has {} dimensions, expected {}",
                    entry.chunk.id,
                    entry.vector.len(),
                    self.dimensions
                )));
            }
            if entry.vector.iter().any(|x| !x.is_finite()) {
                return Err(failure(format!("chunk {} has non-finite components", entry.chunk.id)));
            }
        }
        Ok(())
    }

    /// Return the `k` chunks most similar to `query`, best first.
    ///
    /// If `k` exceeds the number of chunks, every chunk is returned.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `k == 0` and
    /// [`RagError::EmbeddingSpaceMismatch`] if `query` has the wrong
    /// dimensionality.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(RagError::InvalidConfiguration("k must be at least 1".to_string()));
        }
        if query.len() != self.dimensions {
            return Err(RagError::EmbeddingSpaceMismatch {
                expected: space_label(&self.embedding_model, self.dimensions),
                actual: format!("query vector/{}", query.len()),
            });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(RagError::InvalidInput("query vector has non-finite components".into()));
        }

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&entry.vector, query), entry))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.chunk.id.cmp(&b.1.chunk.id)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| SearchResult { chunk: entry.chunk.clone(), score })
            .collect())
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimensionality shared by every vector.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Identifier of the embedding model that produced the vectors.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Identifier of the indexed document.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// The same vectors recorded under another document id.
    pub(crate) fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = document_id.into();
        self
    }

    /// SHA-256 of the indexed document text.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// The indexed entries in chunk order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Serialize the index to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize and validate an index from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Serialization`] for malformed input or an
    /// unsupported format version.
    pub fn from_json(json: &str) -> Result<Self> {
        let index: VectorIndex = serde_json::from_str(json)?;
        if index.format_version != INDEX_FORMAT_VERSION {
            return Err(RagError::Serialization(format!(
                "unsupported index format version {} (expected {INDEX_FORMAT_VERSION})",
                index.format_version
            )));
        }
        if index.entries.is_empty() {
            return Err(RagError::Serialization("index has no entries".to_string()));
        }
        index.check_vectors().map_err(|e| RagError::Serialization(e.to_string()))?;
        Ok(index)
    }

    /// Write the index to `path` as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), chunk_count = self.len(), "saved vector index");
        Ok(())
    }

    /// Read an index previously written with [`save`](VectorIndex::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let index = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), chunk_count = index.len(), "loaded vector index");
        Ok(index)
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
