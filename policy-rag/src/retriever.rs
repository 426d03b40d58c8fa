//! Question-to-chunks retrieval over a built [`VectorIndex`].

use std::sync::Arc;

use tracing::debug;

use crate::document::{Chunk, SearchResult};
use crate::embedding::{EmbeddingProvider, space_label};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;

/// Embeds questions and looks them up in a [`VectorIndex`].
///
/// The embedder must be the one the index was built with: a different model
/// or dimensionality fails with [`RagError::EmbeddingSpaceMismatch`].
///
/// # Example
///
/// ```rust,ignore
/// let retriever = Retriever::new(index, embedder)?;
/// let scored = retriever.retrieve_scored("When does coverage begin?", 3).await?;
/// let chunks = retriever.retrieve("When does coverage begin?", 3).await?;
/// ```
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    similarity_threshold: Option<f32>,
}

impl Retriever {
    /// Create a retriever, checking that `embedder` matches the index.
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        check_embedding_space(&index, embedder.as_ref())?;
        Ok(Self { index, embedder, similarity_threshold: None })
    }

    /// Drop results scoring below `threshold`.
    pub fn with_similarity_threshold(mut self, threshold: Option<f32>) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// The underlying index.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Return up to `k` chunks with their similarity scores, best first.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] for a blank question, embedding
    /// errors from the provider, and search errors from the index.
    pub async fn retrieve_scored(&self, question: &str, k: usize) -> Result<Vec<SearchResult>> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".to_string()));
        }
        check_embedding_space(&self.index, self.embedder.as_ref())?;

        let query = self.embedder.embed(question).await?;
        let mut results = self.index.search(&query, k)?;
        if let Some(threshold) = self.similarity_threshold {
            results.retain(|r| r.score >= threshold);
        }

        debug!(
            k,
            result_count = results.len(),
            top_score = results.first().map(|r| r.score),
            "retrieved chunks"
        );
        Ok(results)
    }

    /// Return up to `k` chunks, best first, without scores.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<Chunk>> {
        Ok(self.retrieve_scored(question, k).await?.into_iter().map(|r| r.chunk).collect())
    }
}

/// Fail unless `embedder` produces vectors in the index's embedding space.
pub(crate) fn check_embedding_space(
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
) -> Result<()> {
    if index.embedding_model() != embedder.model() || index.dimensions() != embedder.dimensions()
    {
        return Err(RagError::EmbeddingSpaceMismatch {
            expected: space_label(index.embedding_model(), index.dimensions()),
            actual: space_label(embedder.model(), embedder.dimensions()),
        });
    }
    Ok(())
}
