//! Build-once memoization of vector indexes.
//!
//! Building an index is slow (one embedding call per batch of chunks), so
//! [`IndexCache`] builds each index at most once per process. Entries are
//! keyed by the document's content hash together with the embedding model
//! and chunking parameters. Concurrent requests for the same key share a
//! single build attempt and all observe its outcome, success or failure.
//! A failed attempt is then forgotten, so a later request builds afresh.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::chunking::Chunker;
use crate::document::Document;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;

/// One build attempt; every caller that joined it reads the same outcome.
type Slot = Arc<OnceCell<Result<Arc<VectorIndex>>>>;

/// Process-wide cache of built [`VectorIndex`]es.
#[derive(Debug, Default)]
pub struct IndexCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl IndexCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache key for indexing `document` with `chunker` and `embedder`.
    ///
    /// The document id is not part of the key: identical text indexed under
    /// two ids shares one build.
    pub fn cache_key(
        document: &Document,
        chunker: &Chunker,
        embedder: &dyn EmbeddingProvider,
    ) -> String {
        format!(
            "{}|{}|{}/{}",
            document.content_hash(),
            chunker.fingerprint(),
            embedder.model(),
            embedder.dimensions()
        )
    }

    /// Return the cached index for `document`, building it if needed.
    ///
    /// The returned index always carries `document.id`, even when the
    /// vectors were built for an earlier document with the same text.
    ///
    /// # Errors
    ///
    /// Propagates chunking and embedding errors from the build. Callers that
    /// were waiting on the same attempt receive the same error; the next call
    /// after that starts a new build.
    pub async fn get_or_build(
        &self,
        document: &Document,
        chunker: &Chunker,
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Arc<VectorIndex>> {
        let key = Self::cache_key(document, chunker, embedder);
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(key.clone()).or_default().clone()
        };

        if let Some(Ok(index)) = slot.get() {
            debug!(document.id = %document.id, "reusing cached vector index");
            return Ok(relabel(index, document));
        }

        let outcome = slot
            .get_or_init(|| async move {
                info!(document.id = %document.id, "building vector index");
                let chunks = chunker.chunk_document(document)?;
                let index = VectorIndex::build(document, chunks, embedder, batch_size).await?;
                Ok::<_, RagError>(Arc::new(index))
            })
            .await;

        match outcome {
            Ok(index) => Ok(relabel(index, document)),
            Err(err) => {
                let mut slots = self.slots.lock().await;
                // Only drop our own attempt; a newer one may already be running.
                if slots.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                    warn!(
                        document.id = %document.id,
                        error = %err,
                        "discarding failed index build"
                    );
                    slots.remove(&key);
                }
                Err(err.clone())
            }
        }
    }

    /// Number of successfully built indexes.
    pub async fn len(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot.get(), Some(Ok(_))))
            .count()
    }

    /// Returns `true` if no index has been built yet.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn relabel(index: &Arc<VectorIndex>, document: &Document) -> Arc<VectorIndex> {
    if index.document_id() == document.id {
        index.clone()
    } else {
        Arc::new(index.as_ref().clone().with_document_id(document.id.clone()))
    }
}
