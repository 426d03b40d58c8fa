//! RAG pipeline orchestrator and chat sessions.
//!
//! The [`RagPipeline`] owns the ingest-and-answer workflow: it chunks and
//! embeds a document into a [`VectorIndex`] (through an [`IndexCache`]),
//! then answers questions by retrieving the top chunks, assembling a
//! [`Prompt`](crate::Prompt) and calling the [`AnswerGenerator`].
//! Embedding and generation calls go through the configured
//! [`RetryPolicy`](crate::RetryPolicy).
//!
//! A [`ChatSession`] adds a per-user conversation log on top of the shared
//! pipeline. Retrieval is single-turn: earlier turns never change the query.
//!
//! # Example
//!
//! ```rust,ignore
//! use policy_rag::{RagPipeline, RagConfig, MockEmbeddingProvider, MockGenerator};
//!
//! let pipeline = Arc::new(
//!     RagPipeline::builder()
//!         .config(RagConfig::default())
//!         .embedding_provider(Arc::new(MockEmbeddingProvider::default()))
//!         .generator(Arc::new(MockGenerator::new()))
//!         .build()?,
//! );
//!
//! pipeline.ingest(&document).await?;
//! let mut session = pipeline.session();
//! let answer = session.ask("When does coverage begin?").await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::cache::IndexCache;
use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::conversation::{ConversationStore, ConversationTurn};
use crate::document::{Document, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::AnswerGenerator;
use crate::index::VectorIndex;
use crate::prompt::PromptAssembler;
use crate::retriever::{Retriever, check_embedding_space};
use crate::retry::{RetryingEmbedder, RetryingGenerator};

/// A generated answer together with the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// The generator's reply.
    pub text: String,
    /// Chunks that were placed in the prompt, best first.
    pub sources: Vec<SearchResult>,
    /// Ids of retrieved chunks left out of the prompt to fit its size limit.
    pub dropped_chunks: Vec<usize>,
}

impl Answer {
    /// The first `max_chars` characters of each source chunk.
    pub fn source_excerpts(&self, max_chars: usize) -> Vec<&str> {
        self.sources.iter().map(|s| s.chunk.excerpt(max_chars)).collect()
    }

    /// Full texts of the source chunks.
    pub fn source_texts(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.chunk.text.clone()).collect()
    }
}

/// The RAG pipeline orchestrator.
///
/// Construct one via [`RagPipeline::builder()`]. The pipeline is shared
/// between sessions behind an `Arc`; the installed index is swapped
/// atomically by [`ingest`](RagPipeline::ingest) and
/// [`load_index`](RagPipeline::load_index).
pub struct RagPipeline {
    config: RagConfig,
    chunker: Chunker,
    assembler: PromptAssembler,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
    cache: Arc<IndexCache>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    /// Empty log with the configured retention, copied into each session.
    empty_history: ConversationStore,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return the chunker built from the configuration.
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Return the (retrying) embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Ingest a document: chunk, embed and install its index.
    ///
    /// The build goes through the index cache, so ingesting the same
    /// document twice (or concurrently) embeds it only once. The installed
    /// index is labelled with `document.id` even on a cache hit.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] for a blank document and
    /// [`RagError::EmbeddingFailure`] if embedding fails. On error the
    /// previously installed index, if any, stays in place.
    pub async fn ingest(&self, document: &Document) -> Result<Arc<VectorIndex>> {
        let index = self
            .cache
            .get_or_build(
                document,
                &self.chunker,
                self.embedding_provider.as_ref(),
                self.config.embed_batch_size,
            )
            .await
            .map_err(|e| {
                error!(document.id = %document.id, error = %e, "ingestion failed");
                e
            })?;

        *self.index.write().await = Some(index.clone());
        info!(document.id = %document.id, chunk_count = index.len(), "ingested document");
        Ok(index)
    }

    /// Install a previously saved index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingSpaceMismatch`] if the index was built
    /// with a different embedding model or dimensionality.
    pub async fn load_index(&self, index: VectorIndex) -> Result<Arc<VectorIndex>> {
        check_embedding_space(&index, self.embedding_provider.as_ref())?;
        let index = Arc::new(index);
        *self.index.write().await = Some(index.clone());
        info!(document.id = %index.document_id(), chunk_count = index.len(), "installed index");
        Ok(index)
    }

    /// The installed index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexNotBuilt`] before a successful
    /// [`ingest`](RagPipeline::ingest) or [`load_index`](RagPipeline::load_index).
    pub async fn index(&self) -> Result<Arc<VectorIndex>> {
        self.index.read().await.clone().ok_or(RagError::IndexNotBuilt)
    }

    /// A retriever over the installed index using the configured threshold.
    pub async fn retriever(&self) -> Result<Retriever> {
        let retriever = Retriever::new(self.index().await?, self.embedding_provider.clone())?;
        Ok(retriever.with_similarity_threshold(self.config.similarity_threshold))
    }

    /// Answer a single question without conversation state.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] for a blank question,
    /// [`RagError::IndexNotBuilt`] without an index,
    /// [`RagError::PromptTooLarge`] if the question alone exceeds the limit,
    /// and any error from the embedder or generator after retries.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".to_string()));
        }

        let retriever = self.retriever().await?;
        let mut ranked = retriever.retrieve_scored(question, self.config.top_k).await?;
        let prompt = self.assembler.assemble(question, &ranked)?;
        ranked.truncate(prompt.included.len());

        let text = self.generator.generate(&prompt).await.map_err(|e| {
            error!(generator = self.generator.name(), error = %e, "answer generation failed");
            e
        })?;

        info!(
            source_count = ranked.len(),
            dropped_count = prompt.dropped.len(),
            answer_chars = text.chars().count(),
            "answered question"
        );
        Ok(Answer { text, sources: ranked, dropped_chunks: prompt.dropped })
    }

    /// Start a conversation on this pipeline.
    pub fn session(self: &Arc<Self>) -> ChatSession {
        ChatSession::new(self.clone())
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// The embedding provider and generator are required. The configuration
/// defaults to [`RagConfig::default()`] and the index cache to a private one.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(config)
///     .embedding_provider(Arc::new(embedder))
///     .generator(Arc::new(generator))
///     .index_cache(shared_cache)  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    cache: Option<Arc<IndexCache>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Share an index cache with other pipelines.
    pub fn index_cache(mut self, cache: Arc<IndexCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the [`RagPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if a required component is
    /// missing or the configuration fails validation.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self.embedding_provider.ok_or_else(|| {
            RagError::InvalidConfiguration("embedding_provider is required".to_string())
        })?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::InvalidConfiguration("generator is required".to_string()))?;

        Ok(RagPipeline {
            chunker: Chunker::from_config(&config)?,
            assembler: PromptAssembler::new(config.max_prompt_chars),
            embedding_provider: Arc::new(RetryingEmbedder::new(
                embedding_provider,
                config.retry.clone(),
            )),
            generator: Arc::new(RetryingGenerator::new(generator, config.retry.clone())),
            cache: self.cache.unwrap_or_default(),
            index: RwLock::new(None),
            empty_history: ConversationStore::with_optional_retention(config.history_retention)?,
            config,
        })
    }
}

/// One user's conversation over a shared [`RagPipeline`].
///
/// Questions are answered one at a time (`ask` takes `&mut self`). A turn is
/// recorded only once its answer exists, so a failed question leaves the
/// history exactly as it was.
pub struct ChatSession {
    id: Uuid,
    pipeline: Arc<RagPipeline>,
    conversation: ConversationStore,
}

impl ChatSession {
    /// Start a session with a fresh id and an empty history.
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        let conversation = pipeline.empty_history.clone();
        Self { id: Uuid::new_v4(), pipeline, conversation }
    }

    /// The session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Answer `question` and record the exchange.
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let turn = self.conversation.len() / 2 + 1;
        let span = info_span!("chat_turn", session.id = %self.id, turn);
        let answer = self.pipeline.answer(question).instrument(span).await?;
        self.conversation.append_exchange(question, answer.text.clone(), answer.source_texts());
        Ok(answer)
    }

    /// The conversation so far, oldest first.
    pub fn history(&self) -> &[ConversationTurn] {
        self.conversation.history()
    }

    /// Forget the conversation. The index is kept.
    pub fn reset(&mut self) {
        info!(session.id = %self.id, turns = self.conversation.len(), "conversation reset");
        self.conversation.reset();
    }
}
