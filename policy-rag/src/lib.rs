//! Retrieval-augmented question answering over a single policy document.
//!
//! This crate provides:
//! - Boundary-aware chunking with character offsets and page tracking
//! - An in-memory cosine-similarity [`VectorIndex`] with JSON persistence
//! - A build-once [`IndexCache`] keyed by document content and model
//! - Prompt assembly under a size limit, dropping lowest-ranked chunks first
//! - Per-session conversation logs through [`ChatSession`]
//! - Timeouts and bounded retries around embedding and generation calls
//!
//! Backends plug in through the [`EmbeddingProvider`] and [`AnswerGenerator`]
//! traits. The `openai` feature adds OpenAI clients; the `pdf` feature
//! (default) enables PDF loading.

pub mod cache;
pub mod chunking;
pub mod config;
pub mod conversation;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod loader;
pub mod mock;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod retry;

#[cfg(feature = "openai")]
pub mod openai;

pub use cache::IndexCache;
pub use chunking::Chunker;
pub use config::{RagConfig, RagConfigBuilder, RetryPolicy};
pub use conversation::{ConversationStore, ConversationTurn, Role};
pub use document::{Chunk, Document, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use generation::AnswerGenerator;
pub use index::{INDEX_FORMAT_VERSION, IndexEntry, VectorIndex};
pub use loader::load_document;
pub use mock::{MockEmbeddingProvider, MockGenerator};
pub use pipeline::{Answer, ChatSession, RagPipeline, RagPipelineBuilder};
pub use prompt::{CONTEXT_DELIMITER, Prompt, PromptAssembler};
pub use retriever::Retriever;
pub use retry::{RetryingEmbedder, RetryingGenerator, with_retry};

#[cfg(feature = "openai")]
pub use openai::{OpenAIAnswerGenerator, OpenAIEmbeddingProvider};
