//! Error types for the `policy-rag` crate.

use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur in RAG operations.
///
/// Errors are cheap to clone so one failed index build can be reported to
/// every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum RagError {
    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Caller-supplied input was rejected (for example a blank question).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The document contained no text to index.
    #[error("Document '{document_id}' is empty")]
    EmptyDocument {
        /// The document that produced no text.
        document_id: String,
    },

    /// The document source could not be read.
    #[error("Document unreadable ({path}): {message}")]
    DocumentUnreadable {
        /// Path or identifier of the document.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// Embedding generation failed permanently.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingFailure {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The query embedder does not live in the same vector space as the index.
    #[error("Embedding space mismatch: index uses {expected}, query uses {actual}")]
    EmbeddingSpaceMismatch {
        /// Model and dimensionality recorded in the index.
        expected: String,
        /// Model and dimensionality of the query embedder.
        actual: String,
    },

    /// Retrieval was attempted before an index was built or loaded.
    #[error("Vector index has not been built")]
    IndexNotBuilt,

    /// A retryable failure: network error, rate limiting, or timeout.
    #[error("Transient error ({operation}): {message}")]
    Transient {
        /// The operation that failed.
        operation: String,
        /// A description of the failure.
        message: String,
    },

    /// The answer generator failed permanently (bad credentials, malformed request).
    #[error("Generation error ({provider}): {message}")]
    GenerationFailure {
        /// The generator that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A transient failure persisted through every retry attempt.
    #[error("{operation} failed after {attempts} attempts, try again later: {last_error}")]
    RetriesExhausted {
        /// The operation that was retried.
        operation: String,
        /// How many attempts were made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: String,
    },

    /// The prompt cannot fit the generator's input limit even without context.
    #[error("Prompt needs {required} characters but the limit is {limit}")]
    PromptTooLarge {
        /// Characters needed for the prompt with an empty context.
        required: usize,
        /// The configured limit.
        limit: usize,
    },

    /// A persisted index could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error while reading or writing a persisted index.
    #[error(transparent)]
    Io(Arc<std::io::Error>),
}

impl RagError {
    /// Returns `true` if the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::Transient { .. })
    }

    /// Returns `true` if the caller may resubmit the same request later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RagError::Transient { .. } | RagError::RetriesExhausted { .. })
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Serialization(err.to_string())
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
