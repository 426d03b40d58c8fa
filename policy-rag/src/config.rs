//! Configuration for the RAG pipeline.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::MIN_RETENTION;
use crate::error::{RagError, Result};

/// Retry behavior for calls to external embedding and generation services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled on each further attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,
    /// Time budget for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt with the given timeout.
    pub fn no_retry(timeout: Duration) -> Self {
        Self { max_attempts: 1, timeout, ..Self::default() }
    }

    /// Backoff to wait after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// How far back from a hard cutoff the chunker looks for a sentence or
    /// paragraph break. `None` means a quarter of `chunk_size`.
    pub boundary_lookback: Option<usize>,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Minimum cosine similarity, in `[-1, 1]`, for a top-k result to be kept.
    pub similarity_threshold: Option<f32>,
    /// Input limit of the answer generator, in characters of rendered prompt.
    pub max_prompt_chars: usize,
    /// Number of chunks sent to the embedder per request during index builds.
    pub embed_batch_size: usize,
    /// Maximum number of turns kept per conversation, at least two.
    /// `None` keeps everything.
    pub history_retention: Option<usize>,
    /// Retry behavior for embedding and generation calls.
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            boundary_lookback: None,
            top_k: 3,
            similarity_threshold: None,
            max_prompt_chars: 12_000,
            embed_batch_size: 64,
            history_retention: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Load a configuration from a JSON file and validate it.
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: RagConfig = serde_json::from_str(&raw).map_err(|e| {
            RagError::InvalidConfiguration(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The effective boundary lookback in characters.
    pub fn effective_lookback(&self) -> usize {
        self.boundary_lookback.unwrap_or(self.chunk_size / 4)
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set how far the chunker looks back for a semantic boundary.
    pub fn boundary_lookback(mut self, lookback: usize) -> Self {
        self.config.boundary_lookback = Some(lookback);
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Set the generator's input limit in characters.
    pub fn max_prompt_chars(mut self, limit: usize) -> Self {
        self.config.max_prompt_chars = limit;
        self
    }

    /// Set the embedding batch size used while building the index.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Cap the number of turns each conversation keeps.
    pub fn history_retention(mut self, max_turns: usize) -> Self {
        self.config.history_retention = Some(max_turns);
        self
    }

    /// Set the retry policy for external calls.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl RagConfig {
    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `boundary_lookback >= chunk_size`
    /// - `top_k == 0`, `max_prompt_chars == 0` or `embed_batch_size == 0`
    /// - `history_retention` is below one exchange (two turns)
    /// - `similarity_threshold` is NaN or outside `[-1, 1]`
    /// - `retry.max_attempts == 0`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if let Some(lookback) = self.boundary_lookback {
            if lookback >= self.chunk_size {
                return Err(RagError::InvalidConfiguration(format!(
                    "boundary_lookback ({lookback}) must be less than chunk_size ({})",
                    self.chunk_size
                )));
            }
        }
        if self.top_k == 0 {
            return Err(invalid("top_k must be greater than zero"));
        }
        if self.max_prompt_chars == 0 {
            return Err(invalid("max_prompt_chars must be greater than zero"));
        }
        if self.embed_batch_size == 0 {
            return Err(invalid("embed_batch_size must be greater than zero"));
        }
        if let Some(retention) = self.history_retention {
            if retention < MIN_RETENTION {
                return Err(RagError::InvalidConfiguration(format!(
                    "history_retention ({retention}) must keep at least {MIN_RETENTION} turns"
                )));
            }
        }
        if let Some(threshold) = self.similarity_threshold {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(RagError::InvalidConfiguration(format!(
                    "similarity_threshold ({threshold}) must be within [-1, 1]"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> RagError {
    RagError::InvalidConfiguration(message.to_string())
}
