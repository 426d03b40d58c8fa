//! Timeouts and bounded retries for calls to external services.
//!
//! [`with_retry`] runs an async call under a [`RetryPolicy`]: each attempt
//! is bounded by the policy timeout, transient failures are retried with
//! exponential backoff, and permanent failures are returned immediately.
//! [`RetryingEmbedder`] and [`RetryingGenerator`] apply the same policy to
//! every call of a wrapped provider.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::config::RetryPolicy;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::AnswerGenerator;
use crate::prompt::Prompt;

/// Run `call` under `policy`, retrying transient failures.
///
/// # Errors
///
/// Returns the first permanent error unchanged, or
/// [`RagError::RetriesExhausted`] once every attempt failed transiently.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Transient {
                operation: operation.to_string(),
                message: format!("timed out after {:?}", policy.timeout),
            }),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            error!(operation, attempts = attempt, error = %err, "retries exhausted");
            return Err(RagError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        let delay = policy.backoff_for(attempt);
        warn!(
            operation,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// An [`EmbeddingProvider`] that applies a [`RetryPolicy`] to every call.
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EmbeddingProvider for RetryingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_retry(&self.policy, "embed", || self.inner.embed(text)).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        with_retry(&self.policy, "embed_batch", || self.inner.embed_batch(texts)).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// An [`AnswerGenerator`] that applies a [`RetryPolicy`] to every call.
pub struct RetryingGenerator {
    inner: Arc<dyn AnswerGenerator>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn AnswerGenerator>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl AnswerGenerator for RetryingGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        with_retry(&self.policy, "generate", || self.inner.generate(prompt)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
