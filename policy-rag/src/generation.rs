//! Answer generator trait: the language model behind the pipeline.

use async_trait::async_trait;

use crate::error::Result;
use crate::prompt::Prompt;

/// A language model that turns an assembled [`Prompt`] into an answer.
///
/// Implementations report network failures, rate limiting and timeouts as
/// [`RagError::Transient`](crate::RagError::Transient) so that
/// [`RetryingGenerator`](crate::RetryingGenerator) can retry them; anything
/// else (bad credentials, malformed requests) should be
/// [`RagError::GenerationFailure`](crate::RagError::GenerationFailure).
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Generate an answer for the prompt.
    async fn generate(&self, prompt: &Prompt) -> Result<String>;

    /// A short name for logs and error messages.
    fn name(&self) -> &str;
}
