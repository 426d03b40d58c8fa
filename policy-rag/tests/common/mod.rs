//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use policy_rag::{AnswerGenerator, EmbeddingProvider, Prompt, RagError, Result};

pub const POLICY_TEXT: &str =
    "Claims must be filed within 30 days. Coverage begins 24 hours after enrollment.";

/// Word prefixes that define the keyword embedding space.
const VOCAB: &[&str] = &["claim", "file", "day", "cover", "begin", "hour", "enrol", "premium"];

/// Embeds text as counts of vocabulary prefixes, one dimension per term.
///
/// Counts every batch call so tests can tell how many index builds ran.
pub struct KeywordEmbedder {
    model: String,
    delay: Duration,
    batch_calls: AtomicU32,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            model: "keywords".to_string(),
            delay: Duration::ZERO,
            batch_calls: AtomicU32::new(0),
        }
    }

    /// Sleep before answering each batch, to make concurrent builds overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn batch_calls(&self) -> u32 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; VOCAB.len()];
        for word in text.split(|c: char| !c.is_alphanumeric()).map(str::to_lowercase) {
            for (i, term) in VOCAB.iter().enumerate() {
                if word.starts_with(term) {
                    v[i] += 1.0;
                }
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vectorize(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// An embedder whose service rejects every request.
pub struct RejectingEmbedder {
    delay: Duration,
    calls: AtomicU32,
}

impl RejectingEmbedder {
    pub fn new() -> Self {
        Self { delay: Duration::ZERO, calls: AtomicU32::new(0) }
    }

    /// Sleep before rejecting, so concurrent callers pile up on one request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests received, single or batch.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn reject(&self) -> RagError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        RagError::EmbeddingFailure { provider: "rejecting".into(), message: "401".into() }
    }
}

#[async_trait]
impl EmbeddingProvider for RejectingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(self.reject().await)
    }

    async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Err(self.reject().await)
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    fn model(&self) -> &str {
        "keywords"
    }
}

/// A keyword embedder behind a service that is briefly unavailable.
///
/// The first `batch_failures` batch calls and the first `query_failures`
/// single-text calls fail with a transient error.
pub struct FlakyEmbedder {
    batch_failures: AtomicU32,
    query_failures: AtomicU32,
    batch_calls: AtomicU32,
    query_calls: AtomicU32,
}

impl FlakyEmbedder {
    pub fn new(batch_failures: u32, query_failures: u32) -> Self {
        Self {
            batch_failures: AtomicU32::new(batch_failures),
            query_failures: AtomicU32::new(query_failures),
            batch_calls: AtomicU32::new(0),
            query_calls: AtomicU32::new(0),
        }
    }

    pub fn batch_calls(&self) -> u32 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn unavailable(remaining: &AtomicU32, operation: &str) -> Result<()> {
        let failing = remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RagError::Transient {
                operation: operation.into(),
                message: "503 Service Unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Self::unavailable(&self.query_failures, "embed")?;
        Ok(KeywordEmbedder::vectorize(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Self::unavailable(&self.batch_failures, "embed_batch")?;
        Ok(texts.iter().map(|t| KeywordEmbedder::vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    fn model(&self) -> &str {
        "keywords"
    }
}

/// How a [`ScriptedGenerator`] fails before it starts answering.
#[derive(Clone, Copy)]
pub enum Failure {
    Transient,
    Permanent,
}

/// Fails a fixed number of times, then answers with the first context line.
pub struct ScriptedGenerator {
    failures_left: AtomicU32,
    failure: Failure,
    calls: AtomicU32,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGenerator {
    pub fn answering() -> Self {
        Self::failing(0, Failure::Transient)
    }

    pub fn failing(times: u32, failure: Failure) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            failure,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AnswerGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(match self.failure {
                Failure::Transient => RagError::Transient {
                    operation: "generate".into(),
                    message: "503 Service Unavailable".into(),
                },
                Failure::Permanent => RagError::GenerationFailure {
                    provider: "scripted".into(),
                    message: "401 Unauthorized".into(),
                },
            });
        }

        Ok(format!("Per the policy: {}", prompt.context.lines().next().unwrap_or_default()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
