//! Offline providers for demos and tests.
//!
//! [`MockEmbeddingProvider`] hashes words into buckets, so texts sharing
//! vocabulary land close together. [`MockGenerator`] answers by quoting the
//! context sentence that shares the most words with the question.

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::generation::AnswerGenerator;
use crate::prompt::{CONTEXT_DELIMITER, Prompt};

const MOCK_MODEL: &str = "mock-bow";

/// Reply used when the prompt carries no context.
pub const NO_CONTEXT_ANSWER: &str = "I don't know. The document does not cover that.";

/// Deterministic bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    /// Create an embedder producing vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut emb = vec![0.0f32; self.dimensions];
        for word in words(text) {
            let hash =
                word.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            emb[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            emb.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(emb)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        MOCK_MODEL
    }
}

/// Extractive answer generator.
#[derive(Debug, Clone, Default)]
pub struct MockGenerator;

impl MockGenerator {
    /// Create a generator.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        if prompt.context.trim().is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let question: Vec<String> = words(&prompt.question).collect();
        let best = prompt
            .context
            .split(CONTEXT_DELIMITER)
            .flat_map(|chunk| chunk.split_inclusive(['.', '?', '!', '\n']))
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .map(|sentence| {
                let overlap = words(sentence).filter(|w| question.contains(w)).count();
                (overlap, sentence)
            })
            // Earliest sentence wins ties.
            .fold(None::<(usize, &str)>, |best, candidate| match best {
                Some(b) if b.0 >= candidate.0 => Some(b),
                _ => Some(candidate),
            });

        Ok(match best {
            Some((overlap, sentence)) if overlap > 0 => sentence.to_string(),
            _ => NO_CONTEXT_ANSWER.to_string(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Lowercased alphanumeric words of three or more characters.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
}
