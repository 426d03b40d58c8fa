//! Prompt assembly: retrieved context plus question in a fixed template.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};

/// Separator placed between chunk texts in the context block.
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

const INSTRUCTIONS: &str = "Answer the question using only the context below.\n\
If the answer cannot be found in the context, say that you do not know instead of making one up.";

/// A rendered generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// The user's question, verbatim.
    pub question: String,
    /// Chunk texts in rank order, joined by [`CONTEXT_DELIMITER`].
    pub context: String,
    /// The full prompt sent to the generator.
    pub text: String,
    /// Ids of the chunks that made it into the context, in rank order.
    pub included: Vec<usize>,
    /// Ids of the lowest-ranked chunks dropped to respect the size limit.
    pub dropped: Vec<usize>,
}

impl Prompt {
    /// Returns `true` if any retrieved chunk was left out.
    pub fn was_truncated(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// Renders questions and ranked chunks into [`Prompt`]s no larger than a
/// character limit.
///
/// When the context does not fit, chunks are dropped from the bottom of the
/// ranking: a chunk is only included if every higher-ranked chunk is, and
/// chunk texts are never shortened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptAssembler {
    max_chars: usize,
}

impl PromptAssembler {
    /// Create an assembler for a generator that accepts `max_chars` characters.
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// The input limit in characters.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Assemble a prompt from ranked search results.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PromptTooLarge`] if the question alone does not fit.
    pub fn assemble(&self, question: &str, ranked: &[SearchResult]) -> Result<Prompt> {
        let chunks: Vec<&Chunk> = ranked.iter().map(|r| &r.chunk).collect();
        self.assemble_from(question, &chunks)
    }

    /// Assemble a prompt from chunks already in rank order.
    pub fn assemble_chunks(&self, question: &str, chunks: &[Chunk]) -> Result<Prompt> {
        let chunks: Vec<&Chunk> = chunks.iter().collect();
        self.assemble_from(question, &chunks)
    }

    fn assemble_from(&self, question: &str, chunks: &[&Chunk]) -> Result<Prompt> {
        let base = render("", question).chars().count();
        if base > self.max_chars {
            return Err(RagError::PromptTooLarge { required: base, limit: self.max_chars });
        }

        let budget = self.max_chars - base;
        let delimiter_len = CONTEXT_DELIMITER.chars().count();
        let mut used = 0;
        let mut kept = 0;
        for chunk in chunks {
            let cost = chunk.text.chars().count() + if kept > 0 { delimiter_len } else { 0 };
            if used + cost > budget {
                break;
            }
            used += cost;
            kept += 1;
        }

        let (included, dropped) = chunks.split_at(kept);
        let context =
            included.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(CONTEXT_DELIMITER);
        let included: Vec<usize> = included.iter().map(|c| c.id).collect();
        let dropped: Vec<usize> = dropped.iter().map(|c| c.id).collect();

        if dropped.is_empty() {
            debug!(chunk_count = included.len(), context_chars = used, "assembled prompt");
        } else {
            warn!(
                kept = included.len(),
                dropped = ?dropped,
                limit = self.max_chars,
                "context truncated to fit prompt limit"
            );
        }

        Ok(Prompt {
            question: question.to_string(),
            text: render(&context, question),
            context,
            included,
            dropped,
        })
    }
}

fn render(context: &str, question: &str) -> String {
    format!("{INSTRUCTIONS}\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:")
}
