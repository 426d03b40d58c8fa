//! Per-session conversation log.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Smallest retention cap: one question and its answer.
pub const MIN_RETENTION: usize = 2;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking questions.
    User,
    /// The answering model.
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who produced the message.
    pub role: Role,
    /// The message text.
    pub content: String,
    /// Texts of the chunks cited by an assistant answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

impl ConversationTurn {
    /// A user question.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), sources: None }
    }

    /// An assistant answer. An empty source list is stored as `None`.
    pub fn assistant(content: impl Into<String>, sources: Vec<String>) -> Self {
        let sources = if sources.is_empty() { None } else { Some(sources) };
        Self { role: Role::Assistant, content: content.into(), sources }
    }
}

/// Ordered log of turns for one session.
///
/// Append-only apart from [`reset`](ConversationStore::reset). With a
/// retention cap the oldest turns are evicted once the log grows past it.
/// Eviction never leaves an answer at the head without its question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationStore {
    turns: Vec<ConversationTurn>,
    retention: Option<usize>,
}

impl ConversationStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max_turns` turns.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `max_turns` cannot hold
    /// one full exchange.
    pub fn with_retention(max_turns: usize) -> Result<Self> {
        if max_turns < MIN_RETENTION {
            return Err(RagError::InvalidConfiguration(format!(
                "history_retention ({max_turns}) must keep at least {MIN_RETENTION} turns"
            )));
        }
        Ok(Self { turns: Vec::new(), retention: Some(max_turns) })
    }

    /// Create a store from an optional cap.
    pub fn with_optional_retention(max_turns: Option<usize>) -> Result<Self> {
        match max_turns {
            Some(max) => Self::with_retention(max),
            None => Ok(Self::new()),
        }
    }

    /// Append a turn.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        self.enforce_retention();
    }

    /// Append a question and its answer together.
    pub fn append_exchange(
        &mut self,
        question: impl Into<String>,
        answer: impl Into<String>,
        sources: Vec<String>,
    ) {
        self.turns.push(ConversationTurn::user(question));
        self.turns.push(ConversationTurn::assistant(answer, sources));
        self.enforce_retention();
    }

    /// All retained turns, oldest first.
    pub fn history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Remove every turn.
    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// Number of retained turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if no turns are retained.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The configured retention cap.
    pub fn retention(&self) -> Option<usize> {
        self.retention
    }

    fn enforce_retention(&mut self) {
        let Some(max) = self.retention else {
            return;
        };
        if self.turns.len() <= max {
            return;
        }
        let mut drain_to = self.turns.len() - max;
        // An answer goes with its evicted question.
        let orphaned = self.turns[drain_to - 1].role == Role::User
            && self.turns.get(drain_to).is_some_and(|turn| turn.role == Role::Assistant);
        if orphaned {
            drain_to += 1;
        }
        self.turns.drain(0..drain_to);
    }
}
