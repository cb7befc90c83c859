//! Bounded conversation history

use std::collections::VecDeque;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire name used by chat-completion APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One utterance in the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// Ordered user/assistant turns, evicted oldest pair first
///
/// Turns are only ever added as complete pairs, so the history never
/// holds an assistant reply without the question that produced it.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_pairs: usize,
}

impl ConversationHistory {
    /// Create an empty history holding at most `max_pairs` exchanges
    #[must_use]
    pub fn new(max_pairs: usize) -> Self {
        let max_pairs = max_pairs.max(1);
        Self {
            turns: VecDeque::with_capacity(max_pairs * 2 + 2),
            max_pairs,
        }
    }

    /// Append a user message and the reply it received
    pub fn record_exchange(&mut self, user: impl Into<String>, reply: impl Into<String>) {
        self.turns.push_back(ConversationTurn {
            role: Role::User,
            text: user.into(),
        });
        self.turns.push_back(ConversationTurn {
            role: Role::Assistant,
            text: reply.into(),
        });

        while self.turns.len() > self.max_pairs * 2 {
            self.turns.pop_front();
            self.turns.pop_front();
            tracing::trace!(max_pairs = self.max_pairs, "evicted oldest exchange");
        }
    }

    /// Turns in chronological order
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Number of turns (twice the number of exchanges)
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Maximum number of exchanges kept
    #[must_use]
    pub const fn max_pairs(&self) -> usize {
        self.max_pairs
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_whole_pairs() {
        let mut history = ConversationHistory::new(2);
        history.record_exchange("q1", "a1");
        history.record_exchange("q2", "a2");
        history.record_exchange("q3", "a3");

        let texts: Vec<&str> = history.turns().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["q2", "a2", "q3", "a3"]);
        assert_eq!(history.turns().next().map(|t| t.role), Some(Role::User));
    }

    #[test]
    fn test_clear() {
        let mut history = ConversationHistory::new(10);
        history.record_exchange("hi", "hello");
        assert_eq!(history.len(), 2);
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_zero_cap_keeps_one_pair() {
        let mut history = ConversationHistory::new(0);
        history.record_exchange("a", "b");
        history.record_exchange("c", "d");
        assert_eq!(history.len(), 2);
    }
}
