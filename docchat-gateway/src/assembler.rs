//! Bounds conversation history to a model's token budget.

use crate::tokenizer::TokenCounter;
use docchat_memory::Message;
use std::sync::Arc;

/// Keeps the newest messages that fit a token budget.
///
/// Messages are dropped oldest-first and never split; survivors keep their
/// order. Trimming is idempotent for a fixed budget.
#[derive(Clone)]
pub struct ConversationAssembler {
    counter: Arc<dyn TokenCounter>,
}

impl ConversationAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    /// Longest suffix of `messages` whose total token count is within `budget`.
    pub fn trim(&self, messages: &[Message], budget: usize) -> Vec<Message> {
        let mut used = 0usize;
        let mut start = messages.len();

        for (idx, message) in messages.iter().enumerate().rev() {
            let cost = self.counter.count(&message.content);
            if used + cost > budget {
                break;
            }
            used += cost;
            start = idx;
        }

        if start > 0 {
            tracing::debug!(
                dropped = start,
                kept = messages.len() - start,
                tokens = used,
                budget,
                "Trimmed conversation history"
            );
        }

        messages[start..].to_vec()
    }

    /// Total token count of `messages`.
    pub fn count_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.counter.count(&m.content)).sum()
    }
}
