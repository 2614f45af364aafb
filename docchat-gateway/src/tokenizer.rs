//! Token counting for context-window budgeting.

use docchat_common::{Error, Result};
use tiktoken_rs::CoreBPE;

/// Measures text in model tokens.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// BPE tokenizer matching the downstream model.
pub struct TiktokenCounter {
    model: String,
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Tokenizer for `model`; unknown models fall back to `cl100k_base`.
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                tracing::warn!(model, error = %e, "No tokenizer for model, using cl100k_base");
                tiktoken_rs::cl100k_base()
                    .map_err(|e| Error::Config(format!("loading cl100k_base: {e}")))?
            }
        };
        Ok(Self {
            model: model.to_string(),
            bpe,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Rough estimate (chars / 4), for when no tokenizer is wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimateCounter;

impl TokenCounter for EstimateCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}
