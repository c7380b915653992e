//! Model configuration for the bundled sequence models.

use crate::tokenizer::{TokenId, BYTE_EOS, BYTE_VOCAB_SIZE};
use serde::{Deserialize, Serialize};

/// Shape and context limits of a bundled model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Vocabulary size.
    pub vocab_size: usize,
    /// End-of-sequence token id.
    pub eos_token: TokenId,
    /// Context window (KV cache slots).
    pub n_ctx: usize,
    /// Seed for the demo model's logit table.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: BYTE_VOCAB_SIZE,
            eos_token: BYTE_EOS,
            n_ctx: 2048,
            seed: 42,
        }
    }
}

impl ModelConfig {
    /// Config matching the byte vocabulary.
    pub fn byte_level(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}
