//! Central error types for slm-oxidized.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlmError {
    #[error("Prompt tokenized to zero tokens")]
    EmptyPrompt,

    #[error("Forward step failed at position {position}: {reason}")]
    ForwardStep { position: u32, reason: String },

    #[error("Forward call returned no logits")]
    EmptyLogits,

    #[error("Grammar compilation failed: {0}")]
    GrammarCompilation(String),

    #[error("Grammar admits no candidate token at step {step}")]
    GrammarExhausted { step: usize },

    #[error("Batch capacity {capacity} exceeded")]
    CapacityExceeded { capacity: usize },

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Token {0} out of vocabulary range")]
    InvalidToken(u32),

    #[error("Session handle is stale or was never issued")]
    InvalidHandle,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
