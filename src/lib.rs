//! # slm-oxidized
//!
//! Constrained text generation against a causal language model with a
//! position-indexed KV cache.
//!
//! ## Architecture
//!
//! - **Batch builder**: fixed-capacity positioned token batches, one sequence
//! - **Sampler chain**: temperature → top-p → grammar → greedy/sampling selector
//! - **Grammar**: GBNF parser and incremental matcher over raw token pieces
//! - **Controller**: prompt load, decode loop, stop conditions and progress
//! - **Collaborators**: tokenizer and sequence-model traits with byte-level,
//!   HuggingFace, demo and scripted implementations

pub mod config;
pub mod errors;
pub mod grammar;
pub mod inference;
pub mod model;
pub mod session;
pub mod tokenizer;

pub use config::{GenerationConfig, GenerationRequest, SamplingParams, SelectorKind};
pub use errors::SlmError;
pub use grammar::{Grammar, GrammarMatcher};
pub use inference::{
    generate, stream_completion, Batch, Completion, Diagnostic, FinishReason, GenerationEvent,
    GenerationObserver, ProgressFn, SamplerChain, TextGenerator,
};
pub use model::{create_demo_model, DemoModel, ModelConfig, ScriptedModel, SequenceModel};
pub use session::{SessionArena, SessionHandle};
pub use tokenizer::{ByteVocab, HfTokenizer, TokenId, Tokenizer, TwoPhase};
