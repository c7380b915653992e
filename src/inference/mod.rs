//! Inference and text generation.

pub mod batch;
pub mod controller;
pub mod generator;
pub mod observer;
pub mod sampler;
pub mod streaming;

pub use batch::{batch_capacity, Batch, BatchEntry, SEQUENCE_ID};
pub use controller::{
    generate, Completion, FinishReason, GenerationSession, GenerationState, StepRecord,
};
pub use generator::TextGenerator;
pub use observer::{Diagnostic, GenerationEvent, GenerationObserver, ProgressFn};
pub use sampler::{Candidate, GrammarStage, SamplerChain, SamplerStage, Selector};
pub use streaming::stream_completion;
