//! Sequence model contract and bundled implementations.
//!
//! The forward pass itself lives outside this crate. Anything that can turn a
//! batch of positioned tokens into next-token logits and keeps a KV cache keyed
//! by position implements [`SequenceModel`].

pub mod config;
pub mod demo;
pub mod scripted;

pub use config::ModelConfig;
pub use demo::{create_demo_model, DemoModel};
pub use scripted::ScriptedModel;

use crate::errors::SlmError;
use crate::inference::Batch;
use crate::tokenizer::TokenId;

/// One causal LM with an internal KV cache for a single sequence.
pub trait SequenceModel {
    fn vocab_size(&self) -> usize;

    fn eos_token(&self) -> TokenId;

    /// Drop all cached positions; the next batch starts at position 0.
    fn reset(&mut self);

    /// Run one forward step over `batch` and return the logits (length
    /// [`Self::vocab_size`]) of the entry that requested them.
    fn forward(&mut self, batch: &Batch) -> Result<Vec<f32>, SlmError>;
}

impl<M: SequenceModel + ?Sized> SequenceModel for &mut M {
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn eos_token(&self) -> TokenId {
        (**self).eos_token()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn forward(&mut self, batch: &Batch) -> Result<Vec<f32>, SlmError> {
        (**self).forward(batch)
    }
}

impl<M: SequenceModel + ?Sized> SequenceModel for Box<M> {
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn eos_token(&self) -> TokenId {
        (**self).eos_token()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn forward(&mut self, batch: &Batch) -> Result<Vec<f32>, SlmError> {
        (**self).forward(batch)
    }
}
