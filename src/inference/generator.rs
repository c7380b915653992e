//! Text generation front door: a model and tokenizer paired for completions.

use super::controller::{generate, Completion};
use super::observer::GenerationObserver;
use crate::config::GenerationRequest;
use crate::errors::SlmError;
use crate::model::SequenceModel;
use crate::tokenizer::Tokenizer;

/// Owns one model and its tokenizer; runs one request at a time.
pub struct TextGenerator<M, T> {
    model: M,
    tokenizer: T,
}

impl<M: SequenceModel, T: Tokenizer> TextGenerator<M, T> {
    pub fn new(model: M, tokenizer: T) -> Self {
        Self { model, tokenizer }
    }

    /// Run one completion. See [`generate`] for the error policy.
    pub fn complete<O: GenerationObserver + ?Sized>(
        &mut self,
        request: &GenerationRequest,
        observer: &mut O,
    ) -> Result<Completion, SlmError> {
        generate(&mut self.model, &self.tokenizer, request, observer)
    }

    /// Completion text only, without an observer.
    pub fn complete_text(&mut self, request: &GenerationRequest) -> Result<String, SlmError> {
        Ok(self.complete(request, &mut ())?.text)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn into_parts(self) -> (M, T) {
        (self.model, self.tokenizer)
    }
}
