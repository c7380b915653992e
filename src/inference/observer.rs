//! Side channel for progress, tokens and diagnostics.
//!
//! Observers never influence the generated text; the only thing they can do
//! is ask the loop to stop via [`GenerationObserver::should_cancel`].

use super::controller::Completion;
use crate::tokenizer::TokenId;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

/// Degraded-mode and failure notes recorded during one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    TemperatureDisabled { temperature: f32 },
    NucleusDisabled { top_p: f32 },
    GrammarDisabled,
    GrammarCompileFailed(String),
    EmptyPrompt,
    TokenizeFailed(String),
    ForwardFailed { step: usize, reason: String },
    DecodeFailed { token: TokenId, reason: String },
    GrammarExhausted { step: usize },
    Cancelled { step: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::TemperatureDisabled { temperature } => {
                write!(f, "temperature stage disabled (temperature = {})", temperature)
            }
            Diagnostic::NucleusDisabled { top_p } => {
                write!(f, "top-p stage disabled (top_p = {})", top_p)
            }
            Diagnostic::GrammarDisabled => write!(f, "no grammar supplied"),
            Diagnostic::GrammarCompileFailed(msg) => {
                write!(f, "grammar ignored, compilation failed: {}", msg)
            }
            Diagnostic::EmptyPrompt => write!(f, "prompt tokenized to zero tokens"),
            Diagnostic::TokenizeFailed(msg) => write!(f, "prompt tokenization failed: {}", msg),
            Diagnostic::ForwardFailed { step, reason } => {
                write!(f, "forward call failed at step {}: {}", step, reason)
            }
            Diagnostic::DecodeFailed { token, reason } => {
                write!(f, "token {} could not be decoded: {}", token, reason)
            }
            Diagnostic::GrammarExhausted { step } => {
                write!(f, "grammar admits no token at step {}", step)
            }
            Diagnostic::Cancelled { step } => write!(f, "cancelled before step {}", step),
        }
    }
}

/// Receives generation events. Every method has a no-op default.
pub trait GenerationObserver {
    /// Called every `progress_interval` tokens.
    fn on_progress(&mut self, _done: usize, _max: usize) {}

    /// Called for every token appended to the output.
    fn on_token(&mut self, _token: TokenId, _piece: &[u8]) {}

    fn on_diagnostic(&mut self, _diagnostic: &Diagnostic) {}

    /// Checked before each sampling step.
    fn should_cancel(&mut self) -> bool {
        false
    }
}

impl GenerationObserver for () {}

impl<O: GenerationObserver + ?Sized> GenerationObserver for &mut O {
    fn on_progress(&mut self, done: usize, max: usize) {
        (**self).on_progress(done, max)
    }

    fn on_token(&mut self, token: TokenId, piece: &[u8]) {
        (**self).on_token(token, piece)
    }

    fn on_diagnostic(&mut self, diagnostic: &Diagnostic) {
        (**self).on_diagnostic(diagnostic)
    }

    fn should_cancel(&mut self) -> bool {
        (**self).should_cancel()
    }
}

/// Adapts a `(done, max)` closure into a progress-only observer.
pub struct ProgressFn<F>(pub F);

impl<F: FnMut(usize, usize)> GenerationObserver for ProgressFn<F> {
    fn on_progress(&mut self, done: usize, max: usize) {
        (self.0)(done, max)
    }
}

/// Event sent over a streaming channel.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    Token { id: TokenId, piece: Vec<u8> },
    Progress { done: usize, max: usize },
    Diagnostic(Diagnostic),
    Done(Completion),
    Failed(String),
}

/// Fire-and-forget forwarding; a dropped receiver cancels the request.
impl GenerationObserver for UnboundedSender<GenerationEvent> {
    fn on_progress(&mut self, done: usize, max: usize) {
        let _ = self.send(GenerationEvent::Progress { done, max });
    }

    fn on_token(&mut self, token: TokenId, piece: &[u8]) {
        let _ = self.send(GenerationEvent::Token {
            id: token,
            piece: piece.to_vec(),
        });
    }

    fn on_diagnostic(&mut self, diagnostic: &Diagnostic) {
        let _ = self.send(GenerationEvent::Diagnostic(diagnostic.clone()));
    }

    fn should_cancel(&mut self) -> bool {
        self.is_closed()
    }
}
