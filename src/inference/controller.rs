//! Generation controller: prompt → batch → sampler chain → text.
//!
//! A [`GenerationSession`] owns everything one request needs (batch, sampler
//! chain, cache position, accumulated bytes) and moves through
//! `Initialized → PromptLoaded → Generating → Completed | Aborted`.
//! [`GenerationSession::step`] is the pure part of the loop; it returns a
//! [`StepRecord`] and [`GenerationSession::run`] reports it to the observer.

use super::batch::{batch_capacity, Batch};
use super::observer::{Diagnostic, GenerationObserver};
use super::sampler::{nucleus_enabled, temperature_enabled, GrammarStage, SamplerChain};
use crate::config::GenerationRequest;
use crate::errors::SlmError;
use crate::grammar::{Grammar, GrammarMatcher};
use crate::model::SequenceModel;
use crate::tokenizer::{vocab_pieces, TokenId, Tokenizer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Initialized,
    PromptLoaded,
    Generating,
    Completed,
    Aborted,
}

/// Why a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model sampled its end-of-sequence token.
    EndOfSequence,
    /// A `}` followed the first `{` in the output.
    BraceClosed,
    /// The new-token budget was used up.
    MaxTokens,
    /// A forward call after the prompt failed; output so far is kept.
    ForwardFailed,
    EmptyPrompt,
    /// Prompt tokenization or the prompt forward call failed.
    PromptFailed,
    GrammarExhausted,
    Cancelled,
}

impl FinishReason {
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            FinishReason::EmptyPrompt
                | FinishReason::PromptFailed
                | FinishReason::GrammarExhausted
                | FinishReason::Cancelled
        )
    }
}

/// Result of one request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Tokens whose pieces make up `text` (EOS is not included).
    pub tokens: Vec<TokenId>,
    pub finish: FinishReason,
    /// Forward calls issued, including the prompt call.
    pub forward_calls: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub elapsed: Duration,
}

/// What one sampling step did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// 1-based step index.
    pub step: usize,
    /// Sampled token; `None` if sampling itself failed.
    pub token: Option<TokenId>,
    /// Bytes appended to the output by this step.
    pub piece: Vec<u8>,
    /// Set when the step ends the request.
    pub stop: Option<FinishReason>,
    pub diagnostics: Vec<Diagnostic>,
}

impl StepRecord {
    fn new(step: usize) -> Self {
        Self {
            step,
            token: None,
            piece: Vec::new(),
            stop: None,
            diagnostics: Vec::new(),
        }
    }

    /// The token was appended to the output.
    pub fn appended(&self) -> bool {
        self.token.is_some() && self.stop != Some(FinishReason::EndOfSequence)
    }
}

/// Stops at the first `}` that follows the first `{` in the output.
#[derive(Debug, Clone, Copy, Default)]
struct BraceStop {
    open_at: Option<usize>,
}

impl BraceStop {
    /// Check after bytes were appended to `output`.
    fn closed(&mut self, output: &[u8]) -> bool {
        if self.open_at.is_none() {
            self.open_at = output.iter().position(|&b| b == b'{');
        }
        match self.open_at {
            Some(open) => output[open + 1..].contains(&b'}'),
            None => false,
        }
    }
}

/// State for one in-flight request.
pub struct GenerationSession<'a, M: ?Sized, T: ?Sized> {
    model: &'a mut M,
    tokenizer: &'a T,
    request: &'a GenerationRequest,
    state: GenerationState,
    batch: Batch,
    chain: SamplerChain,
    logits: Vec<f32>,
    /// Next cache position to fill.
    position: u32,
    output: Vec<u8>,
    tokens: Vec<TokenId>,
    brace: BraceStop,
    forward_calls: usize,
    diagnostics: Vec<Diagnostic>,
    started: Instant,
}

impl<'a, M, T> GenerationSession<'a, M, T>
where
    M: SequenceModel + ?Sized,
    T: Tokenizer + ?Sized,
{
    /// Fresh session; the model's cache is reset so positions start at 0.
    pub fn new(model: &'a mut M, tokenizer: &'a T, request: &'a GenerationRequest) -> Self {
        model.reset();
        Self {
            model,
            tokenizer,
            request,
            state: GenerationState::Initialized,
            batch: Batch::with_capacity(0),
            chain: SamplerChain::new(),
            logits: Vec::new(),
            position: 0,
            output: Vec::new(),
            tokens: Vec::new(),
            brace: BraceStop::default(),
            forward_calls: 0,
            diagnostics: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Next cache position to be filled.
    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn chain(&self) -> &SamplerChain {
        &self.chain
    }

    /// Bytes generated so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    fn report<O: GenerationObserver + ?Sized>(&mut self, observer: &mut O, d: Diagnostic) {
        observer.on_diagnostic(&d);
        self.diagnostics.push(d);
    }

    /// Tokenize the prompt and submit it in one forward call.
    /// Returns the finish reason if the request cannot continue.
    pub fn load_prompt<O: GenerationObserver + ?Sized>(
        &mut self,
        observer: &mut O,
    ) -> Result<Option<FinishReason>, SlmError> {
        let req = self.request;
        let prompt = match self
            .tokenizer
            .encode(&req.prompt, req.add_special, req.parse_special)
        {
            Ok(ids) => ids,
            Err(e) => {
                error!("Prompt tokenization failed: {}", e);
                self.report(observer, Diagnostic::TokenizeFailed(e.to_string()));
                return Ok(Some(FinishReason::PromptFailed));
            }
        };
        if prompt.is_empty() {
            warn!("Prompt tokenized to zero tokens");
            self.report(observer, Diagnostic::EmptyPrompt);
            return Ok(Some(FinishReason::EmptyPrompt));
        }

        self.batch = Batch::with_capacity(batch_capacity(prompt.len(), req.max_new_tokens));
        let last = prompt.len() - 1;
        for (i, &token) in prompt.iter().enumerate() {
            self.batch.push(token, i as u32, i == last)?;
        }

        match self.forward() {
            Ok(logits) => self.logits = logits,
            Err(e) => {
                error!("Prompt forward call failed: {}", e);
                self.report(
                    observer,
                    Diagnostic::ForwardFailed {
                        step: 0,
                        reason: e.to_string(),
                    },
                );
                return Ok(Some(FinishReason::PromptFailed));
            }
        }
        self.position = prompt.len() as u32;
        self.state = GenerationState::PromptLoaded;
        debug!(
            prompt_tokens = prompt.len(),
            capacity = self.batch.capacity(),
            "Prompt loaded"
        );
        Ok(None)
    }

    /// Build the sampler chain; a grammar that fails to compile is dropped.
    pub fn build_chain<O: GenerationObserver + ?Sized>(&mut self, observer: &mut O) {
        let req = self.request;
        let sampling = &req.sampling;
        if !temperature_enabled(sampling.temperature) {
            let d = Diagnostic::TemperatureDisabled {
                temperature: sampling.temperature,
            };
            self.report(observer, d);
        }
        if !nucleus_enabled(sampling.top_p) {
            let d = Diagnostic::NucleusDisabled {
                top_p: sampling.top_p,
            };
            self.report(observer, d);
        }

        let grammar = match req.grammar_source() {
            None => {
                self.report(observer, Diagnostic::GrammarDisabled);
                None
            }
            Some(src) => match Grammar::parse(src) {
                Ok(grammar) => {
                    let pieces = vocab_pieces(self.tokenizer, self.model.vocab_size());
                    Some(GrammarStage::new(
                        GrammarMatcher::new(Arc::new(grammar)),
                        Arc::new(pieces),
                        self.model.eos_token(),
                    ))
                }
                Err(e) => {
                    warn!("Grammar ignored: {}", e);
                    self.report(observer, Diagnostic::GrammarCompileFailed(e.to_string()));
                    None
                }
            },
        };

        self.chain = SamplerChain::for_request(sampling, grammar);
        debug!(stages = ?self.chain.stage_names(), "Sampler chain built");
    }

    /// Sample one token, append its piece and evaluate the stop conditions.
    /// Does not touch the model.
    pub fn step(&mut self, step: usize) -> Result<StepRecord, SlmError> {
        self.state = GenerationState::Generating;
        let mut record = StepRecord::new(step);

        let token = match self.chain.sample(&self.logits) {
            Ok(token) => token,
            Err(SlmError::GrammarExhausted { step }) => {
                record.diagnostics.push(Diagnostic::GrammarExhausted { step });
                record.stop = Some(FinishReason::GrammarExhausted);
                return Ok(record);
            }
            Err(e) => return Err(e),
        };
        record.token = Some(token);

        if token == self.model.eos_token() {
            record.stop = Some(FinishReason::EndOfSequence);
            return Ok(record);
        }

        match self.tokenizer.decode(token) {
            Ok(piece) => record.piece = piece,
            Err(e) => {
                warn!("Decoding token {} failed: {}", token, e);
                record.diagnostics.push(Diagnostic::DecodeFailed {
                    token,
                    reason: e.to_string(),
                });
            }
        }
        self.output.extend_from_slice(&record.piece);
        self.tokens.push(token);

        if self.request.stop_on_closing_brace && self.brace.closed(&self.output) {
            record.stop = Some(FinishReason::BraceClosed);
        }
        Ok(record)
    }

    /// Submit the sampled token at the next position.
    /// Returns the finish reason if the forward call failed.
    pub fn submit<O: GenerationObserver + ?Sized>(
        &mut self,
        token: TokenId,
        step: usize,
        observer: &mut O,
    ) -> Result<Option<FinishReason>, SlmError> {
        self.batch.clear();
        self.batch.push(token, self.position, true)?;
        match self.forward() {
            Ok(logits) => {
                self.logits = logits;
                self.position += 1;
                Ok(None)
            }
            Err(e) => {
                error!("Forward call failed at step {}: {}", step, e);
                self.report(
                    observer,
                    Diagnostic::ForwardFailed {
                        step,
                        reason: e.to_string(),
                    },
                );
                Ok(Some(FinishReason::ForwardFailed))
            }
        }
    }

    /// One forward call over the current batch. A call that yields no
    /// logits counts as failed.
    fn forward(&mut self) -> Result<Vec<f32>, SlmError> {
        self.forward_calls += 1;
        let logits = self.model.forward(&self.batch)?;
        if logits.is_empty() {
            return Err(SlmError::EmptyLogits);
        }
        Ok(logits)
    }

    fn generate_loop<O: GenerationObserver + ?Sized>(
        &mut self,
        observer: &mut O,
    ) -> Result<FinishReason, SlmError> {
        let max = self.request.max_new_tokens;
        let interval = self.request.progress_interval.max(1);
        for step in 1..=max {
            if observer.should_cancel() {
                self.report(observer, Diagnostic::Cancelled { step });
                return Ok(FinishReason::Cancelled);
            }

            let record = self.step(step)?;
            for d in &record.diagnostics {
                observer.on_diagnostic(d);
            }
            self.diagnostics.extend(record.diagnostics.iter().cloned());
            if record.appended() {
                if let Some(token) = record.token {
                    observer.on_token(token, &record.piece);
                }
            }
            if let Some(stop) = record.stop {
                return Ok(stop);
            }
            if step % interval == 0 {
                observer.on_progress(step, max);
            }

            if let Some(token) = record.token {
                if let Some(stop) = self.submit(token, step, observer)? {
                    return Ok(stop);
                }
            }
        }
        Ok(FinishReason::MaxTokens)
    }

    fn finish(mut self, finish: FinishReason) -> Completion {
        self.state = if finish.is_aborted() {
            GenerationState::Aborted
        } else {
            GenerationState::Completed
        };
        let elapsed = self.started.elapsed();
        if self.state == GenerationState::Aborted {
            error!(?finish, tokens = self.tokens.len(), "Generation aborted");
        } else {
            info!(
                ?finish,
                tokens = self.tokens.len(),
                forward_calls = self.forward_calls,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "Generation finished"
            );
        }
        Completion {
            text: String::from_utf8_lossy(&self.output).into_owned(),
            tokens: self.tokens,
            finish,
            forward_calls: self.forward_calls,
            diagnostics: self.diagnostics,
            elapsed,
        }
    }

    /// Drive the session to a terminal state.
    pub fn run<O: GenerationObserver + ?Sized>(
        mut self,
        observer: &mut O,
    ) -> Result<Completion, SlmError> {
        if let Some(finish) = self.load_prompt(observer)? {
            return Ok(self.finish(finish));
        }
        self.build_chain(observer);
        let finish = self.generate_loop(observer)?;
        Ok(self.finish(finish))
    }
}

/// Run one completion request.
///
/// Every recoverable failure (empty prompt, tokenizer or forward failure,
/// grammar problems, cancellation) ends in `Ok` with whatever text was
/// produced. `Err` means the request was invalid or an internal invariant
/// broke.
pub fn generate<M, T, O>(
    model: &mut M,
    tokenizer: &T,
    request: &GenerationRequest,
    observer: &mut O,
) -> Result<Completion, SlmError>
where
    M: SequenceModel + ?Sized,
    T: Tokenizer + ?Sized,
    O: GenerationObserver + ?Sized,
{
    request.validate()?;
    GenerationSession::new(model, tokenizer, request).run(observer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;
    use crate::tokenizer::{ByteVocab, TwoPhase, BYTE_EOS, BYTE_VOCAB_SIZE};

    fn bytes(s: &str) -> Vec<TokenId> {
        s.bytes().map(TokenId::from).collect()
    }

    #[test]
    fn brace_stop_is_flat() {
        let mut b = BraceStop::default();
        assert!(!b.closed(b"}x"));
        assert!(!b.closed(b"}x{"));
        assert!(!b.closed(b"}x{ {"));
        assert!(b.closed(b"}x{ {}"));
    }

    #[test]
    fn session_walks_through_states() {
        let tok = TwoPhase::new(ByteVocab);
        let mut model = ScriptedModel::preferring(BYTE_VOCAB_SIZE, BYTE_EOS, bytes("ok"));
        let req = GenerationRequest::new("hi").max_new_tokens(4);
        let mut session = GenerationSession::new(&mut model, &tok, &req);
        assert_eq!(session.state(), GenerationState::Initialized);

        assert_eq!(session.load_prompt(&mut ()).unwrap(), None);
        assert_eq!(session.state(), GenerationState::PromptLoaded);
        // BOS + "hi"
        assert_eq!(session.position(), 3);

        session.build_chain(&mut ());
        assert_eq!(session.chain().stage_names(), vec!["greedy"]);

        let record = session.step(1).unwrap();
        assert_eq!(session.state(), GenerationState::Generating);
        assert_eq!(record.piece, b"o");
        assert!(record.stop.is_none());
    }

    #[test]
    fn step_record_reports_eos_without_text() {
        let tok = TwoPhase::new(ByteVocab);
        let mut model = ScriptedModel::preferring(BYTE_VOCAB_SIZE, BYTE_EOS, vec![BYTE_EOS]);
        let req = GenerationRequest::new("hi");
        let mut session = GenerationSession::new(&mut model, &tok, &req);
        session.load_prompt(&mut ()).unwrap();
        session.build_chain(&mut ());
        let record = session.step(1).unwrap();
        assert_eq!(record.token, Some(BYTE_EOS));
        assert_eq!(record.stop, Some(FinishReason::EndOfSequence));
        assert!(!record.appended());
        assert!(session.output().is_empty());
    }

    #[test]
    fn finish_reason_classification() {
        assert!(!FinishReason::ForwardFailed.is_aborted());
        assert!(!FinishReason::MaxTokens.is_aborted());
        assert!(FinishReason::GrammarExhausted.is_aborted());
        assert!(FinishReason::Cancelled.is_aborted());
    }
}
