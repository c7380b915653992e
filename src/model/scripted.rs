//! Scripted model for tests: logits follow a fixed plan and every submitted
//! batch is recorded.

use super::SequenceModel;
use crate::errors::SlmError;
use crate::inference::{Batch, BatchEntry};
use crate::tokenizer::TokenId;

/// Logit given to the scripted token; everything else gets 0.
pub const SCRIPTED_LOGIT: f32 = 10.0;

#[derive(Debug, Clone)]
enum Plan {
    /// Forward call `i` favors `tokens[i]`; past the end it favors EOS.
    Preferred(Vec<TokenId>),
    /// Forward call `i` returns `rows[i]`; past the end the last row repeats.
    Rows(Vec<Vec<f32>>),
}

#[derive(Debug, Clone)]
pub struct ScriptedModel {
    vocab_size: usize,
    eos: TokenId,
    plan: Plan,
    fail_on_call: Option<usize>,
    calls: Vec<Vec<BatchEntry>>,
    resets: usize,
}

impl ScriptedModel {
    /// Forward call `i` (the prompt call is 0) strongly prefers `tokens[i]`.
    pub fn preferring(vocab_size: usize, eos: TokenId, tokens: Vec<TokenId>) -> Self {
        Self::with_plan(vocab_size, eos, Plan::Preferred(tokens))
    }

    /// Forward call `i` returns `rows[i]` verbatim.
    pub fn with_rows(vocab_size: usize, eos: TokenId, rows: Vec<Vec<f32>>) -> Self {
        Self::with_plan(vocab_size, eos, Plan::Rows(rows))
    }

    fn with_plan(vocab_size: usize, eos: TokenId, plan: Plan) -> Self {
        Self {
            vocab_size,
            eos,
            plan,
            fail_on_call: None,
            calls: Vec::new(),
            resets: 0,
        }
    }

    /// Make forward call number `call` (0 = prompt) fail.
    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Every batch submitted so far, including the failed one.
    pub fn calls(&self) -> &[Vec<BatchEntry>] {
        &self.calls
    }

    pub fn forward_calls(&self) -> usize {
        self.calls.len()
    }

    /// All positions submitted across all calls, in order.
    pub fn positions(&self) -> Vec<u32> {
        self.calls.iter().flatten().map(|e| e.position).collect()
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    fn row(&self, call: usize) -> Vec<f32> {
        match &self.plan {
            Plan::Preferred(tokens) => {
                let favored = tokens.get(call).copied().unwrap_or(self.eos);
                let mut row = vec![0.0; self.vocab_size];
                if let Some(slot) = row.get_mut(favored as usize) {
                    *slot = SCRIPTED_LOGIT;
                }
                row
            }
            Plan::Rows(rows) => rows
                .get(call)
                .or_else(|| rows.last())
                .cloned()
                .unwrap_or_else(|| vec![0.0; self.vocab_size]),
        }
    }
}

impl SequenceModel for ScriptedModel {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn eos_token(&self) -> TokenId {
        self.eos
    }

    fn reset(&mut self) {
        self.resets += 1;
    }

    fn forward(&mut self, batch: &Batch) -> Result<Vec<f32>, SlmError> {
        let call = self.calls.len();
        self.calls.push(batch.entries().to_vec());
        if self.fail_on_call == Some(call) {
            let position = batch.entries().first().map(|e| e.position).unwrap_or(0);
            return Err(SlmError::ForwardStep {
                position,
                reason: format!("injected failure on call {}", call),
            });
        }
        Ok(self.row(call))
    }
}
