//! Deterministic demo model: seeded pseudo-random bigram logits.
//!
//! There are no weights. The logit for candidate `c` after token `p` is a hash
//! of `(seed, p, c)`, so the same seed always produces the same continuation.
//! The model still keeps real cache bookkeeping and rejects out-of-order
//! positions, which makes it useful for exercising the generation loop.

use super::{ModelConfig, SequenceModel};
use crate::errors::SlmError;
use crate::inference::{Batch, SEQUENCE_ID};
use crate::tokenizer::TokenId;

/// Logits fall in `[-LOGIT_SPREAD, LOGIT_SPREAD)`.
const LOGIT_SPREAD: f32 = 4.0;

#[derive(Debug, Clone)]
pub struct DemoModel {
    config: ModelConfig,
    n_past: u32,
}

/// Create a byte-level demo model from a seed.
pub fn create_demo_model(seed: u64) -> DemoModel {
    DemoModel::new(ModelConfig::byte_level(seed))
}

impl DemoModel {
    pub fn new(config: ModelConfig) -> Self {
        Self { config, n_past: 0 }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of positions currently held in the cache.
    pub fn cached_positions(&self) -> u32 {
        self.n_past
    }

    fn logits_after(&self, prev: TokenId) -> Vec<f32> {
        (0..self.config.vocab_size as u64)
            .map(|c| {
                let h = splitmix64(
                    self.config.seed ^ (prev as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ c,
                );
                // Top 24 bits → [0, 1).
                let u = (h >> 40) as f32 / (1u64 << 24) as f32;
                (u * 2.0 - 1.0) * LOGIT_SPREAD
            })
            .collect()
    }
}

impl SequenceModel for DemoModel {
    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn eos_token(&self) -> TokenId {
        self.config.eos_token
    }

    fn reset(&mut self) {
        self.n_past = 0;
    }

    fn forward(&mut self, batch: &Batch) -> Result<Vec<f32>, SlmError> {
        let fail = |position: u32, reason: String| SlmError::ForwardStep { position, reason };
        let out_idx = batch
            .logits_index()
            .ok_or_else(|| fail(self.n_past, "no entry requests logits".to_string()))?;

        for (i, entry) in batch.entries().iter().enumerate() {
            let expected = self.n_past + i as u32;
            if entry.sequence_id != SEQUENCE_ID {
                return Err(fail(
                    entry.position,
                    format!("unknown sequence id {}", entry.sequence_id),
                ));
            }
            if entry.position != expected {
                return Err(fail(
                    entry.position,
                    format!("expected position {}", expected),
                ));
            }
            if entry.position as usize >= self.config.n_ctx {
                return Err(fail(
                    entry.position,
                    format!("context window of {} exhausted", self.config.n_ctx),
                ));
            }
            if entry.token as usize >= self.config.vocab_size {
                return Err(fail(entry.position, format!("token {} out of range", entry.token)));
            }
        }

        self.n_past += batch.len() as u32;
        Ok(self.logits_after(batch.entries()[out_idx].token))
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
