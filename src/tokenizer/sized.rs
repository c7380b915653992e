//! Two-phase (probe, then fill) adapter for C-style vocabularies.
//!
//! Native tokenizers usually write into caller-provided buffers and report
//! the required length as a negative number when the buffer is too small.
//! [`TwoPhase`] turns that contract into the owned-buffer [`Tokenizer`] API.

use super::{TokenId, Tokenizer};
use crate::errors::SlmError;

/// Buffer-filling vocabulary interface.
///
/// Both methods return the number of elements written, or `-n` when `out`
/// is shorter than the `n` elements required. Nothing is written in that case.
pub trait RawVocab {
    fn tokenize_into(
        &self,
        text: &[u8],
        out: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> i32;

    fn piece_into(&self, token: TokenId, out: &mut [u8]) -> i32;
}

/// Owns a [`RawVocab`] and sizes buffers for it.
#[derive(Debug, Clone)]
pub struct TwoPhase<V> {
    vocab: V,
}

impl<V: RawVocab> TwoPhase<V> {
    pub fn new(vocab: V) -> Self {
        Self { vocab }
    }

    pub fn vocab(&self) -> &V {
        &self.vocab
    }
}

impl<V: RawVocab> Tokenizer for TwoPhase<V> {
    fn encode(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<TokenId>, SlmError> {
        let probe = self
            .vocab
            .tokenize_into(text.as_bytes(), &mut [], add_special, parse_special);
        let need = probe.unsigned_abs() as usize;
        let mut tokens = vec![0 as TokenId; need];
        if need == 0 {
            return Ok(tokens);
        }
        let got = self
            .vocab
            .tokenize_into(text.as_bytes(), &mut tokens, add_special, parse_special);
        if got < 0 {
            return Err(SlmError::Tokenizer(format!(
                "tokenize needed {} slots after probing {}",
                got.unsigned_abs(),
                need
            )));
        }
        tokens.truncate(got as usize);
        Ok(tokens)
    }

    fn decode(&self, token: TokenId) -> Result<Vec<u8>, SlmError> {
        let probe = self.vocab.piece_into(token, &mut []);
        let need = probe.unsigned_abs() as usize;
        let mut piece = vec![0u8; need];
        if need == 0 {
            return Ok(piece);
        }
        let got = self.vocab.piece_into(token, &mut piece);
        if got < 0 {
            return Err(SlmError::Tokenizer(format!(
                "piece for token {} needed {} bytes after probing {}",
                token,
                got.unsigned_abs(),
                need
            )));
        }
        piece.truncate(got as usize);
        Ok(piece)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Reports one more slot on every call, so the fill never fits.
    struct Growing {
        calls: Cell<i32>,
    }

    impl RawVocab for Growing {
        fn tokenize_into(&self, _: &[u8], out: &mut [TokenId], _: bool, _: bool) -> i32 {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if out.len() < n as usize {
                -n
            } else {
                n
            }
        }

        fn piece_into(&self, _: TokenId, _: &mut [u8]) -> i32 {
            0
        }
    }

    #[test]
    fn fill_that_still_overflows_is_an_error() {
        let tok = TwoPhase::new(Growing {
            calls: Cell::new(0),
        });
        assert!(matches!(
            tok.encode("x", true, false),
            Err(SlmError::Tokenizer(_))
        ));
    }

    #[test]
    fn zero_length_piece_skips_fill() {
        let tok = TwoPhase::new(Growing {
            calls: Cell::new(0),
        });
        assert!(tok.decode(7).unwrap().is_empty());
    }
}
