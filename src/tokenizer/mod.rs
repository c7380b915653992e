//! Tokenizer integration for encode/decode.
//!
//! The generation loop only needs two operations: text → ids for the prompt,
//! and id → byte piece for each sampled token. Pieces are raw bytes because a
//! single piece may carry half of a multi-byte UTF-8 character.

pub mod byte;
pub mod hf;
pub mod sized;

pub use byte::{ByteVocab, BYTE_BOS, BYTE_EOS, BYTE_VOCAB_SIZE};
pub use hf::HfTokenizer;
pub use sized::{RawVocab, TwoPhase};

use crate::errors::SlmError;

/// Opaque vocabulary index.
pub type TokenId = u32;

/// Text ↔ token mapping used by the generation controller.
pub trait Tokenizer {
    /// Encode text to token ids.
    fn encode(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<TokenId>, SlmError>;

    /// Decode a single token to its byte piece. The piece may be empty or an
    /// incomplete UTF-8 sequence.
    fn decode(&self, token: TokenId) -> Result<Vec<u8>, SlmError>;
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<TokenId>, SlmError> {
        (**self).encode(text, add_special, parse_special)
    }

    fn decode(&self, token: TokenId) -> Result<Vec<u8>, SlmError> {
        (**self).decode(token)
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for Box<T> {
    fn encode(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<TokenId>, SlmError> {
        (**self).encode(text, add_special, parse_special)
    }

    fn decode(&self, token: TokenId) -> Result<Vec<u8>, SlmError> {
        (**self).decode(token)
    }
}

/// Decode every id in `0..vocab_size` once. Used to build the grammar stage's
/// view of the vocabulary; failures decode to an empty piece.
pub fn vocab_pieces<T: Tokenizer + ?Sized>(tokenizer: &T, vocab_size: usize) -> Vec<Vec<u8>> {
    (0..vocab_size as TokenId)
        .map(|id| tokenizer.decode(id).unwrap_or_default())
        .collect()
}
