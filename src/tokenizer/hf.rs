//! Wrapper around HuggingFace tokenizers.

use super::{TokenId, Tokenizer};
use crate::errors::SlmError;
use std::collections::HashMap;
use std::path::Path;
use tokenizers::decoders::DecoderWrapper;
use tokenizers::pre_tokenizers::PreTokenizerWrapper;

/// Common end-of-sequence spellings, tried in order.
const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<|im_end|>", "<eos>"];

/// SentencePiece word-boundary marker.
const SPIECE_UNDERLINE: char = '\u{2581}';

/// HuggingFace `tokenizer.json` adapter.
pub struct HfTokenizer {
    tokenizer: tokenizers::Tokenizer,
    /// Inverse of the GPT-2 byte-to-char table, for ByteLevel vocabularies.
    byte_level: Option<HashMap<char, u8>>,
}

impl HfTokenizer {
    /// Load tokenizer from a JSON file (e.g. tokenizer.json).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SlmError> {
        let tokenizer = tokenizers::Tokenizer::from_file(path.as_ref())
            .map_err(|e| SlmError::Tokenizer(e.to_string()))?;
        Ok(Self::new(tokenizer))
    }

    pub fn new(tokenizer: tokenizers::Tokenizer) -> Self {
        let byte_level = matches!(tokenizer.get_decoder(), Some(DecoderWrapper::ByteLevel(_)))
            || matches!(
                tokenizer.get_pre_tokenizer(),
                Some(PreTokenizerWrapper::ByteLevel(_))
            );
        Self {
            tokenizer,
            byte_level: byte_level.then(|| {
                byte_chars()
                    .into_iter()
                    .enumerate()
                    .map(|(b, c)| (c, b as u8))
                    .collect()
            }),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// First known EOS spelling present in the vocabulary.
    pub fn eos_token(&self) -> Option<TokenId> {
        EOS_CANDIDATES
            .iter()
            .find_map(|s| self.tokenizer.token_to_id(s))
    }

    /// Like [`HfTokenizer::eos_token`], but a vocabulary without one is an error.
    pub fn require_eos(&self) -> Result<TokenId, SlmError> {
        self.eos_token().ok_or_else(|| {
            SlmError::Tokenizer(format!(
                "no end-of-sequence token (tried {})",
                EOS_CANDIDATES.join(", ")
            ))
        })
    }
}

impl Tokenizer for HfTokenizer {
    /// Added tokens are always matched in `text`; `tokenizers` has no
    /// per-call switch, so `parse_special` is ignored.
    fn encode(
        &self,
        text: &str,
        add_special: bool,
        _parse_special: bool,
    ) -> Result<Vec<TokenId>, SlmError> {
        let encoding = self
            .tokenizer
            .encode(text, add_special)
            .map_err(|e| SlmError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, token: TokenId) -> Result<Vec<u8>, SlmError> {
        let raw = self
            .tokenizer
            .id_to_token(token)
            .ok_or(SlmError::InvalidToken(token))?;
        if let Some(byte) = byte_fallback(&raw) {
            return Ok(vec![byte]);
        }
        if let Some(table) = &self.byte_level {
            if let Some(bytes) = raw.chars().map(|c| table.get(&c).copied()).collect::<Option<Vec<u8>>>() {
                return Ok(bytes);
            }
        }
        if raw.contains(SPIECE_UNDERLINE) {
            return Ok(raw.replace(SPIECE_UNDERLINE, " ").into_bytes());
        }
        let text = self
            .tokenizer
            .decode(&[token], false)
            .map_err(|e| SlmError::Tokenizer(e.to_string()))?;
        Ok(text.into_bytes())
    }
}

/// GPT-2 byte-to-char table: printable Latin-1 bytes map to themselves,
/// the rest to consecutive code points from U+0100.
fn byte_chars() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut next = 256u32;
    for (b, slot) in table.iter_mut().enumerate() {
        let printable = matches!(b, 0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF);
        let code = if printable {
            b as u32
        } else {
            next += 1;
            next - 1
        };
        *slot = char::from_u32(code).unwrap_or('\0');
    }
    table
}

/// `<0xNN>` byte-fallback pieces.
fn byte_fallback(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}
