//! Byte-level vocabulary: one token per byte plus BOS/EOS control tokens.

use super::sized::RawVocab;
use super::TokenId;

/// Beginning-of-sequence control token.
pub const BYTE_BOS: TokenId = 256;
/// End-of-sequence control token.
pub const BYTE_EOS: TokenId = 257;
/// 256 bytes + BOS + EOS.
pub const BYTE_VOCAB_SIZE: usize = 258;

const BOS_MARKER: &[u8] = b"<s>";
const EOS_MARKER: &[u8] = b"</s>";

/// Byte vocabulary speaking the buffer-filling [`RawVocab`] contract.
/// Wrap in [`super::TwoPhase`] to use it as a tokenizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteVocab;

impl ByteVocab {
    fn tokens(text: &[u8], add_special: bool, parse_special: bool) -> Vec<TokenId> {
        let mut ids = Vec::with_capacity(text.len() + 1);
        if add_special {
            ids.push(BYTE_BOS);
        }
        let mut i = 0;
        while i < text.len() {
            if parse_special {
                if text[i..].starts_with(BOS_MARKER) {
                    ids.push(BYTE_BOS);
                    i += BOS_MARKER.len();
                    continue;
                }
                if text[i..].starts_with(EOS_MARKER) {
                    ids.push(BYTE_EOS);
                    i += EOS_MARKER.len();
                    continue;
                }
            }
            ids.push(text[i] as TokenId);
            i += 1;
        }
        ids
    }
}

impl RawVocab for ByteVocab {
    fn tokenize_into(
        &self,
        text: &[u8],
        out: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> i32 {
        let ids = Self::tokens(text, add_special, parse_special);
        if out.len() < ids.len() {
            return -(ids.len() as i32);
        }
        out[..ids.len()].copy_from_slice(&ids);
        ids.len() as i32
    }

    fn piece_into(&self, token: TokenId, out: &mut [u8]) -> i32 {
        if token >= 256 {
            // Control tokens render as nothing.
            return 0;
        }
        if out.is_empty() {
            return -1;
        }
        out[0] = token as u8;
        1
    }
}
