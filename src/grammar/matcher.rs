//! Incremental grammar matcher.
//!
//! The matcher tracks every way the text consumed so far can continue under
//! the grammar, as a set of parse stacks. Each stack is a list of positions
//! (rule, alternative, element); the top of a stack always points at a
//! character class. A stack that has been fully unwound means the root rule
//! is complete.
//!
//! Token pieces arrive as raw bytes and may split a UTF-8 sequence, so bytes
//! of an unfinished code point are held back until the rest arrives.

use super::{CharClass, Element, Grammar, RuleId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Pos {
    rule: RuleId,
    alt: u32,
    elem: u32,
}

type Stack = Vec<Pos>;

#[derive(Debug, Clone)]
pub struct GrammarMatcher {
    grammar: Arc<Grammar>,
    stacks: Vec<Stack>,
    /// Leading bytes of a code point not yet complete.
    pending: Vec<u8>,
}

impl GrammarMatcher {
    /// Matcher positioned at the start of the root rule.
    pub fn new(grammar: Arc<Grammar>) -> Self {
        let root = grammar.root();
        let mut stacks = Vec::new();
        for alt in 0..grammar.rule(root).alternatives.len() {
            let start = vec![Pos {
                rule: root,
                alt: alt as u32,
                elem: 0,
            }];
            expand(&grammar, start, &mut stacks);
        }
        normalize(&mut stacks);
        Self {
            grammar,
            stacks,
            pending: Vec::new(),
        }
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    /// Whether `piece` could be appended to the text consumed so far.
    /// Empty pieces are never accepted.
    pub fn accepts(&self, piece: &[u8]) -> bool {
        !piece.is_empty() && self.advance(piece).is_some()
    }

    /// Consume `piece`. Returns false and leaves the matcher unchanged if the
    /// piece is rejected.
    pub fn accept(&mut self, piece: &[u8]) -> bool {
        if piece.is_empty() {
            return false;
        }
        match self.advance(piece) {
            Some((stacks, pending)) => {
                self.stacks = stacks;
                self.pending = pending;
                true
            }
            None => false,
        }
    }

    /// The consumed text is a complete sentence of the grammar.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.stacks.iter().any(|s| s.is_empty())
    }

    /// No continuation remains.
    pub fn is_dead(&self) -> bool {
        self.stacks.is_empty()
    }

    fn advance(&self, piece: &[u8]) -> Option<(Vec<Stack>, Vec<u8>)> {
        let mut bytes = Vec::with_capacity(self.pending.len() + piece.len());
        bytes.extend_from_slice(&self.pending);
        bytes.extend_from_slice(piece);

        let (text, rest) = match std::str::from_utf8(&bytes) {
            Ok(s) => (s, &[][..]),
            Err(e) => {
                if e.error_len().is_some() {
                    return None;
                }
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                // `valid_up_to` guarantees this prefix decodes.
                (std::str::from_utf8(valid).ok()?, rest)
            }
        };

        let mut stacks = self.stacks.clone();
        for c in text.chars() {
            stacks = advance_char(&self.grammar, &stacks, c as u32);
            if stacks.is_empty() {
                return None;
            }
        }
        if let Some((lo, hi)) = partial_range(rest) {
            // Some completion of the partial code point must still match.
            let reachable = stacks.iter().any(|s| match top_class(&self.grammar, s) {
                Some(class) => class.intersects(lo, hi),
                None => false,
            });
            if !reachable {
                return None;
            }
        }
        Some((stacks, rest.to_vec()))
    }
}

/// Range of code points an unfinished UTF-8 sequence can still complete to.
/// `bytes` is a valid prefix, as reported by `Utf8Error::valid_up_to`.
fn partial_range(bytes: &[u8]) -> Option<(u32, u32)> {
    let (&lead, tail) = bytes.split_first()?;
    let (len, bits, min) = match lead {
        0xC2..=0xDF => (2, lead & 0x1F, 0x80),
        0xE0..=0xEF => (3, lead & 0x0F, 0x800),
        0xF0..=0xF4 => (4, lead & 0x07, 0x1_0000),
        _ => return None,
    };
    let value = tail
        .iter()
        .fold(u32::from(bits), |acc, &b| (acc << 6) | u32::from(b & 0x3F));
    let remaining = 6 * (len - bytes.len()) as u32;
    let lo = (value << remaining).max(min);
    let hi = ((value << remaining) | ((1 << remaining) - 1)).min(char::MAX as u32);
    Some((lo, hi))
}

fn top_class<'g>(grammar: &'g Grammar, stack: &Stack) -> Option<&'g CharClass> {
    let top = stack.last()?;
    match grammar.rule(top.rule).alternatives[top.alt as usize].get(top.elem as usize) {
        Some(Element::Char(class)) => Some(class),
        _ => None,
    }
}

/// Unwind finished positions and descend into rule references until the top
/// of `stack` is a character class, pushing every resulting stack to `out`.
fn expand(grammar: &Grammar, mut stack: Stack, out: &mut Vec<Stack>) {
    loop {
        let Some(&top) = stack.last() else {
            out.push(stack);
            return;
        };
        let alt = &grammar.rule(top.rule).alternatives[top.alt as usize];
        match alt.get(top.elem as usize) {
            None => {
                stack.pop();
            }
            Some(Element::Char(_)) => {
                out.push(stack);
                return;
            }
            Some(Element::Rule(sub)) => {
                // A reference in tail position replaces its parent, so
                // right recursion does not grow the stack.
                if top.elem as usize + 1 == alt.len() {
                    stack.pop();
                } else if let Some(last) = stack.last_mut() {
                    last.elem += 1;
                }
                for i in 0..grammar.rule(*sub).alternatives.len() {
                    let mut next = stack.clone();
                    next.push(Pos {
                        rule: *sub,
                        alt: i as u32,
                        elem: 0,
                    });
                    expand(grammar, next, out);
                }
                return;
            }
        }
    }
}

fn advance_char(grammar: &Grammar, stacks: &[Stack], c: u32) -> Vec<Stack> {
    let mut next = Vec::new();
    for stack in stacks {
        let Some(&top) = stack.last() else {
            continue;
        };
        let alt = &grammar.rule(top.rule).alternatives[top.alt as usize];
        if let Some(Element::Char(class)) = alt.get(top.elem as usize) {
            if class.matches(c) {
                let mut moved = stack.clone();
                if let Some(last) = moved.last_mut() {
                    last.elem += 1;
                }
                expand(grammar, moved, &mut next);
            }
        }
    }
    normalize(&mut next);
    next
}

fn normalize(stacks: &mut Vec<Stack>) {
    stacks.sort_unstable();
    stacks.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(src: &str) -> GrammarMatcher {
        GrammarMatcher::new(Arc::new(Grammar::parse(src).unwrap()))
    }

    #[test]
    fn literal_sequence() {
        let mut m = matcher(r#"root ::= "ab""#);
        assert!(m.accepts(b"a"));
        assert!(m.accepts(b"ab"));
        assert!(!m.accepts(b"b"));
        assert!(!m.accepts(b"c"));
        assert!(m.accept(b"a"));
        assert!(!m.is_complete());
        assert!(!m.accept(b"a"));
        assert!(m.accept(b"b"));
        assert!(m.is_complete());
        assert!(!m.accepts(b"b"));
    }

    #[test]
    fn empty_piece_is_rejected() {
        let m = matcher(r#"root ::= "a" | """#);
        assert!(m.is_complete());
        assert!(!m.accepts(b""));
    }

    #[test]
    fn repetition_stays_open() {
        let mut m = matcher("root ::= [0-9]+");
        assert!(!m.is_complete());
        assert!(m.accept(b"12"));
        assert!(m.is_complete());
        assert!(m.accept(b"3"));
        assert!(m.is_complete());
        assert!(!m.accepts(b"x"));
    }

    #[test]
    fn nested_rules_and_alternatives() {
        let src = r#"
root ::= "{" pair ("," pair)* "}"
pair ::= [a-z]+ ":" digit
digit ::= [0-9]
"#;
        let mut m = matcher(src);
        assert!(m.accept(b"{a:1,bc:"));
        assert!(!m.accepts(b"}"));
        assert!(m.accept(b"2}"));
        assert!(m.is_complete());
        assert!(!m.is_dead());
    }

    #[test]
    fn utf8_split_across_pieces() {
        let mut m = matcher(r#"root ::= "é!""#);
        let bytes = "é".as_bytes();
        assert!(m.accept(&bytes[..1]));
        assert!(!m.is_complete());
        assert!(m.accept(&bytes[1..]));
        assert!(m.accept(b"!"));
        assert!(m.is_complete());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let m = matcher("root ::= .*");
        assert!(!m.accepts(&[0xFF]));
        assert!(m.accepts("中".as_bytes()));
    }

    #[test]
    fn right_recursion_keeps_stacks_shallow() {
        let mut m = matcher("root ::= [a-z]*");
        for _ in 0..200 {
            assert!(m.accept(b"x"));
        }
        assert!(m.is_complete());
        assert!(m.stacks.iter().all(|s| s.len() <= 2));
    }

    #[test]
    fn partial_code_point_must_be_completable() {
        assert!(!matcher(r#"root ::= "ab""#).accepts(&[0xC3]));
        assert!(!matcher("root ::= [0-9]+").accepts(&[0xE4]));
        // U+00E9 is reachable from 0xC3, U+4E2D is not.
        assert!(matcher(r#"root ::= "é""#).accepts(&[0xC3]));
        assert!(!matcher(r#"root ::= "中""#).accepts(&[0xC3]));
        assert!(matcher(r#"root ::= "中""#).accepts(&[0xE4, 0xB8]));
        assert!(!matcher(r#"root ::= "中""#).accepts(&[0xE4, 0xB9]));
        assert!(matcher("root ::= [^a]").accepts(&[0xF0]));
        assert!(!matcher("root ::= [^\\u0000-\\U0010FFFF]").accepts(&[0xF0]));
    }

    #[test]
    fn partial_range_bounds() {
        assert_eq!(partial_range(&[0xC3]), Some((0xC0, 0xFF)));
        assert_eq!(partial_range(&[0xE4, 0xB8]), Some((0x4E00, 0x4E3F)));
        assert_eq!(partial_range(&[0xF4]), Some((0x10_0000, 0x10_FFFF)));
        assert_eq!(partial_range(&[]), None);
    }

    #[test]
    fn rejected_piece_leaves_state_unchanged() {
        let mut m = matcher(r#"root ::= "ab" | "ac""#);
        assert!(m.accept(b"a"));
        assert!(!m.accept(b"bd"));
        assert!(m.accept(b"c"));
        assert!(m.is_complete());
    }
}
