//! GBNF parser: grammar text → [`Grammar`].
//!
//! Supports:
//! - `name ::= alternatives`, rules may span lines
//! - String literals and character classes with escapes
//!   (`\n \r \t \\ \" \xHH \uHHHH \UHHHHHHHH`)
//! - `.` (any character), rule references, parenthesized groups
//! - Quantifiers: `*`, `+`, `?`, `{n}`, `{n,}`, `{n,m}`
//! - Comments: `#` to end of line

use super::{CharClass, Element, Grammar, Rule, RuleId, ROOT_RULE};
use crate::errors::SlmError;
use std::collections::HashMap;

/// Parse, lower and validate grammar text.
pub fn parse(src: &str) -> Result<Grammar, SlmError> {
    let mut parser = Parser {
        chars: src.chars().collect(),
        pos: 0,
        builder: Builder::default(),
    };
    parser.parse_grammar()?;
    parser.builder.finish()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    builder: Builder,
}

impl Parser {
    fn error(&self, msg: impl std::fmt::Display) -> SlmError {
        let consumed = &self.chars[..self.pos.min(self.chars.len())];
        let line = consumed.iter().filter(|&&c| c == '\n').count() + 1;
        let col = consumed.iter().rev().take_while(|&&c| c != '\n').count() + 1;
        SlmError::GrammarCompilation(format!("{} at line {}, column {}", msg, line, col))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, want: char) -> Result<(), SlmError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(format!("expected '{}', found end of input", want))),
        }
    }

    /// Skip spaces, tabs and comments; newlines too when `newlines` is set.
    fn skip_space(&mut self, newlines: bool) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\n' if newlines => self.pos += 1,
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn is_name_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '-' || c == '_'
    }

    fn parse_name(&mut self) -> Result<String, SlmError> {
        let start = self.pos;
        while self.peek().is_some_and(Self::is_name_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected rule name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// `name ::=` ahead of the cursor, without consuming it.
    fn at_rule_start(&self) -> bool {
        let mut i = self.pos;
        let name_start = i;
        while self.chars.get(i).copied().is_some_and(Self::is_name_char) {
            i += 1;
        }
        if i == name_start {
            return false;
        }
        while matches!(self.chars.get(i), Some(' ' | '\t')) {
            i += 1;
        }
        self.chars.get(i..i + 3) == Some(&[':', ':', '='][..])
    }

    fn parse_grammar(&mut self) -> Result<(), SlmError> {
        self.skip_space(true);
        while self.peek().is_some() {
            self.parse_rule()?;
            self.skip_space(true);
        }
        Ok(())
    }

    fn parse_rule(&mut self) -> Result<(), SlmError> {
        let name = self.parse_name()?;
        self.skip_space(false);
        for want in [':', ':', '='] {
            self.expect(want)?;
        }
        self.skip_space(true);
        let id = self.builder.intern(&name);
        let alternatives = self.parse_alternatives(&name, false)?;
        if !self.builder.define(id, alternatives) {
            return Err(self.error(format!("rule '{}' defined twice", name)));
        }
        Ok(())
    }

    fn parse_alternatives(
        &mut self,
        rule_name: &str,
        nested: bool,
    ) -> Result<Vec<Vec<Element>>, SlmError> {
        let mut alternatives = vec![self.parse_sequence(rule_name, nested)?];
        loop {
            let save = self.pos;
            self.skip_space(true);
            if self.peek() == Some('|') {
                self.pos += 1;
                self.skip_space(true);
                alternatives.push(self.parse_sequence(rule_name, nested)?);
            } else {
                self.pos = save;
                return Ok(alternatives);
            }
        }
    }

    fn parse_sequence(&mut self, rule_name: &str, nested: bool) -> Result<Vec<Element>, SlmError> {
        let mut seq: Vec<Element> = Vec::new();
        // Start of the most recent item, for quantifiers.
        let mut last_item: Option<usize> = None;
        loop {
            self.skip_space(nested);
            if !nested && self.peek() == Some('\n') {
                // A line break ends the rule unless the next line continues it.
                let save = self.pos;
                self.skip_space(true);
                if self.peek().is_none() || self.peek() == Some('|') || self.at_rule_start() {
                    self.pos = save;
                    return Ok(seq);
                }
            }
            let Some(c) = self.peek() else {
                return Ok(seq);
            };
            match c {
                '|' | ')' => return Ok(seq),
                '"' => {
                    self.pos += 1;
                    last_item = Some(seq.len());
                    while self.peek() != Some('"') {
                        if self.peek().is_none() {
                            return Err(self.error("unterminated string literal"));
                        }
                        let cp = self.parse_char()?;
                        seq.push(Element::Char(CharClass {
                            negated: false,
                            ranges: vec![(cp, cp)],
                        }));
                    }
                    self.pos += 1;
                }
                '[' => {
                    self.pos += 1;
                    last_item = Some(seq.len());
                    let class = self.parse_class()?;
                    seq.push(Element::Char(class));
                }
                '.' => {
                    self.pos += 1;
                    last_item = Some(seq.len());
                    seq.push(Element::Char(CharClass::any()));
                }
                '(' => {
                    self.pos += 1;
                    self.skip_space(true);
                    let alternatives = self.parse_alternatives(rule_name, true)?;
                    self.skip_space(true);
                    self.expect(')')?;
                    let sub = self.builder.fresh(rule_name);
                    self.builder.define(sub, alternatives);
                    last_item = Some(seq.len());
                    seq.push(Element::Rule(sub));
                }
                '*' | '+' | '?' | '{' => {
                    let start = last_item
                        .take()
                        .ok_or_else(|| self.error(format!("quantifier '{}' without item", c)))?;
                    let (min, max) = self.parse_quantifier()?;
                    let item = seq.split_off(start);
                    self.repeat(rule_name, &mut seq, item, min, max);
                }
                c if Self::is_name_char(c) => {
                    let name = self.parse_name()?;
                    let id = self.builder.intern(&name);
                    last_item = Some(seq.len());
                    seq.push(Element::Rule(id));
                }
                other => return Err(self.error(format!("unexpected character '{}'", other))),
            }
        }
    }

    fn parse_quantifier(&mut self) -> Result<(u32, Option<u32>), SlmError> {
        match self.bump() {
            Some('*') => Ok((0, None)),
            Some('+') => Ok((1, None)),
            Some('?') => Ok((0, Some(1))),
            Some('{') => {
                self.skip_space(false);
                let min = self.parse_int()?;
                self.skip_space(false);
                let max = if self.peek() == Some(',') {
                    self.pos += 1;
                    self.skip_space(false);
                    if self.peek() == Some('}') {
                        None
                    } else {
                        Some(self.parse_int()?)
                    }
                } else {
                    Some(min)
                };
                self.skip_space(false);
                self.expect('}')?;
                if max.is_some_and(|m| m < min) {
                    return Err(self.error("repetition maximum below minimum"));
                }
                Ok((min, max))
            }
            _ => Err(self.error("expected quantifier")),
        }
    }

    fn parse_int(&mut self) -> Result<u32, SlmError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits
            .parse()
            .map_err(|_| self.error("expected repetition count"))
    }

    /// Lower `item{min,max}` into `seq`.
    fn repeat(
        &mut self,
        rule_name: &str,
        seq: &mut Vec<Element>,
        item: Vec<Element>,
        min: u32,
        max: Option<u32>,
    ) {
        if item.is_empty() {
            return;
        }
        for _ in 0..min {
            seq.extend(item.iter().cloned());
        }
        match max {
            None => {
                // star ::= item star | ""
                let star = self.builder.fresh(rule_name);
                let mut looped = item;
                looped.push(Element::Rule(star));
                self.builder.define(star, vec![looped, Vec::new()]);
                seq.push(Element::Rule(star));
            }
            Some(max) => {
                // Nested optionals: opt_k ::= item opt_{k-1} | ""
                let mut tail: Option<RuleId> = None;
                for _ in min..max {
                    let opt = self.builder.fresh(rule_name);
                    let mut alt = item.clone();
                    if let Some(t) = tail {
                        alt.push(Element::Rule(t));
                    }
                    self.builder.define(opt, vec![alt, Vec::new()]);
                    tail = Some(opt);
                }
                if let Some(t) = tail {
                    seq.push(Element::Rule(t));
                }
            }
        }
    }

    fn parse_class(&mut self) -> Result<CharClass, SlmError> {
        let negated = self.peek() == Some('^');
        if negated {
            self.pos += 1;
        }
        let mut ranges = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated character class")),
                Some(']') => {
                    self.pos += 1;
                    return Ok(CharClass { negated, ranges });
                }
                _ => {
                    let lo = self.parse_char()?;
                    let hi = if self.peek() == Some('-') && self.peek_at(1) != Some(']') {
                        self.pos += 1;
                        self.parse_char()?
                    } else {
                        lo
                    };
                    if hi < lo {
                        return Err(self.error("character range is reversed"));
                    }
                    ranges.push((lo, hi));
                }
            }
        }
    }

    /// One literal code point, resolving escapes.
    fn parse_char(&mut self) -> Result<u32, SlmError> {
        let c = self
            .bump()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        if c != '\\' {
            return Ok(c as u32);
        }
        let esc = self
            .bump()
            .ok_or_else(|| self.error("unterminated escape"))?;
        match esc {
            'n' => Ok('\n' as u32),
            'r' => Ok('\r' as u32),
            't' => Ok('\t' as u32),
            '0' => Ok(0),
            '\\' | '"' | '\'' | '[' | ']' | '-' | '^' | '/' => Ok(esc as u32),
            'x' => self.parse_hex(2),
            'u' if self.peek() == Some('{') => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                    self.pos += 1;
                }
                let digits: String = self.chars[start..self.pos].iter().collect();
                self.expect('}')?;
                u32::from_str_radix(&digits, 16).map_err(|_| self.error("invalid \\u{...} escape"))
            }
            'u' => self.parse_hex(4),
            'U' => self.parse_hex(8),
            other => Err(self.error(format!("unknown escape '\\{}'", other))),
        }
    }

    fn parse_hex(&mut self, len: usize) -> Result<u32, SlmError> {
        let mut value = 0u32;
        for _ in 0..len {
            let d = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error(format!("expected {} hex digits", len)))?;
            value = value * 16 + d;
        }
        Ok(value)
    }
}

/// Accumulates rules while parsing. Referenced-but-undefined rules stay `None`
/// until [`Builder::finish`] reports them.
#[derive(Default)]
struct Builder {
    names: Vec<String>,
    bodies: Vec<Option<Vec<Vec<Element>>>>,
    index: HashMap<String, RuleId>,
    synthesized: usize,
}

impl Builder {
    fn intern(&mut self, name: &str) -> RuleId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = RuleId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.bodies.push(None);
        self.index.insert(name.to_string(), id);
        id
    }

    /// New rule named after `base` that cannot collide with user rules.
    fn fresh(&mut self, base: &str) -> RuleId {
        loop {
            self.synthesized += 1;
            let name = format!("{}_{}", base, self.synthesized);
            if !self.index.contains_key(&name) {
                return self.intern(&name);
            }
        }
    }

    /// Returns false if the rule already had a body.
    fn define(&mut self, id: RuleId, alternatives: Vec<Vec<Element>>) -> bool {
        let slot = &mut self.bodies[id.0 as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(alternatives);
        true
    }

    fn finish(self) -> Result<Grammar, SlmError> {
        let root = *self.index.get(ROOT_RULE).ok_or_else(|| {
            SlmError::GrammarCompilation(format!("grammar has no '{}' rule", ROOT_RULE))
        })?;
        let mut rules = Vec::with_capacity(self.names.len());
        for (name, body) in self.names.into_iter().zip(self.bodies) {
            let alternatives = body.ok_or_else(|| {
                SlmError::GrammarCompilation(format!("undefined rule '{}'", name))
            })?;
            rules.push(Rule { name, alternatives });
        }
        check_left_recursion(&rules)?;
        Ok(Grammar::from_rules(rules, root))
    }
}

/// Reject rules that can reach themselves without consuming input; the
/// matcher's stack expansion would not terminate on them.
fn check_left_recursion(rules: &[Rule]) -> Result<(), SlmError> {
    let nullable = nullable_rules(rules);
    let is_nullable = |el: &Element| match el {
        Element::Char(_) => false,
        Element::Rule(r) => nullable[r.0 as usize],
    };

    // Edge a → b when b can appear first in some expansion of a.
    let edges: Vec<Vec<usize>> = rules
        .iter()
        .map(|rule| {
            let mut out = Vec::new();
            for alt in &rule.alternatives {
                for el in alt {
                    if let Element::Rule(r) = el {
                        out.push(r.0 as usize);
                    }
                    if !is_nullable(el) {
                        break;
                    }
                }
            }
            out
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }
    let mut marks = vec![Mark::New; rules.len()];

    fn visit(
        node: usize,
        edges: &[Vec<usize>],
        marks: &mut [Mark],
        rules: &[Rule],
    ) -> Result<(), SlmError> {
        marks[node] = Mark::Active;
        for &next in &edges[node] {
            match marks[next] {
                Mark::Active => {
                    return Err(SlmError::GrammarCompilation(format!(
                        "left recursion through rule '{}'",
                        rules[next].name
                    )))
                }
                Mark::New => visit(next, edges, marks, rules)?,
                Mark::Done => {}
            }
        }
        marks[node] = Mark::Done;
        Ok(())
    }

    for node in 0..rules.len() {
        if marks[node] == Mark::New {
            visit(node, &edges, &mut marks, rules)?;
        }
    }
    Ok(())
}

fn nullable_rules(rules: &[Rule]) -> Vec<bool> {
    let mut nullable = vec![false; rules.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for (i, rule) in rules.iter().enumerate() {
            if nullable[i] {
                continue;
            }
            let any_empty = rule.alternatives.iter().any(|alt| {
                alt.iter().all(|el| match el {
                    Element::Char(_) => false,
                    Element::Rule(r) => nullable[r.0 as usize],
                })
            });
            if any_empty {
                nullable[i] = true;
                changed = true;
            }
        }
    }
    nullable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_err(src: &str) -> String {
        match parse(src) {
            Err(SlmError::GrammarCompilation(msg)) => msg,
            other => panic!("expected compile error, got {:?}", other.map(|g| g.to_string())),
        }
    }

    #[test]
    fn literal_becomes_char_sequence() {
        let g = parse(r#"root ::= "ab""#).unwrap();
        let root = g.rule(g.root());
        assert_eq!(root.alternatives.len(), 1);
        assert_eq!(root.alternatives[0].len(), 2);
    }

    #[test]
    fn alternatives_on_continuation_lines() {
        let g = parse("root ::= \"a\"\n    | \"b\"\n    | \"c\"\n").unwrap();
        assert_eq!(g.rule(g.root()).alternatives.len(), 3);
    }

    #[test]
    fn multi_line_rules_and_comments() {
        let src = r#"
# a key/value object
root ::= "{" ws
    pair "}"   # closing
pair ::= [a-z]+ ":" [0-9]+
ws ::= [ \t\n]*
"#;
        let g = parse(src).unwrap();
        assert!(g.rule_id("pair").is_some());
        assert!(g.rule_id("ws").is_some());
        assert_eq!(g.rule(g.root()).alternatives[0].len(), 4);
    }

    #[test]
    fn groups_and_quantifiers_are_lowered() {
        let g = parse(r#"root ::= ("x" | "y")+ "z"? [0-9]{2,3}"#).unwrap();
        // group, star for '+', optional for '?', one optional for {2,3}
        assert!(g.rules().len() >= 4);
        assert!(g.rules().iter().all(|r| r.name.starts_with("root")));
    }

    #[test]
    fn char_class_escapes_and_ranges() {
        let g = parse(r#"root ::= [^"\\\n] [a-] [\x41-Z]"#).unwrap();
        let alt = &g.rule(g.root()).alternatives[0];
        let Element::Char(first) = &alt[0] else { panic!() };
        assert!(first.negated);
        assert!(!first.matches('"' as u32));
        assert!(first.matches('q' as u32));
        let Element::Char(second) = &alt[1] else { panic!() };
        assert!(second.matches('-' as u32));
        let Element::Char(third) = &alt[2] else { panic!() };
        assert!(third.matches('M' as u32));
        assert!(!third.matches('m' as u32));
    }

    #[test]
    fn missing_root_is_rejected() {
        assert!(compile_err(r#"start ::= "a""#).contains("root"));
    }

    #[test]
    fn undefined_reference_is_rejected() {
        assert!(compile_err("root ::= value").contains("undefined rule 'value'"));
    }

    #[test]
    fn left_recursion_is_rejected() {
        assert!(compile_err("root ::= root \"a\" | \"a\"").contains("left recursion"));
        assert!(compile_err("root ::= x \"a\"\nx ::= \"\" | root").contains("left recursion"));
    }

    #[test]
    fn syntax_errors_carry_location() {
        let msg = compile_err("root ::= \"a\"\nbad ::= \"unterminated");
        assert!(msg.contains("line 2"), "{}", msg);
    }

    #[test]
    fn duplicate_rule_is_rejected() {
        assert!(compile_err("root ::= \"a\"\nroot ::= \"b\"").contains("defined twice"));
    }

    #[test]
    fn quantifier_needs_an_item() {
        assert!(compile_err("root ::= *").contains("quantifier"));
    }
}
