//! GBNF-style grammars for constrained decoding.
//!
//! Grammar text is compiled into a flat list of rules, each a set of
//! alternatives over two element kinds: a character class or a reference to
//! another rule. Groups and quantifiers are lowered into synthesized rules at
//! parse time, so the matcher only ever sees those two element kinds.
//!
//! ```text
//! root   ::= "{" ws pair ("," ws pair)* "}"
//! pair   ::= key ":" ws [0-9]+
//! key    ::= "\"" [a-z_]+ "\""
//! ws     ::= [ \t\n]*
//! ```

pub mod matcher;
pub mod parser;

pub use matcher::GrammarMatcher;

use crate::errors::SlmError;
use std::fmt;

/// Name of the start rule.
pub const ROOT_RULE: &str = "root";

/// Index into [`Grammar::rules`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

/// Set of Unicode code points, as inclusive ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharClass {
    pub negated: bool,
    pub ranges: Vec<(u32, u32)>,
}

impl CharClass {
    pub fn single(c: char) -> Self {
        Self {
            negated: false,
            ranges: vec![(c as u32, c as u32)],
        }
    }

    /// Matches every code point (`.`).
    pub fn any() -> Self {
        Self {
            negated: true,
            ranges: Vec::new(),
        }
    }

    pub fn matches(&self, c: u32) -> bool {
        let hit = self.ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
        hit != self.negated
    }

    /// Whether any code point in `lo..=hi` matches.
    pub fn intersects(&self, lo: u32, hi: u32) -> bool {
        if !self.negated {
            return self.ranges.iter().any(|&(a, b)| a <= hi && lo <= b);
        }
        // Look for a gap the ranges leave inside `lo..=hi`.
        let mut ranges = self.ranges.clone();
        ranges.sort_unstable();
        let mut next = lo;
        for (a, b) in ranges {
            if a > next {
                break;
            }
            if b >= next {
                match b.checked_add(1) {
                    Some(n) => next = n,
                    None => return false,
                }
            }
            if next > hi {
                return false;
            }
        }
        next <= hi
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Char(CharClass),
    Rule(RuleId),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    /// Each alternative is a sequence; an empty sequence matches the empty string.
    pub alternatives: Vec<Vec<Element>>,
}

/// A compiled grammar with a `root` start rule.
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: Vec<Rule>,
    root: RuleId,
}

impl Grammar {
    /// Parse and validate grammar text.
    pub fn parse(src: &str) -> Result<Self, SlmError> {
        parser::parse(src)
    }

    pub(crate) fn from_rules(rules: Vec<Rule>, root: RuleId) -> Self {
        Self { rules, root }
    }

    pub fn root(&self) -> RuleId {
        self.root
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0 as usize]
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule_id(&self, name: &str) -> Option<RuleId> {
        self.rules
            .iter()
            .position(|r| r.name == name)
            .map(|i| RuleId(i as u32))
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            write!(f, "{} ::=", rule.name)?;
            for (i, alt) in rule.alternatives.iter().enumerate() {
                if i > 0 {
                    write!(f, " |")?;
                }
                if alt.is_empty() {
                    write!(f, " \"\"")?;
                }
                for el in alt {
                    match el {
                        Element::Rule(id) => write!(f, " {}", self.rule(*id).name)?,
                        Element::Char(class) => write!(f, " {}", DisplayClass(class))?,
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

struct DisplayClass<'a>(&'a CharClass);

impl fmt::Display for DisplayClass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = self.0;
        if class.negated && class.ranges.is_empty() {
            return write!(f, ".");
        }
        if let [(lo, hi)] = class.ranges.as_slice() {
            if lo == hi && !class.negated {
                write!(f, "\"")?;
                write_escaped(f, *lo, false)?;
                return write!(f, "\"");
            }
        }
        write!(f, "[")?;
        if class.negated {
            write!(f, "^")?;
        }
        for &(lo, hi) in &class.ranges {
            write_escaped(f, lo, true)?;
            if hi != lo {
                write!(f, "-")?;
                write_escaped(f, hi, true)?;
            }
        }
        write!(f, "]")
    }
}

/// Write one code point in grammar syntax.
fn write_escaped(f: &mut fmt::Formatter<'_>, cp: u32, in_class: bool) -> fmt::Result {
    match char::from_u32(cp) {
        Some('\\') => write!(f, "\\\\"),
        Some('"') => write!(f, "\\\""),
        Some('\n') => write!(f, "\\n"),
        Some('\r') => write!(f, "\\r"),
        Some('\t') => write!(f, "\\t"),
        Some(c @ (']' | '[' | '-' | '^')) if in_class => write!(f, "\\{}", c),
        Some(c) if !c.is_control() => write!(f, "{}", c),
        _ if cp <= 0xFFFF => write!(f, "\\u{:04X}", cp),
        _ => write!(f, "\\U{:08X}", cp),
    }
}
