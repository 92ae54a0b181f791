//! The parsing expression tree.
//!
//! Every grammar, whether parsed from text or built programmatically with
//! the [`crate::op`] constructors, is represented as a tree of [`Expr`]
//! nodes drawn from a closed operator set: terminals (`.`, literals,
//! character classes, regexes), nonterminal references, quantifiers,
//! lookahead, value-shaping wrappers, and sequence/choice composition.
//!
//! Expressions can be formatted back to grammar syntax with
//! [`Expr::to_grammar_string`]; regexes and rules have no surface syntax and
//! refuse to format.

use std::fmt::{self, Write as _};
use std::sync::{Arc, OnceLock};

use crate::actions::Action;
use crate::errors::{GrammarError, ParseError};
use crate::escape::escape;

// ===========================================================================
// Value kinds
// ===========================================================================

/// How many positional values an expression contributes to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Contributes no positional value.
    Empty,
    /// Contributes exactly one positional value.
    Atomic,
    /// Contributes a variable number of positional values.
    Iterable,
}

// ===========================================================================
// Character classes
// ===========================================================================

/// The ranges of a character class.
///
/// A single character is stored as `(c, None)`; a span as `(lo, Some(hi))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRanges {
    pub ranges: Vec<(char, Option<char>)>,
    pub negate: bool,
}

impl ClassRanges {
    #[must_use]
    pub fn new(ranges: Vec<(char, Option<char>)>, negate: bool) -> Self {
        Self { ranges, negate }
    }

    /// Parses a class body such as `"a-zA-Z_"`. A leading `^` negates.
    #[must_use]
    pub fn from_spec(spec: &str) -> Self {
        let chars: Vec<char> = spec.chars().collect();
        let (negate, mut i) = if chars.first() == Some(&'^') && chars.len() > 1 {
            (true, 1)
        } else {
            (false, 0)
        };
        let mut ranges = Vec::new();
        while i < chars.len() {
            if chars.get(i + 1) == Some(&'-') && i + 2 < chars.len() {
                ranges.push((chars[i], Some(chars[i + 2])));
                i += 3;
            } else {
                ranges.push((chars[i], None));
                i += 1;
            }
        }
        Self { ranges, negate }
    }

    /// True if `c` is accepted by this class.
    #[must_use]
    pub fn accepts(&self, c: char) -> bool {
        let hit = self
            .ranges
            .iter()
            .any(|&(lo, hi)| match hi {
                Some(hi) => lo <= c && c <= hi,
                None => lo == c,
            });
        hit != self.negate
    }

    /// Returns the character if the class accepts exactly one, un-negated.
    #[must_use]
    pub fn single_char(&self) -> Option<char> {
        match (self.negate, self.ranges.as_slice()) {
            (false, [(c, None)]) => Some(*c),
            _ => None,
        }
    }

    /// Renders the class body in regex syntax (without the brackets).
    #[must_use]
    pub fn regex_body(&self) -> String {
        let mut out = String::new();
        for &(lo, hi) in &self.ranges {
            push_regex_class_char(&mut out, lo);
            if let Some(hi) = hi {
                out.push('-');
                push_regex_class_char(&mut out, hi);
            }
        }
        out
    }

    fn grammar_body(&self) -> String {
        let mut out = String::new();
        if self.negate {
            out.push('^');
        }
        for &(lo, hi) in &self.ranges {
            out.push_str(&escape(&lo.to_string()));
            if let Some(hi) = hi {
                out.push('-');
                out.push_str(&escape(&hi.to_string()));
            }
        }
        out
    }
}

fn push_regex_class_char(out: &mut String, c: char) {
    match c {
        '\\' | ']' | '[' | '^' | '-' | '&' | '~' => {
            out.push('\\');
            out.push(c);
        }
        '\t' => out.push_str("\\t"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\x0B' => out.push_str("\\x0B"),
        '\x0C' => out.push_str("\\x0C"),
        _ => out.push(c),
    }
}

// ===========================================================================
// Regex terminals
// ===========================================================================

/// Flags for a regex terminal, applied as inline groups when compiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegexFlags(u8);

impl RegexFlags {
    pub const NONE: Self = Self(0);
    pub const IGNORECASE: Self = Self(1);
    pub const MULTILINE: Self = Self(2);
    pub const DOTALL: Self = Self(4);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    fn letters(self) -> String {
        let mut letters = String::new();
        if self.contains(Self::IGNORECASE) {
            letters.push('i');
        }
        if self.contains(Self::MULTILINE) {
            letters.push('m');
        }
        if self.contains(Self::DOTALL) {
            letters.push('s');
        }
        letters
    }
}

/// A regex terminal: the pattern text plus its lazily compiled form.
///
/// Compilation is shared across clones, so the optimizer can copy expression
/// trees freely without recompiling. Patterns are anchored at the scan
/// position by wrapping them in `\A(?:…)` at compile time.
#[derive(Clone)]
pub struct RegexPattern {
    pattern: String,
    flags: RegexFlags,
    compiled: Arc<OnceLock<Result<fancy_regex::Regex, String>>>,
}

impl RegexPattern {
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self::with_flags(pattern, RegexFlags::NONE)
    }

    #[must_use]
    pub fn with_flags(pattern: impl Into<String>, flags: RegexFlags) -> Self {
        Self {
            pattern: pattern.into(),
            flags,
            compiled: Arc::new(OnceLock::new()),
        }
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn flags(&self) -> RegexFlags {
        self.flags
    }

    /// Compiles (once) and returns the anchored regex.
    pub(crate) fn compiled(&self) -> Result<&fancy_regex::Regex, GrammarError> {
        let anchored = {
            let letters = self.flags.letters();
            if letters.is_empty() {
                format!("\\A(?:{})", self.pattern)
            } else {
                format!("\\A(?{}:{})", letters, self.pattern)
            }
        };
        self.compiled
            .get_or_init(|| fancy_regex::Regex::new(&anchored).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|message| GrammarError::InvalidRegex {
                pattern: self.pattern.clone(),
                message: message.clone(),
            })
    }

    /// Runs the regex at `pos`, returning the new position on a match.
    pub(crate) fn scan(&self, input: &str, pos: usize) -> Result<Option<usize>, ParseError> {
        let re = self
            .compiled()
            .map_err(|e| ParseError::new(e.to_string()))?;
        match re.find(&input[pos..]) {
            Ok(Some(m)) => Ok(Some(pos + m.end())),
            Ok(None) => Ok(None),
            Err(e) => Err(ParseError::from_pos(
                pos,
                input,
                format!("regex execution failed: {e}"),
            )),
        }
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.flags == other.flags
    }
}

impl fmt::Debug for RegexPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexPattern")
            .field("pattern", &self.pattern)
            .field("flags", &self.flags)
            .finish()
    }
}

// ===========================================================================
// Expressions
// ===========================================================================

/// A node of the parsing expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Any one character.
    Dot,
    /// A literal string.
    Literal(String),
    /// A character class.
    Class(ClassRanges),
    /// A precompiled regular expression.
    Regex(RegexPattern),
    /// A reference to a named definition.
    Nonterminal(String),
    /// Zero or one.
    Optional(Box<Expr>),
    /// Zero or more, possessive.
    Star(Box<Expr>),
    /// One or more, possessive.
    Plus(Box<Expr>),
    /// Positive lookahead; matches without consuming.
    And(Box<Expr>),
    /// Negative lookahead; succeeds only if the child fails.
    Not(Box<Expr>),
    /// Emit the matched substring as a positional value.
    Capture(Box<Expr>),
    /// Match but emit nothing.
    Discard(Box<Expr>),
    /// Interleave the grammar's ignore pattern around the child's items.
    /// Rewritten away before matching.
    AutoIgnore(Box<Expr>),
    /// Emit the child's reduced value under a name instead of positionally.
    Bind { expr: Box<Expr>, name: String },
    /// Match each child in order.
    Sequence(Vec<Expr>),
    /// Try each child in order; first success wins.
    Choice(Vec<Expr>),
    /// Apply an action to the child's emissions.
    Rule {
        expr: Box<Expr>,
        action: Option<Action>,
        name: String,
    },
}

impl Expr {
    /// Calls `f` on this node and every descendant, pre-order.
    pub(crate) fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Self::Dot
            | Self::Literal(_)
            | Self::Class(_)
            | Self::Regex(_)
            | Self::Nonterminal(_) => {}
            Self::Optional(e)
            | Self::Star(e)
            | Self::Plus(e)
            | Self::And(e)
            | Self::Not(e)
            | Self::Capture(e)
            | Self::Discard(e)
            | Self::AutoIgnore(e)
            | Self::Bind { expr: e, .. }
            | Self::Rule { expr: e, .. } => e.walk(f),
            Self::Sequence(items) | Self::Choice(items) => {
                for item in items {
                    item.walk(f);
                }
            }
        }
    }

    /// Formats the expression in grammar syntax.
    ///
    /// Fails for regexes and rules, which the syntax cannot express.
    pub fn to_grammar_string(&self) -> Result<String, GrammarError> {
        let mut out = String::new();
        format_into(self, 0, &mut out)?;
        Ok(out)
    }
}

/// Binding strength used to decide parenthesization when formatting.
fn precedence(e: &Expr) -> u8 {
    match e {
        Expr::Choice(_) => 1,
        Expr::Sequence(_) => 2,
        Expr::And(_) | Expr::Not(_) | Expr::Capture(_) | Expr::Discard(_) | Expr::Bind { .. } => 3,
        Expr::Optional(_) | Expr::Star(_) | Expr::Plus(_) => 4,
        _ => 5,
    }
}

fn format_into(e: &Expr, parent: u8, out: &mut String) -> Result<(), GrammarError> {
    let parens = parent > 0 && precedence(e) <= parent;
    if parens {
        out.push('(');
    }
    match e {
        Expr::Dot => out.push('.'),
        Expr::Literal(s) => {
            out.push('"');
            out.push_str(&escape(s));
            out.push('"');
        }
        Expr::Class(ranges) => {
            out.push('[');
            out.push_str(&ranges.grammar_body());
            out.push(']');
        }
        Expr::Regex(_) => return Err(GrammarError::Unrepresentable("regular expressions")),
        Expr::Nonterminal(name) => out.push_str(name),
        Expr::Optional(inner) => {
            format_into(inner, 4, out)?;
            out.push('?');
        }
        Expr::Star(inner) => {
            format_into(inner, 4, out)?;
            out.push('*');
        }
        Expr::Plus(inner) => {
            format_into(inner, 4, out)?;
            out.push('+');
        }
        Expr::And(inner) => {
            out.push('&');
            format_into(inner, 3, out)?;
        }
        Expr::Not(inner) => {
            out.push('!');
            format_into(inner, 3, out)?;
        }
        Expr::Capture(inner) => {
            out.push('~');
            format_into(inner, 3, out)?;
        }
        Expr::Discard(inner) => {
            out.push(':');
            format_into(inner, 3, out)?;
        }
        Expr::Bind { expr, name } => {
            let _ = write!(out, "{name}:");
            format_into(expr, 3, out)?;
        }
        Expr::AutoIgnore(_) => return Err(GrammarError::Unrepresentable("auto-ignore wrappers")),
        Expr::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                format_into(item, 2, out)?;
            }
        }
        Expr::Choice(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(" / ");
                }
                format_into(item, 1, out)?;
            }
        }
        Expr::Rule { .. } => return Err(GrammarError::Unrepresentable("rules")),
    }
    if parens {
        out.push(')');
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op;

    #[test]
    fn class_spec_parses_ranges() {
        let c = ClassRanges::from_spec("a-z0_");
        assert_eq!(
            c.ranges,
            vec![('a', Some('z')), ('0', None), ('_', None)]
        );
        assert!(!c.negate);
        assert!(c.accepts('m'));
        assert!(c.accepts('_'));
        assert!(!c.accepts('9'));
    }

    #[test]
    fn class_spec_negates() {
        let c = ClassRanges::from_spec("^ab");
        assert!(c.negate);
        assert!(!c.accepts('a'));
        assert!(c.accepts('z'));
    }

    #[test]
    fn class_trailing_dash_is_literal() {
        let c = ClassRanges::from_spec("a-");
        assert_eq!(c.ranges, vec![('a', None), ('-', None)]);
        assert!(c.accepts('-'));
    }

    #[test]
    fn single_char_detection() {
        assert_eq!(ClassRanges::from_spec("x").single_char(), Some('x'));
        assert_eq!(ClassRanges::from_spec("xy").single_char(), None);
        assert_eq!(ClassRanges::from_spec("^x").single_char(), None);
    }

    #[test]
    fn formats_with_precedence() {
        let e = op::sequence([
            op::nonterminal("A"),
            op::choice([op::nonterminal("B"), op::nonterminal("C")]),
        ]);
        assert_eq!(e.to_grammar_string().unwrap(), "A (B / C)");
    }

    #[test]
    fn formats_prefix_and_quantifier() {
        let e = op::and(op::star(op::nonterminal("A")));
        assert_eq!(e.to_grammar_string().unwrap(), "&A*");
        let e = op::star(op::capture(op::nonterminal("A")));
        assert_eq!(e.to_grammar_string().unwrap(), "(~A)*");
    }

    #[test]
    fn regex_has_no_syntax() {
        let e = op::regex("a+");
        assert!(matches!(
            e.to_grammar_string(),
            Err(GrammarError::Unrepresentable(_))
        ));
    }

    #[test]
    fn regex_pattern_scans_anchored() {
        let re = RegexPattern::new("[0-9]+");
        assert_eq!(re.scan("ab123", 2).unwrap(), Some(5));
        assert_eq!(re.scan("ab123", 0).unwrap(), None);
    }

    #[test]
    fn regex_pattern_reports_bad_pattern() {
        let re = RegexPattern::new("(unclosed");
        assert!(re.compiled().is_err());
    }
}
