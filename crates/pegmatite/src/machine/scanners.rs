//! Terminal matchers for the parsing machine.
//!
//! Every scanner answers the same question: does the terminal match at
//! this position, and if so, where does it end? `Class` supports
//! possessive repetition directly so that `e*`/`e+` over a character class
//! compiles to a single scan instruction.

use crate::errors::ParseError;
use crate::expr::{ClassRanges, RegexPattern};

/// A terminal matcher.
#[derive(Debug, Clone)]
pub(crate) enum Scanner {
    /// Any one character.
    Dot,
    /// An exact string.
    Literal(String),
    /// A character class with a repetition range.
    Class(ClassScanner),
    /// A compiled regular expression.
    Regex(RegexPattern),
}

impl Scanner {
    /// Scans at `pos`, returning the new position on a match.
    pub fn scan(&self, input: &str, pos: usize) -> Result<Option<usize>, ParseError> {
        match self {
            Self::Dot => Ok(input[pos..].chars().next().map(|c| pos + c.len_utf8())),
            Self::Literal(s) => {
                if input[pos..].starts_with(s.as_str()) {
                    Ok(Some(pos + s.len()))
                } else {
                    Ok(None)
                }
            }
            Self::Class(class) => Ok(class.scan(input, pos)),
            Self::Regex(r) => r.scan(input, pos),
        }
    }
}

/// A character class scanner with possessive min/max counts.
#[derive(Debug, Clone)]
pub(crate) struct ClassScanner {
    pub ranges: ClassRanges,
    pub min: usize,
    /// `None` is unbounded.
    pub max: Option<usize>,
}

impl ClassScanner {
    pub fn once(ranges: ClassRanges) -> Self {
        Self {
            ranges,
            min: 1,
            max: Some(1),
        }
    }

    fn scan(&self, input: &str, pos: usize) -> Option<usize> {
        let mut end = pos;
        let mut count = 0usize;
        for c in input[pos..].chars() {
            if self.max.is_some_and(|max| count >= max) {
                break;
            }
            if self.ranges.accepts(c) {
                end += c.len_utf8();
                count += 1;
            } else {
                break;
            }
        }
        (count >= self.min).then_some(end)
    }
}
