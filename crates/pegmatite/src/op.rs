//! Constructors for parsing expressions.
//!
//! These free functions are the programmatic way to build grammars. They
//! maintain the tree invariants: sequences and choices flatten nested
//! same-operator children and collapse to the child when given a single
//! expression, and bounded repetition desugars to the core operators.

use crate::actions::Action;
use crate::expr::{ClassRanges, Expr, RegexFlags, RegexPattern};

/// The name rules take when none is given.
pub const ANONYMOUS: &str = "<anonymous>";

/// Any one character.
#[must_use]
pub fn dot() -> Expr {
    Expr::Dot
}

/// A literal string.
#[must_use]
pub fn literal(s: impl Into<String>) -> Expr {
    Expr::Literal(s.into())
}

/// A character class from a body spec such as `"a-zA-Z_"`; a leading `^`
/// negates the class.
#[must_use]
pub fn class(spec: &str) -> Expr {
    Expr::Class(ClassRanges::from_spec(spec))
}

/// A character class from explicit ranges.
#[must_use]
pub fn class_ranges(ranges: Vec<(char, Option<char>)>, negate: bool) -> Expr {
    Expr::Class(ClassRanges::new(ranges, negate))
}

/// A precompiled regular expression terminal.
#[must_use]
pub fn regex(pattern: impl Into<String>) -> Expr {
    Expr::Regex(RegexPattern::new(pattern))
}

/// A regex terminal with flags.
#[must_use]
pub fn regex_with_flags(pattern: impl Into<String>, flags: RegexFlags) -> Expr {
    Expr::Regex(RegexPattern::with_flags(pattern, flags))
}

/// A reference to a named definition.
#[must_use]
pub fn nonterminal(name: impl Into<String>) -> Expr {
    Expr::Nonterminal(name.into())
}

/// Zero or one.
#[must_use]
pub fn optional(e: Expr) -> Expr {
    Expr::Optional(Box::new(e))
}

/// Zero or more, possessive.
#[must_use]
pub fn star(e: Expr) -> Expr {
    Expr::Star(Box::new(e))
}

/// One or more, possessive.
#[must_use]
pub fn plus(e: Expr) -> Expr {
    Expr::Plus(Box::new(e))
}

/// Positive lookahead.
#[must_use]
pub fn and(e: Expr) -> Expr {
    Expr::And(Box::new(e))
}

/// Negative lookahead.
#[must_use]
pub fn not(e: Expr) -> Expr {
    Expr::Not(Box::new(e))
}

/// Emit the matched substring as a positional value.
#[must_use]
pub fn capture(e: Expr) -> Expr {
    Expr::Capture(Box::new(e))
}

/// Match but emit nothing.
#[must_use]
pub fn discard(e: Expr) -> Expr {
    Expr::Discard(Box::new(e))
}

/// Interleave the grammar's ignore pattern around the child's items.
#[must_use]
pub fn auto_ignore(e: Expr) -> Expr {
    Expr::AutoIgnore(Box::new(e))
}

/// Emit the child's reduced value under `name` instead of positionally.
#[must_use]
pub fn bind(e: Expr, name: impl Into<String>) -> Expr {
    Expr::Bind {
        expr: Box::new(e),
        name: name.into(),
    }
}

/// Match each expression in order.
///
/// Nested sequences flatten; a single expression collapses to itself; no
/// expressions at all matches the empty string.
#[must_use]
pub fn sequence(exprs: impl IntoIterator<Item = Expr>) -> Expr {
    let mut items = Vec::new();
    for e in exprs {
        match e {
            Expr::Sequence(inner) => items.extend(inner),
            other => items.push(other),
        }
    }
    match items.len() {
        0 => literal(""),
        1 => items.into_iter().next().expect("length checked"),
        _ => Expr::Sequence(items),
    }
}

/// Try each expression in order; the first success wins.
#[must_use]
pub fn choice(exprs: impl IntoIterator<Item = Expr>) -> Expr {
    let mut items = Vec::new();
    for e in exprs {
        match e {
            Expr::Choice(inner) => items.extend(inner),
            other => items.push(other),
        }
    }
    match items.len() {
        0 => literal(""),
        1 => items.into_iter().next().expect("length checked"),
        _ => Expr::Choice(items),
    }
}

/// Apply an action to the expression's emissions, anonymously.
#[must_use]
pub fn rule(e: Expr, action: Action) -> Expr {
    rule_named(e, Some(action), ANONYMOUS)
}

/// Apply an optional action under an explicit rule name.
#[must_use]
pub fn rule_named(e: Expr, action: Option<Action>, name: impl Into<String>) -> Expr {
    Expr::Rule {
        expr: Box::new(e),
        action,
        name: name.into(),
    }
}

/// Bounded repetition, optionally delimited.
///
/// `max` of `None` means unbounded. A delimiter must match between
/// occurrences; its emissions are discarded. All forms desugar to the core
/// operators, e.g. `repeat(e, 1, Some(3), None)` builds `e (e (e)?)?`.
#[must_use]
pub fn repeat(e: Expr, min: usize, max: Option<usize>, delimiter: Option<Expr>) -> Expr {
    let max = max.map(|m| m.max(min));
    if max == Some(0) {
        return literal("");
    }
    match delimiter {
        None => repeat_plain(e, min, max),
        Some(d) => {
            let unit = sequence([discard(d), e.clone()]);
            let tail_max = max.map(|m| m - 1);
            if min == 0 {
                optional(sequence([e, repeat_plain(unit, 0, tail_max)]))
            } else {
                sequence([e, repeat_plain(unit, min - 1, tail_max)])
            }
        }
    }
}

fn repeat_plain(e: Expr, min: usize, max: Option<usize>) -> Expr {
    match (min, max) {
        (0, None) => star(e),
        (1, None) => plus(e),
        _ => {
            let mut items: Vec<Expr> = (0..min).map(|_| e.clone()).collect();
            match max {
                None => items.push(star(e)),
                Some(max) => {
                    let extra = max - min;
                    if extra > 0 {
                        let mut tail = optional(e.clone());
                        for _ in 1..extra {
                            tail = optional(sequence([e.clone(), tail]));
                        }
                        items.push(tail);
                    }
                }
            }
            sequence(items)
        }
    }
}
