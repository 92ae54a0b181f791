//! Ready-made expressions for common lexical shapes.

use crate::expr::Expr;
use crate::op::{choice, class, literal, not, optional, plus, sequence, star};

/// The default ignore pattern: runs of whitespace.
///
/// Applied around auto-ignore definitions unless a grammar is compiled with
/// a custom pattern or with ignoring disabled.
#[must_use]
pub fn default_ignore() -> Expr {
    star(class(" \t\n\x0B\x0C\r"))
}

/// `0` or a nonzero digit followed by more digits.
#[must_use]
pub fn unsigned_integer() -> Expr {
    choice([
        literal("0"),
        sequence([class("1-9"), star(class("0-9"))]),
    ])
}

/// An optionally signed integer.
#[must_use]
pub fn integer() -> Expr {
    sequence([optional(class("-+")), unsigned_integer()])
}

/// An integer with a mandatory fraction and/or exponent part.
#[must_use]
pub fn float() -> Expr {
    sequence([
        integer(),
        choice([
            sequence([fraction(), optional(exponent())]),
            exponent(),
        ]),
    ])
}

fn fraction() -> Expr {
    sequence([literal("."), plus(class("0-9"))])
}

fn exponent() -> Expr {
    sequence([class("eE"), optional(class("-+")), plus(class("0-9"))])
}

/// A double-quoted string with backslash escapes, quotes included.
#[must_use]
pub fn dqstring() -> Expr {
    quoted('"')
}

/// A single-quoted string with backslash escapes, quotes included.
#[must_use]
pub fn sqstring() -> Expr {
    quoted('\'')
}

fn quoted(quote: char) -> Expr {
    let q = quote.to_string();
    sequence([
        literal(q.clone()),
        star(choice([
            sequence([literal("\\"), Expr::Dot]),
            sequence([not(literal(q.clone())), Expr::Dot]),
        ])),
        literal(q),
    ])
}
