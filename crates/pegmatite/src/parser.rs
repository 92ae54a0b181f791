//! Compiling grammars into parsers.
//!
//! [`compile`] is the front door: grammar text in, a ready-to-use
//! [`Parser`] out. [`CompileOptions`] selects the back-end, the ignore
//! pattern for auto-ignore definitions, and the optimizer flags.

use std::str::FromStr;

use strum::{Display, EnumString};

use crate::errors::{Error, ParseError};
use crate::expr::Expr;
use crate::flags::Flags;
use crate::grammar::{Actions, Grammar};
use crate::machine::MachineParser;
use crate::matches::Match;
use crate::packrat::PackratParser;
use crate::parse;
use crate::patterns;

/// The available parser back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ParserKind {
    /// The recursive evaluator with optional memoization.
    #[default]
    Packrat,
    /// The compiled stack machine.
    Machine,
}

impl ParserKind {
    /// Parses a back-end name such as `"packrat"` or `"machine"`.
    pub fn parse(name: &str) -> Result<Self, crate::GrammarError> {
        Self::from_str(name).map_err(|_| crate::GrammarError::UnsupportedParser(name.to_owned()))
    }
}

/// The ignore pattern applied to auto-ignore definitions.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Ignore {
    /// Runs of whitespace ([`patterns::default_ignore`]).
    #[default]
    Default,
    /// No pattern; auto-ignore markers are dropped.
    Disabled,
    /// A custom expression.
    Custom(Expr),
}

impl Ignore {
    fn to_expr(&self) -> Option<Expr> {
        match self {
            Self::Default => Some(patterns::default_ignore()),
            Self::Disabled => None,
            Self::Custom(e) => Some(e.clone()),
        }
    }
}

/// Options for [`compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub parser: ParserKind,
    pub ignore: Ignore,
    pub flags: Flags,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            parser: ParserKind::default(),
            ignore: Ignore::default(),
            flags: Flags::OPTIMIZE,
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn with_parser(mut self, parser: ParserKind) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_ignore(mut self, ignore: Ignore) -> Self {
        self.ignore = ignore;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }
}

/// A compiled parser, ready to match input.
#[derive(Debug)]
pub enum Parser {
    Packrat(PackratParser),
    Machine(MachineParser),
}

impl Parser {
    /// Which back-end this parser runs on.
    #[must_use]
    pub fn kind(&self) -> ParserKind {
        match self {
            Self::Packrat(_) => ParserKind::Packrat,
            Self::Machine(_) => ParserKind::Machine,
        }
    }

    /// The grammar as modified by auto-ignore and optimization.
    #[must_use]
    pub fn grammar(&self) -> &Grammar {
        match self {
            Self::Packrat(p) => p.grammar(),
            Self::Machine(p) => p.grammar(),
        }
    }

    /// Matches `input` from the beginning.
    pub fn match_str<'i>(&self, input: &'i str) -> Result<Option<Match<'i>>, ParseError> {
        self.match_at(input, 0, Flags::NONE)
    }

    /// Matches `input` starting at `pos` with extra match-time flags
    /// (`STRICT`, `MEMOIZE`).
    pub fn match_at<'i>(
        &self,
        input: &'i str,
        pos: usize,
        flags: Flags,
    ) -> Result<Option<Match<'i>>, ParseError> {
        match self {
            Self::Packrat(p) => p.match_at(input, pos, flags),
            Self::Machine(p) => p.match_at(input, pos, flags),
        }
    }
}

/// Compiles grammar text with the given actions.
pub fn compile(source: &str, actions: Actions, options: CompileOptions) -> Result<Parser, Error> {
    let (start, definitions) = parse::loads(source)?;
    let mut grammar = Grammar::from_parts(definitions, actions, start);
    if options.flags.contains(Flags::DEBUG) {
        tracing::debug!(grammar = %grammar, "loaded grammar");
    }
    grammar.finalize()?;
    compile_grammar(grammar, options)
}

/// Compiles an already-built grammar; it is finalized if necessary.
pub fn compile_grammar(grammar: Grammar, options: CompileOptions) -> Result<Parser, Error> {
    let ignore = options.ignore.to_expr();
    let parser = match options.parser {
        ParserKind::Packrat => {
            Parser::Packrat(PackratParser::new(grammar, ignore.as_ref(), options.flags)?)
        }
        ParserKind::Machine => {
            Parser::Machine(MachineParser::new(grammar, ignore.as_ref(), options.flags)?)
        }
    };
    Ok(parser)
}

/// Compiles `pattern` and matches `input` against it once, memoized.
pub fn match_pattern<'i>(pattern: &str, input: &'i str) -> Result<Option<Match<'i>>, Error> {
    let parser = compile(pattern, Actions::new(), CompileOptions::default())?;
    parser
        .match_at(input, 0, Flags::MEMOIZE)
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_kind_names_round_trip() {
        assert_eq!(ParserKind::parse("packrat").unwrap(), ParserKind::Packrat);
        assert_eq!(ParserKind::parse("machine").unwrap(), ParserKind::Machine);
        assert!(ParserKind::parse("other").is_err());
        assert_eq!(ParserKind::Machine.to_string(), "machine");
    }

    #[test]
    fn match_pattern_convenience() {
        let m = match_pattern("\"-\"? [1-9] [0-9]*", "-12345")
            .unwrap()
            .expect("should match");
        assert_eq!(m.as_str(), "-12345");
    }
}
