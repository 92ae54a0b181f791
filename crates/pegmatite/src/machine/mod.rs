//! The parsing machine: a compiled, stack-based runtime.
//!
//! In the style of Medeiros & Ierusalimschy's parsing machine for PEGs, the
//! expression tree is compiled to a flat instruction sequence and executed
//! by an interpreter with an explicit backtrack stack. Ordered choice and
//! repetition push backtrack entries; captures and actions are carried as
//! instruction flags that pair with mark entries on the same stack.
//!
//! # Module structure
//!
//! - `op` - opcode definitions
//! - `scanners` - terminal matcher objects
//! - `compiler` - expression tree to instruction compiler
//! - `vm` - the interpreter loop

pub use compiler::{Instr, Program};

mod compiler;
mod op;
mod scanners;
mod vm;

use crate::actions::Bindings;
use crate::autoignore::autoignore;
use crate::errors::{GrammarError, ParseError};
use crate::expr::Expr;
use crate::flags::Flags;
use crate::grammar::Grammar;
use crate::matches::Match;
use crate::optimize::optimize;

/// A parser that interprets a compiled instruction sequence.
#[derive(Debug)]
pub struct MachineParser {
    grammar: Grammar,
    program: Program,
    flags: Flags,
}

impl MachineParser {
    /// Builds a machine parser from a grammar.
    ///
    /// The grammar is finalized if it is not already, the ignore pattern is
    /// interleaved into auto-ignore definitions, the optimizer passes
    /// selected by `flags` are applied, and the result is compiled to
    /// instructions.
    pub fn new(
        mut grammar: Grammar,
        ignore: Option<&Expr>,
        flags: Flags,
    ) -> Result<Self, GrammarError> {
        if !grammar.is_finalized() {
            grammar.finalize()?;
        }
        let grammar = autoignore(&grammar, ignore)?;
        let grammar = optimize(
            &grammar,
            flags.contains(Flags::INLINE),
            flags.contains(Flags::MERGE),
            flags.contains(Flags::REGEX),
        )?;
        let program = compiler::build_program(&grammar)?;
        if flags.contains(Flags::DEBUG) {
            tracing::debug!(
                grammar = %grammar,
                instructions = program.code.len(),
                "compiled machine grammar"
            );
        }
        Ok(Self {
            grammar,
            program,
            flags,
        })
    }

    /// The grammar as modified by auto-ignore and optimization.
    #[must_use]
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Matches `input` from the beginning.
    pub fn match_str<'i>(&self, input: &'i str) -> Result<Option<Match<'i>>, ParseError> {
        self.match_at(input, 0, Flags::NONE)
    }

    /// Matches `input` starting at `pos`.
    ///
    /// Returns `Ok(None)` on failure unless `STRICT` is set, in which case
    /// the failure becomes a [`ParseError`] at the furthest failing
    /// position.
    pub fn match_at<'i>(
        &self,
        input: &'i str,
        pos: usize,
        flags: Flags,
    ) -> Result<Option<Match<'i>>, ParseError> {
        let flags = self.flags | flags;
        let start = self.grammar.start();
        let Some(&start_index) = self.program.index.get(start) else {
            return Err(ParseError::new(format!("undefined nonterminal: {start}")));
        };
        let mut args = Vec::new();
        let mut kwargs = Bindings::new();
        let outcome = vm::run(&self.program, start_index, input, pos, &mut args, &mut kwargs)?;
        match outcome.end {
            Some(end) => Ok(Some(Match::new(
                input,
                pos,
                end,
                self.grammar.start_kind(),
                args,
                kwargs,
            ))),
            None if flags.contains(Flags::STRICT) => Err(ParseError::from_pos(
                outcome.furthest,
                input,
                "no complete match",
            )),
            None => Ok(None),
        }
    }
}
