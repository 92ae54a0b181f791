#![doc = include_str!("../../../README.md")]

mod actions;
mod autoignore;
mod errors;
mod escape;
mod expr;
mod flags;
mod grammar;
mod machine;
mod matches;
pub mod op;
mod optimize;
mod packrat;
mod parse;
mod parser;
pub mod patterns;
mod value;

pub use crate::{
    actions::{Action, ActionOutput, Bindings, CallFn, CaptureFn, JoinFn, PackFn, PairFn},
    errors::{ActionError, Error, GrammarError, ParseError},
    escape::{escape, unescape},
    expr::{ClassRanges, Expr, RegexFlags, RegexPattern, ValueKind},
    flags::Flags,
    grammar::{Actions, DEFAULT_START, Grammar},
    machine::MachineParser,
    matches::Match,
    packrat::PackratParser,
    parse::loads,
    parser::{CompileOptions, Ignore, Parser, ParserKind, compile, compile_grammar, match_pattern},
    value::Value,
};
