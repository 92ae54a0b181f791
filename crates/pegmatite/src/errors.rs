//! Error types for grammar construction and matching.
//!
//! There are two families. [`GrammarError`] covers everything that can go
//! wrong while building a parser: bad grammar text, unknown nonterminals,
//! re-finalizing a finalized grammar, a regular expression that will not
//! compile.
//! These are programmer errors and are never recovered internally.
//! [`ParseError`] is only surfaced when matching is asked to fail loudly
//! (the `STRICT` flag) or when an action fails; it carries enough position
//! information to print the offending line with a caret.

use std::fmt;

use thiserror::Error;

/// Errors raised while parsing, finalizing, or optimizing a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("undefined nonterminal: {0}")]
    UndefinedNonterminal(String),

    #[error("grammar is already finalized")]
    AlreadyFinalized,

    #[error("grammar cannot be modified after finalization")]
    Finalized,

    #[error("empty grammar")]
    EmptyGrammar,

    /// The grammar text could not be parsed.
    #[error("invalid grammar at line {line}, column {column}: {message}")]
    InvalidSyntax { message: String, line: usize, column: usize },

    /// A lifted or user-supplied regular expression failed to compile.
    #[error("invalid regular expression {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("unsupported parser: {0}")]
    UnsupportedParser(String),

    /// The expression has no surface syntax (regexes and rules cannot be
    /// re-serialized to grammar text).
    #[error("no grammar syntax exists for {0}")]
    Unrepresentable(&'static str),
}

/// A failure reported while matching input.
///
/// Only produced under the `STRICT` flag or by a failing action. Carries the
/// position of the failure and the offending line of input so `Display` can
/// render an excerpt with a caret:
///
/// ```text
///   line 3, character 7
///     value: [1, 2,
///            ^
/// ParseError: no complete match
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseError {
    pub message: Option<String>,
    pub filename: Option<String>,
    /// 1-based line number of the failure.
    pub lineno: Option<usize>,
    /// 0-based character offset of the failure within its line.
    pub offset: Option<usize>,
    /// The full text of the offending line.
    pub text: Option<String>,
}

impl ParseError {
    /// Creates an error with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Builds an error from an absolute position in the full input text.
    ///
    /// Works for both `\n` and `\r\n` newline conventions.
    #[must_use]
    pub fn from_pos(pos: usize, text: &str, message: impl Into<String>) -> Self {
        let pos = pos.min(text.len());
        let start = text[..pos].rfind('\n').map_or(0, |i| i + 1);
        let end = text[start..].find('\n').map_or(text.len(), |i| start + i);
        let line = text[start..end].trim_end_matches('\r');
        let lineno = text[..start].matches('\n').count() + 1;
        Self {
            message: Some(message.into()),
            filename: None,
            lineno: Some(lineno),
            offset: Some(pos - start),
            text: Some(line.to_owned()),
        }
    }

    /// Attaches a filename for display.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut location = Vec::new();
        if let Some(filename) = &self.filename {
            location.push(format!("File \"{filename}\""));
        }
        if let Some(lineno) = self.lineno {
            location.push(format!("line {lineno}"));
        }
        if let Some(offset) = self.offset {
            location.push(format!("character {offset}"));
        }
        if !location.is_empty() {
            writeln!(f)?;
            writeln!(f, "  {}", location.join(", "))?;
        }
        if let Some(text) = &self.text {
            writeln!(f, "    {text}")?;
            if let Some(offset) = self.offset {
                writeln!(f, "    {}^", " ".repeat(offset))?;
            }
        }
        match &self.message {
            Some(message) => write!(f, "ParseError: {message}"),
            None => write!(f, "ParseError"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Umbrella error for the public API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// An error raised by a user-supplied action callback.
///
/// Converted into a [`ParseError`] positioned at the action's start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
