//! Parser for the grammar text format.
//!
//! The syntax is a superset of Bryan Ford's PEG notation:
//!
//! ```text
//! Start      <- Spacing (Grammar / Expression) EndOfFile
//! Grammar    <- Definition+
//! Definition <- Identifier Operator Expression
//! Operator   <- '<-' / '<' Space          # '<' wraps the body in auto-ignore
//! Expression <- Sequence ('/' Sequence)*
//! Sequence   <- Valued+
//! Valued     <- Prefix? Quantified
//! Prefix     <- '&' / '!' / '~' / Identifier? ':'
//! Quantified <- Primary Quantifier?
//! Quantifier <- '?' / '*' / '+' / '{' Integer? (',' Integer?)? (':' Sequence)? '}'
//! Primary    <- Name / '(' Expression ')' / Literal / Class / '.'
//! ```
//!
//! Literals take single or double quotes; classes support ranges, negation
//! with a leading `^`, and the escapes `\t \n \v \f \r \" \' \[ \] \\ \-`
//! plus octal (`\NNN`), and hex (`\xNN`, `\uNNNN`, `\UNNNNNNNN`) code
//! points. `#` starts a comment running to end of line.

use indexmap::IndexMap;

use crate::errors::GrammarError;
use crate::expr::{ClassRanges, Expr};
use crate::grammar::DEFAULT_START;
use crate::op;

/// Parses grammar text into `(start, definitions)`.
///
/// A bare expression (no `Name <- …` definitions) becomes the single
/// definition `Start`.
pub fn loads(source: &str) -> Result<(String, IndexMap<String, Expr>), GrammarError> {
    let mut reader = Reader::new(source);
    reader.skip_spacing();
    if reader.at_eof() {
        return Err(GrammarError::EmptyGrammar);
    }

    let mut definitions = IndexMap::new();
    let mut start: Option<String> = None;
    while let Some((name, expr)) = reader.try_parse_definition()? {
        if start.is_none() {
            start = Some(name.clone());
        }
        definitions.insert(name, expr);
    }

    let start = match start {
        Some(start) => start,
        None => {
            let expr = reader.parse_expression()?;
            definitions.insert(DEFAULT_START.to_owned(), expr);
            DEFAULT_START.to_owned()
        }
    };

    if !reader.at_eof() {
        return Err(reader.error("expected end of input"));
    }
    Ok((start, definitions))
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn error(&self, message: impl Into<String>) -> GrammarError {
        let start = self.src[..self.pos].rfind('\n').map_or(0, |i| i + 1);
        GrammarError::InvalidSyntax {
            message: message.into(),
            line: self.src[..self.pos].matches('\n').count() + 1,
            column: self.src[start..self.pos].chars().count(),
        }
    }

    /// Consumes whitespace and `#` comments.
    fn skip_spacing(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    // -- definitions --------------------------------------------------------

    fn try_parse_definition(&mut self) -> Result<Option<(String, Expr)>, GrammarError> {
        let saved = self.pos;
        let Some(name) = self.try_identifier() else {
            return Ok(None);
        };
        let ignore = if self.eat("<-") {
            false
        } else if self.at_left_angle() {
            self.eat("<");
            true
        } else {
            self.pos = saved;
            return Ok(None);
        };
        self.skip_spacing();
        let expr = self.parse_expression()?;
        let expr = if ignore { op::auto_ignore(expr) } else { expr };
        Ok(Some((name, expr)))
    }

    /// A `<` introducing an auto-ignore definition: it must be followed by
    /// whitespace to distinguish it from `<-`.
    fn at_left_angle(&self) -> bool {
        let mut chars = self.rest().chars();
        chars.next() == Some('<') && matches!(chars.next(), Some(' ' | '\t' | '\r' | '\n'))
    }

    // -- expressions --------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, GrammarError> {
        let mut alternatives = vec![self.parse_sequence()?];
        while self.eat("/") {
            self.skip_spacing();
            alternatives.push(self.parse_sequence()?);
        }
        Ok(op::choice(alternatives))
    }

    fn parse_sequence(&mut self) -> Result<Expr, GrammarError> {
        let mut items = Vec::new();
        while let Some(item) = self.try_parse_valued()? {
            items.push(item);
        }
        if items.is_empty() {
            return Err(self.error("expected an expression"));
        }
        Ok(op::sequence(items))
    }

    fn try_parse_valued(&mut self) -> Result<Option<Expr>, GrammarError> {
        let prefix = self.try_parse_prefix();
        let quantified = self.try_parse_quantified()?;
        match (prefix, quantified) {
            (Some(prefix), Some(expr)) => Ok(Some(prefix.apply(expr))),
            (None, quantified) => Ok(quantified),
            (Some(_), None) => Err(self.error("expected an expression after prefix")),
        }
    }

    fn try_parse_prefix(&mut self) -> Option<Prefix> {
        if self.eat("&") {
            self.skip_spacing();
            return Some(Prefix::And);
        }
        if self.eat("!") {
            self.skip_spacing();
            return Some(Prefix::Not);
        }
        if self.eat("~") {
            self.skip_spacing();
            return Some(Prefix::Capture);
        }
        if self.eat(":") {
            self.skip_spacing();
            return Some(Prefix::Discard);
        }
        let saved = self.pos;
        if let Some(name) = self.try_identifier() {
            if self.eat(":") {
                self.skip_spacing();
                return Some(Prefix::Bind(name));
            }
            self.pos = saved;
        }
        None
    }

    fn try_parse_quantified(&mut self) -> Result<Option<Expr>, GrammarError> {
        let Some(primary) = self.try_parse_primary()? else {
            return Ok(None);
        };
        if self.eat("?") {
            self.skip_spacing();
            return Ok(Some(op::optional(primary)));
        }
        if self.eat("*") {
            self.skip_spacing();
            return Ok(Some(op::star(primary)));
        }
        if self.eat("+") {
            self.skip_spacing();
            return Ok(Some(op::plus(primary)));
        }
        if self.eat("{") {
            self.skip_spacing();
            return Ok(Some(self.parse_repeat(primary)?));
        }
        Ok(Some(primary))
    }

    /// The spec between `{` and `}`: counts, a range, and/or a delimiter.
    fn parse_repeat(&mut self, primary: Expr) -> Result<Expr, GrammarError> {
        let low = self.try_integer()?;
        let mut high = low;
        let mut ranged = false;
        if self.eat(",") {
            self.skip_spacing();
            ranged = true;
            high = self.try_integer()?;
        }
        let delimiter = if self.eat(":") {
            self.skip_spacing();
            Some(self.parse_sequence()?)
        } else {
            None
        };
        if !self.eat("}") {
            return Err(self.error("expected `}` to close repetition"));
        }
        self.skip_spacing();

        if low.is_none() && !ranged && delimiter.is_none() {
            return Err(self.error("empty repetition"));
        }
        let min = low.unwrap_or(0);
        let max = if ranged { high } else { low };
        if let Some(max) = max
            && max < min
        {
            return Err(self.error("repetition maximum is less than its minimum"));
        }
        Ok(op::repeat(primary, min, max, delimiter))
    }

    fn try_parse_primary(&mut self) -> Result<Option<Expr>, GrammarError> {
        match self.peek() {
            Some('(') => {
                self.bump();
                self.skip_spacing();
                let expr = self.parse_expression()?;
                if !self.eat(")") {
                    return Err(self.error("expected `)`"));
                }
                self.skip_spacing();
                Ok(Some(expr))
            }
            Some(quote @ ('"' | '\'')) => Ok(Some(self.parse_literal(quote)?)),
            Some('[') => Ok(Some(self.parse_class()?)),
            Some('.') => {
                self.bump();
                self.skip_spacing();
                Ok(Some(Expr::Dot))
            }
            Some(c) if is_ident_start(c) => {
                let saved = self.pos;
                let name = self.try_identifier().expect("peeked an identifier start");
                // a name followed by a definition operator starts the next
                // definition, not a reference
                if self.rest().starts_with("<-") || self.at_left_angle() {
                    self.pos = saved;
                    return Ok(None);
                }
                Ok(Some(op::nonterminal(name)))
            }
            _ => Ok(None),
        }
    }

    // -- terminals ----------------------------------------------------------

    fn parse_literal(&mut self, quote: char) -> Result<Expr, GrammarError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated literal")),
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some(_) => text.push(self.parse_char()?),
            }
        }
        self.skip_spacing();
        Ok(op::literal(text))
    }

    fn parse_class(&mut self) -> Result<Expr, GrammarError> {
        self.bump();
        let negate = self.eat("^");
        let mut ranges: Vec<(char, Option<char>)> = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated character class")),
                Some(']') => {
                    self.bump();
                    break;
                }
                Some(_) => {
                    let lo = self.parse_char()?;
                    if self.peek() == Some('-') {
                        self.bump();
                        if self.peek() == Some(']') {
                            tracing::warn!(
                                "the second character in a range may be an unescaped \"]\", \
                                 but this is often a mistake; escape the hyphen (\\-) or the \
                                 right bracket (\\]), depending on what was intended"
                            );
                            self.bump();
                            ranges.push((lo, Some(']')));
                        } else {
                            let hi = self.parse_char()?;
                            ranges.push((lo, Some(hi)));
                        }
                    } else {
                        ranges.push((lo, None));
                    }
                }
            }
        }
        self.skip_spacing();
        Ok(Expr::Class(ClassRanges::new(ranges, negate)))
    }

    /// One character of a literal or class, interpreting escapes.
    fn parse_char(&mut self) -> Result<char, GrammarError> {
        let c = self.bump().ok_or_else(|| self.error("unexpected end of input"))?;
        if c != '\\' {
            return Ok(c);
        }
        let escaped = self
            .bump()
            .ok_or_else(|| self.error("unterminated escape sequence"))?;
        match escaped {
            't' => Ok('\t'),
            'n' => Ok('\n'),
            'v' => Ok('\x0B'),
            'f' => Ok('\x0C'),
            'r' => Ok('\r'),
            '"' | '\'' | '[' | ']' | '\\' | '-' => Ok(escaped),
            '0'..='7' => {
                let mut code = escaped.to_digit(8).expect("octal digit");
                for _ in 0..2 {
                    match self.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            self.bump();
                            code = code * 8 + digit;
                        }
                        None => break,
                    }
                }
                char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
            }
            'x' => self.parse_hex_escape(2),
            'u' => self.parse_hex_escape(4),
            'U' => self.parse_hex_escape(8),
            other => Err(self.error(format!("invalid escape sequence: \\{other}"))),
        }
    }

    fn parse_hex_escape(&mut self, digits: usize) -> Result<char, GrammarError> {
        let mut code: u32 = 0;
        for _ in 0..digits {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid hexadecimal escape"))?;
            code = code.wrapping_mul(16).wrapping_add(digit);
        }
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }

    fn try_identifier(&mut self) -> Option<String> {
        let c = self.peek()?;
        if !is_ident_start(c) {
            return None;
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_start(c) || c.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
        let name = self.src[start..self.pos].to_owned();
        self.skip_spacing();
        Some(name)
    }

    fn try_integer(&mut self) -> Result<Option<usize>, GrammarError> {
        if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return Ok(None);
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let digits = &self.src[start..self.pos];
        let value = digits
            .parse()
            .map_err(|_| self.error("repetition count is too large"))?;
        self.skip_spacing();
        Ok(Some(value))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

enum Prefix {
    And,
    Not,
    Capture,
    Discard,
    Bind(String),
}

impl Prefix {
    fn apply(self, expr: Expr) -> Expr {
        match self {
            Self::And => op::and(expr),
            Self::Not => op::not(expr),
            Self::Capture => op::capture(expr),
            Self::Discard => op::discard(expr),
            Self::Bind(name) => op::bind(expr, name),
        }
    }
}
