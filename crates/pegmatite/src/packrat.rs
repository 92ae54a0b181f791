//! The packrat runtime: a recursive evaluator over the expression tree.
//!
//! Matching walks the tree directly, dispatching on the operator. Ordered
//! choice restores the value state of failed alternatives; repetition is
//! possessive and stops on zero-width success; lookahead never consumes
//! input or keeps captures. With the `MEMOIZE` flag, nonterminal results
//! are memoized per `(definition, position)` for the duration of one match
//! invocation.

use ahash::AHashMap;

use crate::actions::{Bindings, reduce};
use crate::autoignore::autoignore;
use crate::errors::{GrammarError, ParseError};
use crate::expr::Expr;
use crate::flags::Flags;
use crate::grammar::Grammar;
use crate::matches::Match;
use crate::optimize::optimize;
use crate::value::Value;

/// A parser that evaluates the optimized expression tree recursively.
#[derive(Debug)]
pub struct PackratParser {
    grammar: Grammar,
    flags: Flags,
}

impl PackratParser {
    /// Builds a packrat parser from a grammar.
    ///
    /// The grammar is finalized if it is not already, the ignore pattern is
    /// interleaved into auto-ignore definitions, and the optimizer passes
    /// selected by `flags` are applied.
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
        validate_regexes(&grammar)?;
        if flags.contains(Flags::DEBUG) {
            tracing::debug!(grammar = %grammar, "compiled packrat grammar");
        }
        Ok(Self { grammar, flags })
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
        let Some(start_expr) = self.grammar.get(start) else {
            return Err(ParseError::new(format!("undefined nonterminal: {start}")));
        };
        let mut session = Session {
            grammar: &self.grammar,
            input,
            args: Vec::new(),
            kwargs: Bindings::new(),
            memo: flags.contains(Flags::MEMOIZE).then(AHashMap::new),
            furthest: pos,
        };
        match session.eval(start_expr, pos)? {
            Some(end) => Ok(Some(Match::new(
                input,
                pos,
                end,
                self.grammar.start_kind(),
                session.args,
                session.kwargs,
            ))),
            None if flags.contains(Flags::STRICT) => Err(ParseError::from_pos(
                session.furthest,
                input,
                "no complete match",
            )),
            None => Ok(None),
        }
    }
}

fn validate_regexes(grammar: &Grammar) -> Result<(), GrammarError> {
    let mut first_error = None;
    for defn in grammar.definitions().values() {
        defn.walk(&mut |e| {
            if first_error.is_none()
                && let Expr::Regex(r) = e
                && let Err(error) = r.compiled()
            {
                first_error = Some(error);
            }
        });
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

type MemoEntry = Option<(usize, Vec<Value>, Bindings)>;

struct Session<'g, 'i> {
    grammar: &'g Grammar,
    input: &'i str,
    args: Vec<Value>,
    kwargs: Bindings,
    memo: Option<AHashMap<(usize, usize), MemoEntry>>,
    furthest: usize,
}

impl<'g> Session<'g, '_> {
    fn marks(&self) -> (usize, usize) {
        (self.args.len(), self.kwargs.len())
    }

    fn restore(&mut self, marks: (usize, usize)) {
        self.args.truncate(marks.0);
        self.kwargs.truncate(marks.1);
    }

    /// Records a terminal failure position for error reporting.
    fn fail(&mut self, pos: usize) -> Result<Option<usize>, ParseError> {
        if pos > self.furthest {
            self.furthest = pos;
        }
        Ok(None)
    }

    /// Evaluates an expression at a position.
    ///
    /// Invariant: on failure, `args` and `kwargs` are exactly as they were
    /// at entry.
    fn eval(&mut self, e: &'g Expr, pos: usize) -> Result<Option<usize>, ParseError> {
        match e {
            Expr::Dot => match self.input[pos..].chars().next() {
                Some(c) => Ok(Some(pos + c.len_utf8())),
                None => self.fail(pos),
            },
            Expr::Literal(s) => {
                if self.input[pos..].starts_with(s.as_str()) {
                    Ok(Some(pos + s.len()))
                } else {
                    self.fail(pos)
                }
            }
            Expr::Class(c) => match self.input[pos..].chars().next() {
                Some(ch) if c.accepts(ch) => Ok(Some(pos + ch.len_utf8())),
                _ => self.fail(pos),
            },
            Expr::Regex(r) => match r.scan(self.input, pos)? {
                Some(end) => Ok(Some(end)),
                None => self.fail(pos),
            },
            Expr::Nonterminal(name) => self.eval_reference(name, pos),
            Expr::Optional(inner) => match self.eval(inner, pos)? {
                Some(end) => Ok(Some(end)),
                None => Ok(Some(pos)),
            },
            Expr::Star(inner) => {
                let mut cur = pos;
                while let Some(end) = self.eval(inner, cur)? {
                    if end == cur {
                        break;
                    }
                    cur = end;
                }
                Ok(Some(cur))
            }
            Expr::Plus(inner) => {
                let Some(mut cur) = self.eval(inner, pos)? else {
                    return Ok(None);
                };
                while let Some(end) = self.eval(inner, cur)? {
                    if end == cur {
                        break;
                    }
                    cur = end;
                }
                Ok(Some(cur))
            }
            Expr::And(inner) => {
                let marks = self.marks();
                match self.eval(inner, pos)? {
                    Some(_) => {
                        self.restore(marks);
                        Ok(Some(pos))
                    }
                    None => Ok(None),
                }
            }
            Expr::Not(inner) => {
                let marks = self.marks();
                match self.eval(inner, pos)? {
                    Some(_) => {
                        self.restore(marks);
                        Ok(None)
                    }
                    None => Ok(Some(pos)),
                }
            }
            Expr::Capture(inner) => {
                let marks = self.marks();
                match self.eval(inner, pos)? {
                    Some(end) => {
                        self.restore(marks);
                        self.args.push(Value::Str(self.input[pos..end].to_owned()));
                        Ok(Some(end))
                    }
                    None => Ok(None),
                }
            }
            Expr::Discard(inner) => {
                let marks = self.marks();
                match self.eval(inner, pos)? {
                    Some(end) => {
                        self.restore(marks);
                        Ok(Some(end))
                    }
                    None => Ok(None),
                }
            }
            Expr::Bind { expr, name } => {
                let (alen, _) = self.marks();
                match self.eval(expr, pos)? {
                    Some(end) => {
                        let kind = self.grammar.value_kind(expr);
                        let values: Vec<Value> = self.args.split_off(alen);
                        let reduced = reduce(values, Some(kind));
                        self.kwargs.push((name.clone(), reduced));
                        Ok(Some(end))
                    }
                    None => Ok(None),
                }
            }
            Expr::AutoIgnore(inner) => self.eval(inner, pos),
            Expr::Sequence(items) => {
                let marks = self.marks();
                let mut cur = pos;
                for item in items {
                    match self.eval(item, cur)? {
                        Some(end) => cur = end,
                        None => {
                            self.restore(marks);
                            return Ok(None);
                        }
                    }
                }
                Ok(Some(cur))
            }
            Expr::Choice(items) => {
                for item in items {
                    if let Some(end) = self.eval(item, pos)? {
                        return Ok(Some(end));
                    }
                }
                Ok(None)
            }
            Expr::Rule { expr, action, .. } => {
                let marks = self.marks();
                match self.eval(expr, pos)? {
                    Some(end) => {
                        if let Some(action) = action {
                            let args = self.args.split_off(marks.0);
                            let kwargs = self.kwargs.split_off(marks.1);
                            let (new_args, new_kwargs) =
                                action.apply(self.input, pos, end, args, kwargs)?;
                            self.args.extend(new_args);
                            self.kwargs.extend(new_kwargs);
                        }
                        Ok(Some(end))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    fn eval_reference(&mut self, name: &str, pos: usize) -> Result<Option<usize>, ParseError> {
        let grammar = self.grammar;
        let Some(index) = grammar.definition_index(name) else {
            return Err(ParseError::new(format!("undefined nonterminal: {name}")));
        };
        let cached = self
            .memo
            .as_ref()
            .and_then(|memo| memo.get(&(index, pos)).cloned());
        if let Some(entry) = cached {
            return match entry {
                Some((end, args, kwargs)) => {
                    self.args.extend(args);
                    self.kwargs.extend(kwargs);
                    Ok(Some(end))
                }
                None => Ok(None),
            };
        }
        let marks = self.marks();
        let expr = grammar
            .definitions()
            .get_index(index)
            .map(|(_, expr)| expr)
            .ok_or_else(|| ParseError::new(format!("undefined nonterminal: {name}")))?;
        let result = self.eval(expr, pos)?;
        if let Some(memo) = &mut self.memo {
            let entry = result.map(|end| {
                (
                    end,
                    self.args[marks.0..].to_vec(),
                    self.kwargs[marks.1..].to_vec(),
                )
            });
            memo.insert((index, pos), entry);
        }
        Ok(result)
    }
}
