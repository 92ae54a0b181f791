//! The result of a successful match.

use std::fmt;

use indexmap::IndexMap;

use crate::actions::Bindings;
use crate::expr::ValueKind;
use crate::value::Value;

/// A successful match: the span, the positional values, and the named
/// values an expression emitted over an input.
///
/// Borrows the input; the values are owned.
#[derive(Clone, PartialEq)]
pub struct Match<'a> {
    input: &'a str,
    start: usize,
    end: usize,
    kind: ValueKind,
    args: Vec<Value>,
    kwargs: Bindings,
}

impl<'a> Match<'a> {
    pub(crate) fn new(
        input: &'a str,
        start: usize,
        end: usize,
        kind: ValueKind,
        args: Vec<Value>,
        kwargs: Bindings,
    ) -> Self {
        Self {
            input,
            start,
            end,
            kind,
            args,
            kwargs,
        }
    }

    /// The full input that was matched against.
    #[must_use]
    pub fn input(&self) -> &'a str {
        self.input
    }

    /// The offset where the match started.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// The offset just past the end of the match.
    #[must_use]
    pub fn end(&self) -> usize {
        self.end
    }

    /// The half-open `(start, end)` span.
    #[must_use]
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// The matched slice of the input.
    #[must_use]
    pub fn as_str(&self) -> &'a str {
        &self.input[self.start..self.end]
    }

    /// Positional group `i`, 1-based; group 0 is the matched text.
    #[must_use]
    pub fn group(&self, index: usize) -> Option<Value> {
        if index == 0 {
            return Some(Value::Str(self.as_str().to_owned()));
        }
        self.args.get(index - 1).cloned()
    }

    /// A named group, if it was bound. The latest binding wins.
    #[must_use]
    pub fn group_named(&self, name: &str) -> Option<&Value> {
        self.kwargs
            .iter()
            .rev()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    /// All positional values, in emission order.
    #[must_use]
    pub fn groups(&self) -> &[Value] {
        &self.args
    }

    /// All named values as a map. Later bindings shadow earlier ones.
    #[must_use]
    pub fn groupdict(&self) -> IndexMap<String, Value> {
        self.kwargs.iter().cloned().collect()
    }

    /// The match's reduced value: the sole positional value for an atomic
    /// expression, the list of them for an iterable one, and
    /// [`Value::None`] for an empty one.
    #[must_use]
    pub fn value(&self) -> Value {
        match self.kind {
            ValueKind::Empty => Value::None,
            ValueKind::Atomic => self.args.first().cloned().unwrap_or(Value::None),
            ValueKind::Iterable => Value::List(self.args.clone()),
        }
    }
}

impl fmt::Debug for Match<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut text = self.as_str();
        if text.len() > 20 {
            let mut cut = 20;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text = &text[..cut];
        }
        write!(
            f,
            "<Match object; span=({}, {}), match={text:?}>",
            self.start, self.end
        )
    }
}
