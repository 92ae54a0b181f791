//! Actions: value-transforming callbacks attached to rules.
//!
//! An action receives the input, the span its rule matched, and the
//! positional/named values the rule's body emitted, and replaces that
//! contribution with its own. Actions are a closed tagged set rather than
//! bare function pointers so the compiler can inspect them; `Bind` in
//! particular is compiled specially and carries the value kind of the
//! expression it reduces.
//!
//! User callbacks are `Arc`'d closures, so a compiled parser can be shared
//! across threads as long as the callbacks themselves are pure or
//! synchronize their own state.

use std::fmt;
use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::errors::{ActionError, ParseError};
use crate::expr::ValueKind;
use crate::value::Value;

/// Named values emitted while matching, in emission order.
pub type Bindings = Vec<(String, Value)>;

/// Positional values produced by one action application.
///
/// Nearly every action returns exactly one value, so the common case stays
/// on the stack.
pub type ActionOutput = (SmallVec<[Value; 1]>, Bindings);

/// Callback receiving the positional values and the named values.
pub type CallFn = Arc<dyn Fn(Vec<Value>, &[(String, Value)]) -> Result<Value, ActionError> + Send + Sync>;
/// Callback receiving the matched substring.
pub type CaptureFn = Arc<dyn Fn(&str) -> Result<Value, ActionError> + Send + Sync>;
/// Callback receiving the positional values packed into one list value.
pub type PackFn = Arc<dyn Fn(Value, &[(String, Value)]) -> Result<Value, ActionError> + Send + Sync>;
/// Callback receiving the positional values paired up two at a time.
pub type PairFn =
    Arc<dyn Fn(Vec<(Value, Value)>, &[(String, Value)]) -> Result<Value, ActionError> + Send + Sync>;
/// Callback receiving the joined string values.
pub type JoinFn = Arc<dyn Fn(&str, &[(String, Value)]) -> Result<Value, ActionError> + Send + Sync>;

/// A rule's value-transforming behavior.
#[derive(Clone)]
pub enum Action {
    /// `f(args, kwargs)` becomes the sole positional value.
    Call(CallFn),
    /// `f(matched_text)` becomes the sole positional value.
    Capture(CaptureFn),
    /// A fixed value, ignoring the rule's emissions.
    Constant(Value),
    /// `f(list_of_args, kwargs)` becomes the sole positional value.
    Pack(PackFn),
    /// Like `Pack`, but `args[0::2]` zipped with `args[1::2]`.
    Pair(PairFn),
    /// `f(args joined by sep, kwargs)`; every arg must be a string.
    Join(JoinFn, String),
    /// Select the i-th positional value.
    Getter(usize),
    /// Reduce the positional values and store them under a name.
    ///
    /// The kind is filled in when a bind expression is compiled; a `None`
    /// kind reduces to the first value (or none, when there are none).
    Bind { name: String, kind: Option<ValueKind> },
    /// Drop the emissions entirely: the compiled form of discard
    /// expressions and successful lookahead.
    Discard,
    /// Raise a parse error at the rule's position.
    Fail(String),
    /// Emit a warning and pass everything through unchanged.
    Warn(String),
}

impl Action {
    pub fn call(
        f: impl Fn(Vec<Value>, &[(String, Value)]) -> Result<Value, ActionError> + Send + Sync + 'static,
    ) -> Self {
        Self::Call(Arc::new(f))
    }

    pub fn capture(f: impl Fn(&str) -> Result<Value, ActionError> + Send + Sync + 'static) -> Self {
        Self::Capture(Arc::new(f))
    }

    /// A capture action that emits the matched text unchanged.
    #[must_use]
    pub fn capture_text() -> Self {
        Self::capture(|text| Ok(Value::Str(text.to_owned())))
    }

    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    pub fn pack(
        f: impl Fn(Value, &[(String, Value)]) -> Result<Value, ActionError> + Send + Sync + 'static,
    ) -> Self {
        Self::Pack(Arc::new(f))
    }

    /// A pack action that emits the packed list itself.
    #[must_use]
    pub fn pack_list() -> Self {
        Self::pack(|items, _| Ok(items))
    }

    pub fn pair(
        f: impl Fn(Vec<(Value, Value)>, &[(String, Value)]) -> Result<Value, ActionError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self::Pair(Arc::new(f))
    }

    /// A pair action that builds a map from string keys to values.
    #[must_use]
    pub fn pair_map() -> Self {
        Self::pair(|pairs, _| {
            let mut map = indexmap::IndexMap::new();
            for (key, value) in pairs {
                match key {
                    Value::Str(key) => {
                        map.insert(key, value);
                    }
                    other => {
                        return Err(ActionError::new(format!("map key must be a string, got {other}")));
                    }
                }
            }
            Ok(Value::Map(map))
        })
    }

    pub fn join(
        f: impl Fn(&str, &[(String, Value)]) -> Result<Value, ActionError> + Send + Sync + 'static,
        sep: impl Into<String>,
    ) -> Self {
        Self::Join(Arc::new(f), sep.into())
    }

    #[must_use]
    pub fn getter(index: usize) -> Self {
        Self::Getter(index)
    }

    #[must_use]
    pub fn bind(name: impl Into<String>) -> Self {
        Self::Bind {
            name: name.into(),
            kind: None,
        }
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    #[must_use]
    pub fn warn(message: impl Into<String>) -> Self {
        Self::Warn(message.into())
    }

    /// Applies the action to a rule's contribution.
    ///
    /// `args` and `kwargs` are the slices the rule's body emitted; the
    /// returned values replace them.
    pub(crate) fn apply(
        &self,
        input: &str,
        start: usize,
        end: usize,
        args: Vec<Value>,
        kwargs: Bindings,
    ) -> Result<ActionOutput, ParseError> {
        let positioned = |e: ActionError| ParseError::from_pos(start, input, e.message);
        match self {
            Self::Call(f) => {
                let value = f(args, &kwargs).map_err(positioned)?;
                Ok((smallvec![value], Bindings::new()))
            }
            Self::Capture(f) => {
                let value = f(&input[start..end]).map_err(positioned)?;
                Ok((smallvec![value], Bindings::new()))
            }
            Self::Constant(value) => Ok((smallvec![value.clone()], Bindings::new())),
            Self::Pack(f) => {
                let value = f(Value::List(args), &kwargs).map_err(positioned)?;
                Ok((smallvec![value], Bindings::new()))
            }
            Self::Pair(f) => {
                let mut pairs = Vec::with_capacity(args.len() / 2);
                let mut iter = args.into_iter();
                while let (Some(a), Some(b)) = (iter.next(), iter.next()) {
                    pairs.push((a, b));
                }
                let value = f(pairs, &kwargs).map_err(positioned)?;
                Ok((smallvec![value], Bindings::new()))
            }
            Self::Join(f, sep) => {
                let mut joined = String::new();
                for (i, arg) in args.iter().enumerate() {
                    let Value::Str(s) = arg else {
                        return Err(positioned(ActionError::new(format!(
                            "join requires string values, got {arg}"
                        ))));
                    };
                    if i > 0 {
                        joined.push_str(sep);
                    }
                    joined.push_str(s);
                }
                let value = f(&joined, &kwargs).map_err(positioned)?;
                Ok((smallvec![value], Bindings::new()))
            }
            Self::Getter(index) => {
                let len = args.len();
                let value = args.into_iter().nth(*index).ok_or_else(|| {
                    positioned(ActionError::new(format!(
                        "no value at index {index} (rule emitted {len})"
                    )))
                })?;
                Ok((smallvec![value], Bindings::new()))
            }
            Self::Bind { name, kind } => {
                let reduced = reduce(args, *kind);
                let mut kwargs = kwargs;
                kwargs.push((name.clone(), reduced));
                Ok((SmallVec::new(), kwargs))
            }
            Self::Discard => Ok((SmallVec::new(), Bindings::new())),
            Self::Fail(message) => Err(ParseError::from_pos(start, input, message.clone())),
            Self::Warn(message) => {
                tracing::warn!("{message}");
                Ok((SmallVec::from_vec(args), kwargs))
            }
        }
    }
}

/// Reduces a rule body's positional values to the bound value.
pub(crate) fn reduce(mut args: Vec<Value>, kind: Option<ValueKind>) -> Value {
    match kind {
        Some(ValueKind::Empty) => Value::None,
        Some(ValueKind::Atomic) => args.drain(..).next().unwrap_or(Value::None),
        Some(ValueKind::Iterable) => Value::List(args),
        None => args.drain(..).next().unwrap_or(Value::None),
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(_) => f.write_str("Call(..)"),
            Self::Capture(_) => f.write_str("Capture(..)"),
            Self::Constant(value) => write!(f, "Constant({value})"),
            Self::Pack(_) => f.write_str("Pack(..)"),
            Self::Pair(_) => f.write_str("Pair(..)"),
            Self::Join(_, sep) => write!(f, "Join(.., {sep:?})"),
            Self::Getter(index) => write!(f, "Getter({index})"),
            Self::Bind { name, kind } => write!(f, "Bind({name:?}, {kind:?})"),
            Self::Discard => f.write_str("Discard"),
            Self::Fail(message) => write!(f, "Fail({message:?})"),
            Self::Warn(message) => write!(f, "Warn({message:?})"),
        }
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Call(a), Self::Call(b)) => Arc::ptr_eq(a, b),
            (Self::Capture(a), Self::Capture(b)) => Arc::ptr_eq(a, b),
            (Self::Constant(a), Self::Constant(b)) => a == b,
            (Self::Pack(a), Self::Pack(b)) => Arc::ptr_eq(a, b),
            (Self::Pair(a), Self::Pair(b)) => Arc::ptr_eq(a, b),
            (Self::Join(a, asep), Self::Join(b, bsep)) => Arc::ptr_eq(a, b) && asep == bsep,
            (Self::Getter(a), Self::Getter(b)) => a == b,
            (
                Self::Bind { name: a, kind: ak },
                Self::Bind { name: b, kind: bk },
            ) => a == b && ak == bk,
            (Self::Discard, Self::Discard) => true,
            (Self::Fail(a), Self::Fail(b)) => a == b,
            (Self::Warn(a), Self::Warn(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(action: &Action, args: Vec<Value>) -> ActionOutput {
        action.apply("input", 0, 5, args, Bindings::new()).unwrap()
    }

    #[test]
    fn capture_receives_span_text() {
        let action = Action::capture_text();
        let (args, kwargs) = apply(&action, vec![]);
        assert_eq!(args.as_slice(), &[Value::Str("input".to_owned())]);
        assert!(kwargs.is_empty());
    }

    #[test]
    fn constant_ignores_emissions() {
        let action = Action::constant(true);
        let (args, _) = apply(&action, vec![Value::Int(3)]);
        assert_eq!(args.as_slice(), &[Value::Bool(true)]);
    }

    #[test]
    fn pack_wraps_args_in_list() {
        let action = Action::pack_list();
        let (args, _) = apply(&action, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            args.as_slice(),
            &[Value::List(vec![Value::Int(1), Value::Int(2)])]
        );
    }

    #[test]
    fn pair_zips_evens_with_odds() {
        let action = Action::pair_map();
        let (args, _) = apply(
            &action,
            vec![Value::Str("k".to_owned()), Value::Int(1)],
        );
        let Value::Map(map) = &args[0] else {
            panic!("expected a map");
        };
        assert_eq!(map.get("k"), Some(&Value::Int(1)));
    }

    #[test]
    fn join_concatenates_strings() {
        let action = Action::join(|s, _| Ok(Value::Str(s.to_owned())), ",");
        let (args, _) = apply(
            &action,
            vec![Value::Str("a".to_owned()), Value::Str("b".to_owned())],
        );
        assert_eq!(args.as_slice(), &[Value::Str("a,b".to_owned())]);
    }

    #[test]
    fn join_rejects_non_strings() {
        let action = Action::join(|s, _| Ok(Value::Str(s.to_owned())), ",");
        let err = action
            .apply("input", 0, 5, vec![Value::Int(1)], Bindings::new())
            .unwrap_err();
        assert!(err.message.unwrap().contains("join requires string values"));
    }

    #[test]
    fn getter_selects_by_index() {
        let action = Action::getter(1);
        let (args, _) = apply(&action, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(args.as_slice(), &[Value::Int(2)]);
    }

    #[test]
    fn bind_moves_value_to_named_map() {
        let action = Action::Bind {
            name: "x".to_owned(),
            kind: Some(ValueKind::Atomic),
        };
        let (args, kwargs) = apply(&action, vec![Value::Int(7)]);
        assert!(args.is_empty());
        assert_eq!(kwargs, vec![("x".to_owned(), Value::Int(7))]);
    }

    #[test]
    fn bind_reduces_iterable_to_list() {
        let action = Action::Bind {
            name: "x".to_owned(),
            kind: Some(ValueKind::Iterable),
        };
        let (_, kwargs) = apply(&action, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            kwargs[0].1,
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn fail_positions_the_error() {
        let action = Action::fail("bad things");
        let err = action
            .apply("line one", 5, 8, vec![], Bindings::new())
            .unwrap_err();
        assert_eq!(err.offset, Some(5));
        assert_eq!(err.message.as_deref(), Some("bad things"));
    }

    #[test]
    fn equality_is_identity_for_closures() {
        let a = Action::capture_text();
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Action::capture_text());
    }
}
