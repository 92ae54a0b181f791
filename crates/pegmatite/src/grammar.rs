//! Grammars: named definitions, actions, and finalization.
//!
//! A [`Grammar`] is an ordered map of definitions plus a map of actions and
//! a start name. Construction is free-form; [`Grammar::finalize`] is the
//! one-shot step that attaches actions as outermost rules, checks that every
//! nonterminal resolves, and runs the value-kind fixed point. A finalized
//! grammar is immutable.

use std::fmt;

use indexmap::IndexMap;

use crate::actions::Action;
use crate::errors::GrammarError;
use crate::expr::{Expr, ValueKind};
use crate::op;

/// Actions keyed by definition name.
pub type Actions = IndexMap<String, Action>;

/// The default start name.
pub const DEFAULT_START: &str = "Start";

/// A parsing expression grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct Grammar {
    definitions: IndexMap<String, Expr>,
    actions: Actions,
    start: String,
    finalized: bool,
    kinds: IndexMap<String, ValueKind>,
}

impl Grammar {
    /// An empty grammar starting at [`DEFAULT_START`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_start(DEFAULT_START)
    }

    #[must_use]
    pub fn with_start(start: impl Into<String>) -> Self {
        Self {
            definitions: IndexMap::new(),
            actions: Actions::new(),
            start: start.into(),
            finalized: false,
            kinds: IndexMap::new(),
        }
    }

    /// Builds a grammar from parsed or hand-assembled parts.
    #[must_use]
    pub fn from_parts(
        definitions: IndexMap<String, Expr>,
        actions: Actions,
        start: impl Into<String>,
    ) -> Self {
        Self {
            definitions,
            actions,
            start: start.into(),
            finalized: false,
            kinds: IndexMap::new(),
        }
    }

    /// Rebuilds a finalized grammar from rewritten definitions.
    ///
    /// Used by the optimizer and the auto-ignore rewrite: actions are
    /// already embedded in the definitions as rules, so this only
    /// re-validates references and recomputes value kinds.
    pub(crate) fn finalized_parts(
        definitions: IndexMap<String, Expr>,
        actions: Actions,
        start: String,
    ) -> Result<Self, GrammarError> {
        validate_symbols(&definitions)?;
        let kinds = resolve_kinds(&definitions);
        Ok(Self {
            definitions,
            actions,
            start,
            finalized: true,
            kinds,
        })
    }

    /// Adds or replaces a definition.
    pub fn define(&mut self, name: impl Into<String>, expr: Expr) -> Result<(), GrammarError> {
        if self.finalized {
            return Err(GrammarError::Finalized);
        }
        self.definitions.insert(name.into(), expr);
        Ok(())
    }

    /// Attaches an action to a named definition.
    pub fn set_action(&mut self, name: impl Into<String>, action: Action) -> Result<(), GrammarError> {
        if self.finalized {
            return Err(GrammarError::Finalized);
        }
        self.actions.insert(name.into(), action);
        Ok(())
    }

    pub fn set_start(&mut self, start: impl Into<String>) -> Result<(), GrammarError> {
        if self.finalized {
            return Err(GrammarError::Finalized);
        }
        self.start = start.into();
        Ok(())
    }

    #[must_use]
    pub fn start(&self) -> &str {
        &self.start
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.definitions.get(name)
    }

    #[must_use]
    pub fn definitions(&self) -> &IndexMap<String, Expr> {
        &self.definitions
    }

    #[must_use]
    pub fn actions(&self) -> &Actions {
        &self.actions
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// The position of a definition in the ordered map; stable after
    /// finalization, used as a memoization key.
    pub(crate) fn definition_index(&self, name: &str) -> Option<usize> {
        self.definitions.get_index_of(name)
    }

    /// Finalizes the grammar: attaches actions as outermost rules, resolves
    /// every nonterminal reference, and computes value kinds.
    pub fn finalize(&mut self) -> Result<(), GrammarError> {
        if self.finalized {
            return Err(GrammarError::AlreadyFinalized);
        }
        if self.definitions.is_empty() {
            return Err(GrammarError::EmptyGrammar);
        }

        let actions = self.actions.clone();
        for (name, action) in &actions {
            match self.definitions.get_mut(name) {
                Some(slot) => {
                    let current = std::mem::replace(slot, Expr::Dot);
                    // replace a pre-existing rule wrapper rather than stacking
                    let body = match current {
                        Expr::Rule { expr, .. } => *expr,
                        other => other,
                    };
                    *slot = op::rule_named(body, Some(action.clone()), name.clone());
                }
                None => tracing::warn!("action attached to unknown definition: {name}"),
            }
        }

        if !self.definitions.contains_key(&self.start) {
            return Err(GrammarError::UndefinedNonterminal(self.start.clone()));
        }
        validate_symbols(&self.definitions)?;
        self.kinds = resolve_kinds(&self.definitions);
        self.finalized = true;
        Ok(())
    }

    /// The value kind of a named definition. Meaningful after finalization.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> ValueKind {
        self.kinds.get(name).copied().unwrap_or(ValueKind::Empty)
    }

    /// The value kind of the start definition.
    #[must_use]
    pub fn start_kind(&self) -> ValueKind {
        self.kind_of(&self.start)
    }

    /// The value kind of an arbitrary expression over this grammar's
    /// definitions. Meaningful after finalization.
    pub(crate) fn value_kind(&self, e: &Expr) -> ValueKind {
        expr_kind(e, &|name| self.kind_of(name))
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .definitions
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0);
        for (i, (name, defn)) in self.definitions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            // unwrap finalization wrappers for display
            let mut body = defn;
            if let Expr::Rule { expr, .. } = body {
                body = expr.as_ref();
            }
            let (arrow, body) = match body {
                Expr::AutoIgnore(inner) => ("< ", inner.as_ref()),
                other => ("<-", other),
            };
            let rendered = body
                .to_grammar_string()
                .unwrap_or_else(|_| format!("{body:?}"));
            write!(f, "{name:width$} {arrow} {rendered}")?;
        }
        Ok(())
    }
}

// ===========================================================================
// Reference validation and value-kind resolution
// ===========================================================================

fn validate_symbols(definitions: &IndexMap<String, Expr>) -> Result<(), GrammarError> {
    let mut missing: Option<String> = None;
    for defn in definitions.values() {
        defn.walk(&mut |e| {
            if missing.is_none()
                && let Expr::Nonterminal(name) = e
                && !definitions.contains_key(name)
            {
                missing = Some(name.clone());
            }
        });
        if let Some(name) = missing.take() {
            return Err(GrammarError::UndefinedNonterminal(name));
        }
    }
    Ok(())
}

/// Fixed-point resolution of definition kinds.
///
/// Every definition starts as empty and is recomputed until nothing
/// changes. `expr_kind` only moves kinds upward (empty → atomic →
/// iterable), so the iteration reaches the least fixed point; reference
/// cycles with no value-producing node in between stay empty.
fn resolve_kinds(definitions: &IndexMap<String, Expr>) -> IndexMap<String, ValueKind> {
    let mut kinds: IndexMap<String, ValueKind> = definitions
        .keys()
        .map(|k| (k.clone(), ValueKind::Empty))
        .collect();
    // bounded so degenerate reference cycles cannot loop forever
    for _ in 0..definitions.len() * 4 + 8 {
        let mut changed = false;
        for (name, expr) in definitions {
            let kind = expr_kind(expr, &|n| {
                kinds.get(n).copied().unwrap_or(ValueKind::Empty)
            });
            if kinds.get(name) != Some(&kind) {
                kinds.insert(name.clone(), kind);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    kinds
}

/// Computes an expression's value kind under the given definition kinds.
fn expr_kind(e: &Expr, lookup: &impl Fn(&str) -> ValueKind) -> ValueKind {
    match e {
        Expr::Dot
        | Expr::Literal(_)
        | Expr::Class(_)
        | Expr::Regex(_)
        | Expr::Optional(_)
        | Expr::Star(_)
        | Expr::Plus(_)
        | Expr::And(_)
        | Expr::Not(_)
        | Expr::Discard(_)
        | Expr::AutoIgnore(_)
        | Expr::Bind { .. } => ValueKind::Empty,
        Expr::Capture(_) => ValueKind::Atomic,
        Expr::Rule { action: Some(_), .. } => ValueKind::Atomic,
        Expr::Rule {
            action: None, expr, ..
        } => expr_kind(expr, lookup),
        Expr::Nonterminal(name) => lookup(name),
        Expr::Sequence(items) => {
            let producers: Vec<ValueKind> = items
                .iter()
                .map(|item| expr_kind(item, lookup))
                .filter(|k| *k != ValueKind::Empty)
                .collect();
            match producers.as_slice() {
                [] => ValueKind::Empty,
                [ValueKind::Atomic] => ValueKind::Atomic,
                _ => ValueKind::Iterable,
            }
        }
        Expr::Choice(items) => {
            let kinds: Vec<ValueKind> =
                items.iter().map(|item| expr_kind(item, lookup)).collect();
            if kinds.iter().all(|k| *k == ValueKind::Empty) {
                ValueKind::Empty
            } else if kinds.iter().all(|k| *k == ValueKind::Atomic) {
                ValueKind::Atomic
            } else {
                ValueKind::Iterable
            }
        }
    }
}
