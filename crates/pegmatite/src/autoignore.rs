//! The auto-ignore rewrite.
//!
//! Definitions written with `Name < Body` are wrapped in an
//! [`Expr::AutoIgnore`] marker. Before a grammar reaches a runtime, this
//! rewrite replaces each marker by its body with the grammar's ignore
//! pattern (typically whitespace) interleaved around every item of the
//! body's sequence. Markers nested under another marker are dropped: the
//! outer ignore pattern applies once and does not compound. With no ignore
//! pattern the markers are simply removed.

use indexmap::IndexMap;

use crate::errors::GrammarError;
use crate::expr::Expr;
use crate::grammar::Grammar;
use crate::op;

/// Rewrites every auto-ignore marker in a finalized grammar.
pub(crate) fn autoignore(grammar: &Grammar, ignore: Option<&Expr>) -> Result<Grammar, GrammarError> {
    let definitions: IndexMap<String, Expr> = grammar
        .definitions()
        .iter()
        .map(|(name, defn)| (name.clone(), rewrite(defn, ignore, false)))
        .collect();
    Grammar::finalized_parts(definitions, grammar.actions().clone(), grammar.start().to_owned())
}

fn rewrite(e: &Expr, ignore: Option<&Expr>, inside: bool) -> Expr {
    match e {
        Expr::AutoIgnore(inner) => {
            let body = rewrite(inner, ignore, true);
            let Some(ignore) = ignore else {
                return body;
            };
            if inside {
                return body;
            }
            let mut items = vec![ignore.clone()];
            match body {
                Expr::Sequence(children) => {
                    for child in children {
                        items.push(child);
                        items.push(ignore.clone());
                    }
                }
                other => {
                    items.push(other);
                    items.push(ignore.clone());
                }
            }
            op::sequence(items)
        }
        Expr::Dot
        | Expr::Literal(_)
        | Expr::Class(_)
        | Expr::Regex(_)
        | Expr::Nonterminal(_) => e.clone(),
        Expr::Optional(inner) => op::optional(rewrite(inner, ignore, inside)),
        Expr::Star(inner) => op::star(rewrite(inner, ignore, inside)),
        Expr::Plus(inner) => op::plus(rewrite(inner, ignore, inside)),
        Expr::And(inner) => op::and(rewrite(inner, ignore, inside)),
        Expr::Not(inner) => op::not(rewrite(inner, ignore, inside)),
        Expr::Capture(inner) => op::capture(rewrite(inner, ignore, inside)),
        Expr::Discard(inner) => op::discard(rewrite(inner, ignore, inside)),
        Expr::Bind { expr, name } => op::bind(rewrite(expr, ignore, inside), name.clone()),
        Expr::Sequence(items) => {
            op::sequence(items.iter().map(|item| rewrite(item, ignore, inside)))
        }
        Expr::Choice(items) => {
            op::choice(items.iter().map(|item| rewrite(item, ignore, inside)))
        }
        Expr::Rule { expr, action, name } => {
            op::rule_named(rewrite(expr, ignore, inside), action.clone(), name.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{auto_ignore, capture, literal, sequence, star};

    fn ws() -> Expr {
        star(crate::op::class(" \t"))
    }

    fn applied(defn: Expr) -> Expr {
        let mut g = Grammar::with_start("A");
        g.define("A", defn).unwrap();
        g.finalize().unwrap();
        let ignore = ws();
        autoignore(&g, Some(&ignore))
            .unwrap()
            .get("A")
            .unwrap()
            .clone()
    }

    #[test]
    fn wraps_non_sequences() {
        assert_eq!(
            applied(auto_ignore(literal("a"))),
            sequence([ws(), literal("a"), ws()])
        );
    }

    #[test]
    fn interleaves_sequence_items() {
        assert_eq!(
            applied(auto_ignore(sequence([literal("a"), literal("b")]))),
            sequence([ws(), literal("a"), ws(), literal("b"), ws()])
        );
    }

    #[test]
    fn nested_markers_do_not_compound() {
        assert_eq!(
            applied(auto_ignore(auto_ignore(literal("a")))),
            sequence([ws(), literal("a"), ws()])
        );
        assert_eq!(
            applied(auto_ignore(sequence([
                literal("a"),
                auto_ignore(literal("b")),
            ]))),
            sequence([ws(), literal("a"), ws(), literal("b"), ws()])
        );
    }

    #[test]
    fn no_ignore_pattern_drops_the_marker() {
        let mut g = Grammar::with_start("A");
        g.define("A", auto_ignore(capture(literal("a")))).unwrap();
        g.finalize().unwrap();
        let rewritten = autoignore(&g, None).unwrap();
        assert_eq!(rewritten.get("A").unwrap(), &capture(literal("a")));
    }
}
