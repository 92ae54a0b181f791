//! Grammar optimization passes.
//!
//! Three semantics-preserving rewrites, composed in the order
//! inline → merge → regex. Each pass is idempotent and preserves actions.
//!
//! - **Inline** replaces a nonterminal reference by a copy of its
//!   definition whenever the expansion does not reach the reference
//!   recursively.
//! - **Merge** coalesces adjacent literals inside sequences and adjacent
//!   single-character alternatives inside choices.
//! - **Regex** promotes terminals to regular expressions and fuses them
//!   upward through quantifiers, lookahead, and unstructured sequences.
//!   Possessive repetition and alternation are wrapped in an atomic
//!   construct (a lookahead group plus a backreference) so regex
//!   backtracking cannot diverge from possessive PEG semantics.

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::errors::GrammarError;
use crate::expr::{ClassRanges, Expr, RegexFlags, ValueKind};
use crate::grammar::Grammar;
use crate::op;

/// Applies the selected passes to a finalized grammar.
pub(crate) fn optimize(
    grammar: &Grammar,
    inline: bool,
    merge: bool,
    regex: bool,
) -> Result<Grammar, GrammarError> {
    let mut definitions = grammar.definitions().clone();

    if inline {
        tracing::debug!("inlining non-recursive rules");
        definitions = inline_all(&definitions);
    }

    if merge {
        tracing::debug!("merging adjacent terminals");
        definitions = definitions
            .into_iter()
            .map(|(name, defn)| {
                let merged = merge_expr(&defn);
                (name, merged)
            })
            .collect();
    }

    if regex {
        tracing::debug!("lifting terminals into regular expressions");
        let mut lift = Lift { group: 0 };
        definitions = definitions
            .into_iter()
            .map(|(name, defn)| {
                let structured = grammar.kind_of(&name) != ValueKind::Empty;
                let lifted = lift.lift(&defn, structured);
                (name, lifted)
            })
            .collect();
    }

    Grammar::finalized_parts(definitions, grammar.actions().clone(), grammar.start().to_owned())
}

// ===========================================================================
// Inlining
// ===========================================================================

fn inline_all(definitions: &IndexMap<String, Expr>) -> IndexMap<String, Expr> {
    definitions
        .iter()
        .map(|(name, defn)| {
            let mut visited = AHashSet::new();
            visited.insert(name.clone());
            (name.clone(), inline_expr(definitions, defn, &visited))
        })
        .collect()
}

fn inline_expr(
    definitions: &IndexMap<String, Expr>,
    e: &Expr,
    visited: &AHashSet<String>,
) -> Expr {
    match e {
        Expr::Nonterminal(name) => {
            if visited.contains(name) {
                // recursive reference, keep the call
                return e.clone();
            }
            match definitions.get(name) {
                Some(defn) => {
                    let mut visited = visited.clone();
                    visited.insert(name.clone());
                    inline_expr(definitions, defn, &visited)
                }
                None => e.clone(),
            }
        }
        Expr::Dot | Expr::Literal(_) | Expr::Class(_) | Expr::Regex(_) => e.clone(),
        Expr::Optional(inner) => op::optional(inline_expr(definitions, inner, visited)),
        Expr::Star(inner) => op::star(inline_expr(definitions, inner, visited)),
        Expr::Plus(inner) => op::plus(inline_expr(definitions, inner, visited)),
        Expr::And(inner) => op::and(inline_expr(definitions, inner, visited)),
        Expr::Not(inner) => op::not(inline_expr(definitions, inner, visited)),
        Expr::Capture(inner) => op::capture(inline_expr(definitions, inner, visited)),
        Expr::Discard(inner) => op::discard(inline_expr(definitions, inner, visited)),
        Expr::AutoIgnore(inner) => op::auto_ignore(inline_expr(definitions, inner, visited)),
        Expr::Bind { expr, name } => {
            op::bind(inline_expr(definitions, expr, visited), name.clone())
        }
        Expr::Sequence(items) => op::sequence(
            items
                .iter()
                .map(|item| inline_expr(definitions, item, visited)),
        ),
        Expr::Choice(items) => op::choice(
            items
                .iter()
                .map(|item| inline_expr(definitions, item, visited)),
        ),
        Expr::Rule { expr, action, name } => op::rule_named(
            inline_expr(definitions, expr, visited),
            action.clone(),
            name.clone(),
        ),
    }
}

// ===========================================================================
// Terminal merging
// ===========================================================================

fn merge_expr(e: &Expr) -> Expr {
    match e {
        Expr::Sequence(items) => {
            let mut out: Vec<Expr> = Vec::with_capacity(items.len());
            for item in items {
                let item = merge_expr(item);
                if let (Some(prev), Some(cur)) =
                    (out.last().and_then(seq_text), seq_text(&item))
                {
                    let joined = format!("{prev}{cur}");
                    *out.last_mut().expect("checked non-empty") = op::literal(joined);
                } else {
                    out.push(item);
                }
            }
            op::sequence(out)
        }
        Expr::Choice(items) => {
            let mut out: Vec<Expr> = Vec::with_capacity(items.len());
            for item in items {
                let item = merge_expr(item);
                if let (Some(prev), Some(cur)) =
                    (out.last().and_then(chc_ranges), chc_ranges(&item))
                {
                    let mut ranges = prev;
                    ranges.extend(cur);
                    *out.last_mut().expect("checked non-empty") = op::class_ranges(ranges, false);
                } else {
                    out.push(item);
                }
            }
            op::choice(out)
        }
        Expr::Dot
        | Expr::Literal(_)
        | Expr::Class(_)
        | Expr::Regex(_)
        | Expr::Nonterminal(_) => e.clone(),
        Expr::Optional(inner) => op::optional(merge_expr(inner)),
        Expr::Star(inner) => op::star(merge_expr(inner)),
        Expr::Plus(inner) => op::plus(merge_expr(inner)),
        Expr::And(inner) => op::and(merge_expr(inner)),
        Expr::Not(inner) => op::not(merge_expr(inner)),
        Expr::Capture(inner) => op::capture(merge_expr(inner)),
        Expr::Discard(inner) => op::discard(merge_expr(inner)),
        Expr::AutoIgnore(inner) => op::auto_ignore(merge_expr(inner)),
        Expr::Bind { expr, name } => op::bind(merge_expr(expr), name.clone()),
        Expr::Rule { expr, action, name } => {
            op::rule_named(merge_expr(expr), action.clone(), name.clone())
        }
    }
}

/// Text a sequence item contributes to a merged literal.
fn seq_text(e: &Expr) -> Option<String> {
    match e {
        Expr::Literal(s) => Some(s.clone()),
        Expr::Class(c) => c.single_char().map(|c| c.to_string()),
        _ => None,
    }
}

/// Ranges a choice alternative contributes to a merged class.
fn chc_ranges(e: &Expr) -> Option<Vec<(char, Option<char>)>> {
    match e {
        Expr::Class(c) if !c.negate => Some(c.ranges.clone()),
        Expr::Literal(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(vec![(c, None)]),
                _ => None,
            }
        }
        _ => None,
    }
}

// ===========================================================================
// Regex lifting
// ===========================================================================

struct Lift {
    group: usize,
}

impl Lift {
    fn next_group(&mut self) -> String {
        self.group += 1;
        format!("_{}", self.group)
    }

    /// Wraps `body` in an atomic construct: once the lookahead has
    /// committed to a match, the backreference consumes exactly that text.
    fn atomic(&mut self, body: &str) -> String {
        let group = self.next_group();
        format!("(?=(?P<{group}>{body}))\\k<{group}>")
    }

    /// `structured` is false inside captures and discards, where positional
    /// values cannot escape and adjacent regexes may fuse freely.
    fn lift(&mut self, e: &Expr, structured: bool) -> Expr {
        match e {
            // (?s:.) so the lifted dot still matches newlines
            Expr::Dot => op::regex("(?s:.)"),
            Expr::Literal(s) => op::regex(regex::escape(s)),
            Expr::Class(c) if !c.ranges.is_empty() => {
                if c.negate {
                    op::regex(format!("[^{}]", c.regex_body()))
                } else {
                    op::regex(format!("[{}]", c.regex_body()))
                }
            }
            Expr::Class(_) | Expr::Regex(_) | Expr::Nonterminal(_) | Expr::AutoIgnore(_) => {
                e.clone()
            }
            Expr::Sequence(items) => {
                let lifted = self.lift_seq_items(items, structured);
                op::sequence(join_runs(lifted, structured))
            }
            Expr::Choice(items) => {
                let lifted: Vec<Expr> =
                    items.iter().map(|item| self.lift(item, structured)).collect();
                op::choice(self.coalesce_alternatives(lifted))
            }
            Expr::Optional(inner) => match self.lift(inner, structured) {
                Expr::Regex(r) if r.flags() == RegexFlags::NONE => {
                    op::regex(format!("(?:{})?", r.pattern()))
                }
                other => op::optional(other),
            },
            Expr::Star(inner) => match self.lift(inner, structured) {
                Expr::Regex(r) if r.flags() == RegexFlags::NONE => {
                    let body = format!("(?:{})*", r.pattern());
                    op::regex(self.atomic(&body))
                }
                other => op::star(other),
            },
            Expr::Plus(inner) => match self.lift(inner, structured) {
                Expr::Regex(r) if r.flags() == RegexFlags::NONE => {
                    let body = format!("(?:{})+", r.pattern());
                    op::regex(self.atomic(&body))
                }
                other => op::plus(other),
            },
            Expr::And(inner) => match self.lift(inner, structured) {
                Expr::Regex(r) if r.flags() == RegexFlags::NONE => {
                    op::regex(format!("(?={})", r.pattern()))
                }
                other => op::and(other),
            },
            Expr::Not(inner) => match self.lift(inner, structured) {
                Expr::Regex(r) if r.flags() == RegexFlags::NONE => {
                    op::regex(format!("(?!{})", r.pattern()))
                }
                other => op::not(other),
            },
            Expr::Capture(inner) => op::capture(self.lift(inner, false)),
            Expr::Discard(inner) => op::discard(self.lift(inner, false)),
            Expr::Bind { expr, name } => op::bind(self.lift(expr, structured), name.clone()),
            Expr::Rule { expr, action, name } => {
                op::rule_named(self.lift(expr, structured), action.clone(), name.clone())
            }
        }
    }

    /// Lifts the items of a sequence, rewriting the common `!x .` idiom
    /// into a single negated class when x is a class or one-character
    /// literal.
    fn lift_seq_items(&mut self, items: &[Expr], structured: bool) -> Vec<Expr> {
        let mut out = Vec::with_capacity(items.len());
        let mut i = 0;
        while i < items.len() {
            if matches!(items.get(i + 1), Some(Expr::Dot))
                && let Expr::Not(x) = &items[i]
                && let Some(body) = negated_class_body(x)
            {
                out.push(op::regex(format!("[^{body}]")));
                i += 2;
                continue;
            }
            out.push(self.lift(&items[i], structured));
            i += 1;
        }
        out
    }

    /// Coalesces adjacent regex alternatives into one atomic alternation.
    fn coalesce_alternatives(&mut self, items: Vec<Expr>) -> Vec<Expr> {
        let mut out: Vec<Expr> = Vec::with_capacity(items.len());
        let mut run: Vec<String> = Vec::new();
        let flush = |run: &mut Vec<String>, lift: &mut Self, out: &mut Vec<Expr>| {
            match run.len() {
                0 => {}
                1 => out.push(op::regex(run.remove(0))),
                _ => {
                    let alternation = run.join("|");
                    out.push(op::regex(lift.atomic(&alternation)));
                    run.clear();
                }
            }
        };
        for item in items {
            match item {
                Expr::Regex(r) if r.flags() == RegexFlags::NONE => {
                    run.push(r.pattern().to_owned());
                }
                other => {
                    flush(&mut run, self, &mut out);
                    out.push(other);
                }
            }
        }
        flush(&mut run, self, &mut out);
        out
    }
}

/// The class body for `!x .` when x is a class or one-character literal.
fn negated_class_body(x: &Expr) -> Option<String> {
    match x {
        Expr::Class(c) if !c.negate && !c.ranges.is_empty() => Some(c.regex_body()),
        Expr::Literal(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(ClassRanges::new(vec![(c, None)], false).regex_body()),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Joins adjacent regex items of a sequence when positional structure does
/// not have to be preserved, and fuses runs of discarded items under their
/// discard wrappers.
fn join_runs(items: Vec<Expr>, structured: bool) -> Vec<Expr> {
    let mut out: Vec<Expr> = Vec::with_capacity(items.len());
    let mut iter = items.into_iter().peekable();
    while let Some(item) = iter.next() {
        match item {
            Expr::Regex(r) if !structured && r.flags() == RegexFlags::NONE => {
                let mut pattern = r.pattern().to_owned();
                while let Some(Expr::Regex(next)) = iter.peek() {
                    if next.flags() != RegexFlags::NONE {
                        break;
                    }
                    pattern.push_str(next.pattern());
                    iter.next();
                }
                if pattern == r.pattern() {
                    out.push(Expr::Regex(r));
                } else {
                    out.push(op::regex(pattern));
                }
            }
            Expr::Discard(first) => {
                let mut children = vec![*first];
                while let Some(Expr::Discard(_)) = iter.peek() {
                    let Some(Expr::Discard(next)) = iter.next() else {
                        break;
                    };
                    children.push(*next);
                }
                out.extend(join_runs(children, false).into_iter().map(op::discard));
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{
        capture, choice, class, class_ranges, literal, nonterminal, regex, sequence, star,
    };
    use crate::parse::loads;

    fn grammar_of(source: &str) -> Grammar {
        let (start, defs) = loads(source).unwrap();
        let mut g = Grammar::from_parts(defs, crate::Actions::new(), start);
        g.finalize().unwrap();
        g
    }

    fn iload(source: &str) -> Grammar {
        optimize(&grammar_of(source), true, false, false).unwrap()
    }

    fn mload(source: &str) -> Grammar {
        optimize(&grammar_of(source), false, true, false).unwrap()
    }

    fn rload(source: &str) -> Grammar {
        optimize(&grammar_of(source), false, false, true).unwrap()
    }

    fn defs_eq(a: &Grammar, b: &Grammar) {
        assert_eq!(a.definitions(), b.definitions());
    }

    #[test]
    fn inline_simple_references() {
        defs_eq(&iload("A <- \"a\""), &grammar_of("A <- \"a\""));
        defs_eq(
            &iload("A <- B  B <- \"a\""),
            &grammar_of("A <- \"a\" B <- \"a\""),
        );
        defs_eq(
            &iload("A <- B  B <- C  C <- \"a\""),
            &grammar_of("A <- \"a\"  B <- \"a\"  C <- \"a\""),
        );
    }

    #[test]
    fn inline_preserves_recursion() {
        defs_eq(&iload("A <- \"a\" A"), &grammar_of("A <- \"a\" A"));
        defs_eq(
            &iload("A <- \"a\" B  B <- A"),
            &grammar_of("A <- \"a\" A  B <- \"a\" B"),
        );
        defs_eq(
            &iload("A <- \"a\" B  B <- \"b\" A"),
            &grammar_of("A <- \"a\" \"b\" A  B <- \"b\" \"a\" B"),
        );
    }

    #[test]
    fn inline_carries_actions_along() {
        let (start, defs) = loads("A <- \"a\" B  B <- ~\"b\"").unwrap();
        let mut g = Grammar::from_parts(defs, crate::Actions::new(), start);
        g.set_action("B", crate::Action::constant(1i64)).unwrap();
        g.finalize().unwrap();
        let inlined = optimize(&g, true, false, false).unwrap();
        // the inlined copy of B keeps its rule wrapper so the action fires
        let Some(Expr::Sequence(items)) = inlined.get("A") else {
            panic!("expected a sequence for A, got {:?}", inlined.get("A"));
        };
        assert!(matches!(
            &items[1],
            Expr::Rule {
                action: Some(_),
                name,
                ..
            } if name == "B"
        ));
    }

    #[test]
    fn merge_sequence_literals() {
        defs_eq(&mload("A <- \"a\" \"b\""), &{
            let mut g = Grammar::with_start("A");
            g.define("A", literal("ab")).unwrap();
            g.finalize().unwrap();
            g
        });
        let merged = mload("A <- \"a\" [b] \"c\" [de]");
        assert_eq!(
            merged.get("A").unwrap(),
            &sequence([literal("abc"), class("de")])
        );
    }

    #[test]
    fn merge_choice_single_chars() {
        let merged = mload("A <- \"a\" / [b-c] / \"d\" / \"ef\"");
        assert_eq!(
            merged.get("A").unwrap(),
            &choice([
                class_ranges(
                    vec![('a', None), ('b', Some('c')), ('d', None)],
                    false
                ),
                literal("ef"),
            ])
        );
    }

    #[test]
    fn merge_stops_at_value_boundaries() {
        let merged = mload("A <- \"a\" ~\"b\" \"c\"");
        assert_eq!(
            merged.get("A").unwrap(),
            &sequence([literal("a"), capture(literal("b")), literal("c")])
        );
    }

    #[test]
    fn regex_lifts_terminals() {
        assert_eq!(rload("A <- \"a\"").get("A").unwrap(), &regex("a"));
        assert_eq!(
            rload("A <- \"a\" [bc]").get("A").unwrap(),
            &regex("a[bc]")
        );
        assert_eq!(
            rload("A <- ~(\"a\" [bc])").get("A").unwrap(),
            &capture(regex("a[bc]"))
        );
        assert_eq!(
            rload("A <- \"a\" B  B <- [bc]").get("A").unwrap(),
            &sequence([regex("a"), nonterminal("B")])
        );
    }

    #[test]
    fn regex_quantifiers_are_atomic() {
        assert_eq!(
            rload("A <- \"a\"* [bc]+").get("A").unwrap(),
            &regex("(?=(?P<_1>(?:a)*))\\k<_1>(?=(?P<_2>(?:[bc])+))\\k<_2>")
        );
    }

    #[test]
    fn regex_alternation_is_atomic() {
        assert_eq!(
            rload("A <- \"a\" ~([bc] / \"d\")*").get("A").unwrap(),
            &sequence([
                regex("a"),
                capture(regex(
                    "(?=(?P<_2>(?:(?=(?P<_1>[bc]|d))\\k<_1>)*))\\k<_2>"
                )),
            ])
        );
    }

    #[test]
    fn regex_not_dot_becomes_negated_class() {
        assert_eq!(rload("A <- !\"a\" .").get("A").unwrap(), &regex("[^a]"));
        assert_eq!(
            rload("A <- !\"\\\\\" .").get("A").unwrap(),
            &regex("[^\\\\]")
        );
        assert_eq!(
            rload("A <- ![\\\\] .").get("A").unwrap(),
            &regex("[^\\\\]")
        );
        assert_eq!(
            rload("A <- ![abc] .").get("A").unwrap(),
            &regex("[^abc]")
        );
        assert_eq!(
            rload("A <- (![abc] .)*").get("A").unwrap(),
            &regex("(?=(?P<_1>(?:[^abc])*))\\k<_1>")
        );
    }

    #[test]
    fn regex_respects_structured_sequences() {
        // a capture in the sequence keeps its siblings separate
        assert_eq!(
            rload("A <- \"a\" ~\"b\" \"c\"").get("A").unwrap(),
            &sequence([regex("a"), capture(regex("b")), regex("c")])
        );
    }

    #[test]
    fn discard_runs_fuse() {
        assert_eq!(
            rload("A <- ~(:\"a\" :\"b\")").get("A").unwrap(),
            &capture(crate::op::discard(regex("ab")))
        );
    }

    #[test]
    fn optimize_is_idempotent() {
        for source in [
            "A <- \"a\" [bc]",
            "A <- \"a\"* [bc]+",
            "A <- \"a\" ~([bc] / \"d\")*",
            "A <- !\"a\" . B  B <- \"b\" A",
            "A <- \"a\" / [b-c] / \"d\"",
        ] {
            let once = optimize(&grammar_of(source), true, true, true).unwrap();
            let twice = optimize(&once, true, true, true).unwrap();
            assert_eq!(once.definitions(), twice.definitions(), "source: {source}");
        }
    }

    #[test]
    fn lifted_patterns_compile() {
        let g = rload("A <- \"a\"* [bc]+ (!\"x\" .)*");
        g.get("A").unwrap().walk(&mut |e| {
            if let Expr::Regex(r) = e {
                assert!(r.compiled().is_ok(), "pattern failed: {}", r.pattern());
            }
        });
    }
}
