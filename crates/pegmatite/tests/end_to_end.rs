//! End-to-end behavior of both runtimes.
//!
//! Every scenario here must hold for the packrat evaluator and the parsing
//! machine alike, and most are additionally checked across optimizer flag
//! combinations: the optimizer must never change what a grammar matches or
//! the values it produces.

use indexmap::IndexMap;
use pegmatite::{
    Action, Actions, CompileOptions, Flags, Ignore, Parser, ParserKind, Value, compile, op,
};
use rstest::rstest;

const FLAG_SETS: [Flags; 5] = [
    Flags::NONE,
    Flags::INLINE,
    Flags::REGEX,
    Flags::OPTIMIZE,
    Flags::MERGE.union(Flags::OPTIMIZE),
];

fn build(source: &str, actions: Actions, kind: ParserKind, flags: Flags) -> Parser {
    compile(
        source,
        actions,
        CompileOptions::default().with_parser(kind).with_flags(flags),
    )
    .expect("grammar should compile")
}

type Observed = Option<(
    (usize, usize),
    Vec<Value>,
    IndexMap<String, Value>,
    Value,
)>;

fn observe(parser: &Parser, input: &str) -> Observed {
    parser
        .match_str(input)
        .expect("matching should not error")
        .map(|m| (m.span(), m.groups().to_vec(), m.groupdict(), m.value()))
}

// ---------------------------------------------------------------------------
// The core scenarios
// ---------------------------------------------------------------------------

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn signed_number_matches_without_values(#[case] kind: ParserKind) {
    for flags in FLAG_SETS {
        let parser = build("A <- \"-\"? [1-9] [0-9]*", Actions::new(), kind, flags);
        let m = parser.match_str("-123456").unwrap().expect("should match");
        assert_eq!(m.span(), (0, 7));
        assert!(m.groups().is_empty());
        assert_eq!(m.value(), Value::None);
    }
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn capture_over_choice(#[case] kind: ParserKind) {
    for flags in FLAG_SETS {
        let parser = build("A <- ~(\"a\" / \"b\" / \"c\")", Actions::new(), kind, flags);
        let m = parser.match_str("b").unwrap().expect("should match");
        assert_eq!(m.span(), (0, 1));
        assert_eq!(m.groups(), &[Value::Str("b".to_owned())]);
        assert_eq!(m.value(), Value::Str("b".to_owned()));
    }
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn capture_inside_lifted_sequence(#[case] kind: ParserKind) {
    let parser = build("A <- \"a\" ~\"b\" \"c\"", Actions::new(), kind, Flags::REGEX);
    let m = parser.match_str("abc").unwrap().expect("should match");
    assert_eq!(m.groups(), &[Value::Str("b".to_owned())]);
    assert_eq!(m.value(), Value::Str("b".to_owned()));
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn bindings_go_to_the_named_map(#[case] kind: ParserKind) {
    for flags in FLAG_SETS {
        let parser = build("A <- x:~\"a\" y:~\"b\"", Actions::new(), kind, flags);
        let m = parser.match_str("ab").unwrap().expect("should match");
        assert!(m.groups().is_empty());
        assert_eq!(
            m.groupdict(),
            IndexMap::from([
                ("x".to_owned(), Value::Str("a".to_owned())),
                ("y".to_owned(), Value::Str("b".to_owned())),
            ])
        );
    }
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn delimited_repetition_packs_a_list(#[case] kind: ParserKind) {
    for flags in FLAG_SETS {
        let mut actions = Actions::new();
        actions.insert("A".to_owned(), Action::pack_list());
        let parser = build("A <- ( ~[0-9]+ ){:~\",\"}", actions, kind, flags);
        let m = parser.match_str("1,2,3").unwrap().expect("should match");
        assert_eq!(
            m.value(),
            Value::List(vec![
                Value::Str("1".to_owned()),
                Value::Str("2".to_owned()),
                Value::Str("3".to_owned()),
            ])
        );
    }
}

// ---------------------------------------------------------------------------
// Runtime equivalence across a grammar battery
// ---------------------------------------------------------------------------

#[test]
fn runtimes_and_optimizer_levels_agree() {
    let cases: &[(&str, &[&str])] = &[
        (
            "A <- \"-\"? [1-9] [0-9]*",
            &["-123456", "0", "00", "x", "", "5"],
        ),
        ("A <- ~(\"a\" / \"b\" / \"c\")", &["a", "b", "c", "d", ""]),
        ("A <- \"a\" ~\"b\" \"c\"", &["abc", "abd", "ab"]),
        ("A <- x:~\"a\" y:~\"b\"", &["ab", "ba"]),
        (
            "S <- \"(\" S \")\" / ~[a-z]+",
            &["abc", "(abc)", "((abc))", "(a", "()"],
        ),
        ("A <- &\"ab\" ~. .", &["ab", "ba", "a"]),
        ("A <- (!\"b\" .)* ~\"b\"", &["aab", "b", "aaa"]),
        ("A <- ~\"a\" ~\"b\"", &["ab"]),
        ("A < \"a\" \"b\"", &["ab", "a b", " a\tb ", "a  c"]),
        ("A <- (\"a\"?)*", &["b", "aaab", ""]),
        ("A <- !!\"ab\" ~.", &["ab", "ax"]),
        ("A <- ~(:\"a\" :\"b\") \"c\"", &["abc", "abd"]),
        ("A <- [^a-c]+", &["xyz", "abc", "xya"]),
        ("A <- \"a\"{2,3}", &["a", "aa", "aaa", "aaaa"]),
    ];
    for (source, inputs) in cases {
        let mut baseline: Option<Vec<Observed>> = None;
        for flags in FLAG_SETS {
            let packrat = build(source, Actions::new(), ParserKind::Packrat, flags);
            let machine = build(source, Actions::new(), ParserKind::Machine, flags);
            let observed: Vec<Observed> = inputs
                .iter()
                .map(|input| {
                    let p = observe(&packrat, input);
                    let m = observe(&machine, input);
                    assert_eq!(
                        p, m,
                        "packrat and machine disagree: {source:?} on {input:?} with {flags}"
                    );
                    p
                })
                .collect();
            match &baseline {
                None => baseline = Some(observed),
                Some(baseline) => assert_eq!(
                    baseline, &observed,
                    "optimizer changed behavior: {source:?} with {flags}"
                ),
            }
        }
    }
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn memoization_does_not_change_results(#[case] kind: ParserKind) {
    let source = "S <- A \"b\" / A \"c\"  A <- ~\"a\"";
    let parser = build(source, Actions::new(), kind, Flags::NONE);
    let plain = observe(&parser, "ac");
    let memoized = parser
        .match_at("ac", 0, Flags::MEMOIZE)
        .unwrap()
        .map(|m| (m.span(), m.groups().to_vec(), m.groupdict(), m.value()));
    assert_eq!(plain, memoized);
    assert_eq!(
        plain.unwrap().1,
        vec![Value::Str("a".to_owned())],
        "the second alternative still sees A's capture"
    );
}

// ---------------------------------------------------------------------------
// Boundaries
// ---------------------------------------------------------------------------

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn zero_width_repetition_terminates(#[case] kind: ParserKind) {
    for flags in [Flags::NONE, Flags::OPTIMIZE] {
        let parser = build("A <- (\"a\"?)*", Actions::new(), kind, flags);
        let m = parser.match_str("b").unwrap().expect("should match empty");
        assert_eq!(m.span(), (0, 0));
        let m = parser.match_str("aaab").unwrap().expect("should match");
        assert_eq!(m.span(), (0, 3));
    }
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn deeply_nested_groups_do_not_overflow(#[case] kind: ParserKind) {
    let depth = 300;
    let source = format!("A <- {}~\"a\"{}", "( ".repeat(depth), " )".repeat(depth));
    let parser = build(&source, Actions::new(), kind, Flags::NONE);
    let m = parser.match_str("a").unwrap().expect("should match");
    assert_eq!(m.value(), Value::Str("a".to_owned()));
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn lookahead_never_consumes(#[case] kind: ParserKind) {
    let parser = build("A <- &\"abc\" ~\"a\" \"bc\"", Actions::new(), kind, Flags::NONE);
    let m = parser.match_str("abc").unwrap().expect("should match");
    assert_eq!(m.span(), (0, 3));
    assert_eq!(m.value(), Value::Str("a".to_owned()));
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn lookahead_discards_captures(#[case] kind: ParserKind) {
    let parser = build("A <- &(~\"a\") \"ab\"", Actions::new(), kind, Flags::NONE);
    let m = parser.match_str("ab").unwrap().expect("should match");
    assert!(m.groups().is_empty());
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn double_negation_behaves_like_positive_lookahead(#[case] kind: ParserKind) {
    let not_not = build("A <- !!\"ab\" ~.", Actions::new(), kind, Flags::NONE);
    let and_ = build("A <- &\"ab\" ~.", Actions::new(), kind, Flags::NONE);
    for input in ["ab", "ax", ""] {
        assert_eq!(observe(&not_not, input), observe(&and_, input), "on {input:?}");
    }
}

// ---------------------------------------------------------------------------
// Errors and flags
// ---------------------------------------------------------------------------

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn strict_turns_failure_into_an_error(#[case] kind: ParserKind) {
    let parser = build("A <- \"ab\" \"\\n\" \"cd\"", Actions::new(), kind, Flags::NONE);
    assert!(parser.match_str("ab\nce").unwrap().is_none());
    let err = parser
        .match_at("ab\nce", 0, Flags::STRICT)
        .expect_err("strict matching should error");
    assert_eq!(err.lineno, Some(2));
    assert_eq!(err.offset, Some(0));
    assert_eq!(err.text.as_deref(), Some("ce"));
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn fail_action_raises_a_parse_error(#[case] kind: ParserKind) {
    let mut actions = Actions::new();
    actions.insert("A".to_owned(), Action::fail("not allowed here"));
    let parser = build("A <- \"x\"", actions, kind, Flags::NONE);
    let err = parser.match_str("x").expect_err("the action should raise");
    assert_eq!(err.message.as_deref(), Some("not allowed here"));
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn ignore_can_be_disabled_or_replaced(#[case] kind: ParserKind) {
    let options = CompileOptions::default()
        .with_parser(kind)
        .with_ignore(Ignore::Disabled);
    let parser = compile("A < \"a\" \"b\"", Actions::new(), options).unwrap();
    assert!(parser.match_str("ab").unwrap().is_some());
    assert!(parser.match_str("a b").unwrap().is_none());

    let options = CompileOptions::default()
        .with_parser(kind)
        .with_ignore(Ignore::Custom(op::star(op::literal("."))));
    let parser = compile("A < \"a\" \"b\"", Actions::new(), options).unwrap();
    assert!(parser.match_str("..a..b..").unwrap().is_some());
    assert!(parser.match_str("a b").unwrap().is_none());
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn actions_transform_rule_values(#[case] kind: ParserKind) {
    let mut actions = Actions::new();
    actions.insert(
        "Int".to_owned(),
        Action::capture(|text| {
            text.parse::<i64>()
                .map(Value::Int)
                .map_err(|_| "not an integer".into())
        }),
    );
    actions.insert("Sum".to_owned(), Action::call(|args, _| {
        let mut total = 0;
        for arg in args {
            let Value::Int(n) = arg else {
                return Err("expected integers".into());
            };
            total += n;
        }
        Ok(Value::Int(total))
    }));
    let source = "Sum <- Int (:\"+\" Int)*  Int <- ~[0-9]+";
    let parser = build(source, actions, kind, Flags::NONE);
    let m = parser.match_str("1+20+300").unwrap().expect("should match");
    assert_eq!(m.value(), Value::Int(321));
}

#[rstest]
#[case(ParserKind::Packrat)]
#[case(ParserKind::Machine)]
fn matching_can_start_mid_input(#[case] kind: ParserKind) {
    let parser = build("A <- ~[0-9]+", Actions::new(), kind, Flags::NONE);
    let m = parser.match_at("ab123", 2, Flags::NONE).unwrap().expect("should match");
    assert_eq!(m.span(), (2, 5));
    assert_eq!(m.as_str(), "123");
}
