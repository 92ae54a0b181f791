//! Compilation of expression trees to machine instructions.
//!
//! Each operator maps to a fixed template over the opcode set. Captures,
//! binds, and rule actions become *marking* and *capturing*/*action* flags
//! on the first and last instruction of the compiled body; when the host
//! instruction cannot carry a flag (control-flow opcodes manage the stack
//! themselves) a `Noop` carrier is spliced in. A capture over a choice
//! always gets a trailing `Noop`, since no single branch's last instruction
//! covers every committed path.

use ahash::AHashMap;

use super::op::OpCode;
use super::scanners::{ClassScanner, Scanner};
use crate::actions::Action;
use crate::errors::GrammarError;
use crate::expr::Expr;
use crate::grammar::Grammar;

/// One machine instruction: an opcode, an offset (relative for jumps,
/// absolute for calls after patching), an optional scanner, and the value
/// flags.
#[derive(Debug, Clone)]
pub struct Instr {
    pub(crate) op: OpCode,
    pub(crate) off: isize,
    pub(crate) scanner: Option<Scanner>,
    pub(crate) marking: bool,
    pub(crate) capturing: bool,
    pub(crate) action: Option<Action>,
    /// Symbolic call target, resolved to `off` at layout time.
    pub(crate) target: Option<String>,
}

impl Instr {
    fn new(op: OpCode) -> Self {
        Self {
            op,
            off: 1,
            scanner: None,
            marking: false,
            capturing: false,
            action: None,
            target: None,
        }
    }

    fn jump(op: OpCode, off: isize) -> Self {
        Self { off, ..Self::new(op) }
    }

    fn scan(scanner: Scanner) -> Self {
        Self {
            scanner: Some(scanner),
            ..Self::new(OpCode::Scan)
        }
    }

    fn call(target: &str) -> Self {
        Self {
            target: Some(target.to_owned()),
            ..Self::new(OpCode::Call)
        }
    }

    fn noop_marking() -> Self {
        Self {
            marking: true,
            ..Self::new(OpCode::Noop)
        }
    }

    fn noop_capturing() -> Self {
        Self {
            capturing: true,
            ..Self::new(OpCode::Noop)
        }
    }

    fn noop_action(action: Action) -> Self {
        Self {
            action: Some(action),
            ..Self::new(OpCode::Noop)
        }
    }
}

/// Capture and action flags cannot ride on these opcodes: they pop or push
/// stack entries themselves, which would interleave with the mark entry.
fn no_cap_or_act(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Call
            | OpCode::Commit
            | OpCode::Update
            | OpCode::Restore
            | OpCode::FailTwice
            | OpCode::Return
    )
}

/// A compiled program: the instructions and the name→address index.
#[derive(Debug)]
pub struct Program {
    pub(crate) code: Vec<Instr>,
    pub(crate) index: AHashMap<String, usize>,
    pub(crate) pass_index: usize,
}

/// Lays out the program: a leading `Fail`, each definition's body followed
/// by `Return`, then the final `Pass`. Call targets are patched from the
/// name index.
pub(crate) fn build_program(grammar: &Grammar) -> Result<Program, GrammarError> {
    let mut code = vec![Instr::new(OpCode::Fail)];
    let mut index = AHashMap::new();
    for (name, defn) in grammar.definitions() {
        index.insert(name.clone(), code.len());
        let mut body = compile_expr(grammar, defn)?;
        code.append(&mut body);
        code.push(Instr::new(OpCode::Return));
    }
    for instr in &mut code {
        if instr.op != OpCode::Call {
            continue;
        }
        let address = match &instr.target {
            Some(target) => *index
                .get(target)
                .ok_or_else(|| GrammarError::UndefinedNonterminal(target.clone()))?,
            None => continue,
        };
        instr.off = isize::try_from(address).unwrap_or(0);
    }
    let pass_index = code.len();
    code.push(Instr::new(OpCode::Pass));
    Ok(Program {
        code,
        index,
        pass_index,
    })
}

fn compile_expr(grammar: &Grammar, e: &Expr) -> Result<Vec<Instr>, GrammarError> {
    match e {
        Expr::Dot => Ok(vec![Instr::scan(Scanner::Dot)]),
        Expr::Literal(s) => Ok(vec![Instr::scan(Scanner::Literal(s.clone()))]),
        Expr::Class(c) => Ok(vec![Instr::scan(Scanner::Class(ClassScanner::once(
            c.clone(),
        )))]),
        Expr::Regex(r) => {
            r.compiled()?;
            Ok(vec![Instr::scan(Scanner::Regex(r.clone()))])
        }
        Expr::Nonterminal(name) => Ok(vec![Instr::call(name)]),
        Expr::Optional(inner) => {
            let body = compile_expr(grammar, inner)?;
            let mut out = vec![Instr::jump(OpCode::Branch, body.len() as isize + 2)];
            out.extend(body);
            out.push(Instr::jump(OpCode::Commit, 1));
            Ok(out)
        }
        Expr::Star(inner) => compile_repeat(grammar, inner, 0),
        Expr::Plus(inner) => compile_repeat(grammar, inner, 1),
        Expr::And(inner) => {
            let body = compile_expr(grammar, inner)?;
            let mut out = vec![Instr::jump(OpCode::Branch, body.len() as isize + 2)];
            out.extend(body);
            out.push(Instr::jump(OpCode::Restore, 2));
            out.push(Instr::new(OpCode::Fail));
            // the restore keeps the body's emissions on success; the mark
            // plus trailing carrier drops them
            mark_first(&mut out);
            out.push(Instr::noop_action(Action::Discard));
            Ok(out)
        }
        Expr::Not(inner) => {
            // both exits discard emissions through the failure handler
            let body = compile_expr(grammar, inner)?;
            let mut out = vec![Instr::jump(OpCode::Branch, body.len() as isize + 2)];
            out.extend(body);
            out.push(Instr::new(OpCode::FailTwice));
            Ok(out)
        }
        Expr::Sequence(items) => {
            let mut out = Vec::new();
            for item in items {
                out.extend(compile_expr(grammar, item)?);
            }
            Ok(out)
        }
        Expr::Choice(items) => {
            let mut compiled = Vec::with_capacity(items.len());
            for item in items {
                compiled.push(compile_expr(grammar, item)?);
            }
            let Some(mut tail) = compiled.pop() else {
                return Ok(vec![Instr::new(OpCode::Fail)]);
            };
            for body in compiled.into_iter().rev() {
                let mut out = vec![Instr::jump(OpCode::Branch, body.len() as isize + 2)];
                out.extend(body);
                out.push(Instr::jump(OpCode::Commit, tail.len() as isize + 1));
                out.extend(tail);
                tail = out;
            }
            Ok(tail)
        }
        Expr::Capture(inner) => {
            let captured_choice = matches!(inner.as_ref(), Expr::Choice(_));
            let mut body = compile_expr(grammar, inner)?;
            mark_first(&mut body);
            let last = body.last().expect("compiled body is never empty");
            if !last.capturing
                && last.action.is_none()
                && !no_cap_or_act(last.op)
                && !captured_choice
            {
                if let Some(last) = body.last_mut() {
                    last.capturing = true;
                }
            } else {
                body.push(Instr::noop_capturing());
            }
            Ok(body)
        }
        Expr::Discard(inner) => compile_rule(grammar, inner, &Action::Discard),
        Expr::Bind { expr, name } => {
            let action = Action::Bind {
                name: name.clone(),
                kind: Some(grammar.value_kind(expr)),
            };
            compile_rule(grammar, expr, &action)
        }
        Expr::AutoIgnore(inner) => compile_expr(grammar, inner),
        Expr::Rule { expr, action, .. } => match action {
            Some(action) => compile_rule(grammar, expr, action),
            None => compile_expr(grammar, expr),
        },
    }
}

fn compile_rule(grammar: &Grammar, inner: &Expr, action: &Action) -> Result<Vec<Instr>, GrammarError> {
    let mut body = compile_expr(grammar, inner)?;
    mark_first(&mut body);
    let last = body.last().expect("compiled body is never empty");
    if last.action.is_none() && !no_cap_or_act(last.op) {
        if let Some(last) = body.last_mut() {
            last.action = Some(action.clone());
        }
    } else {
        body.push(Instr::noop_action(action.clone()));
    }
    Ok(body)
}

/// Sets the marking flag on a body's first instruction, or splices in a
/// `Noop` carrier when that instruction cannot take it.
fn mark_first(body: &mut Vec<Instr>) {
    let first = &body[0];
    if no_cap_or_act(first.op) || first.marking {
        body.insert(0, Instr::noop_marking());
    } else if let Some(first) = body.first_mut() {
        first.marking = true;
    }
}

/// `e*` and `e+`. A body that is a single plain class scan folds the
/// repetition into the scanner; otherwise the loop template applies.
fn compile_repeat(grammar: &Grammar, inner: &Expr, min: usize) -> Result<Vec<Instr>, GrammarError> {
    let body = compile_expr(grammar, inner)?;
    if body.len() == 1 {
        let instr = &body[0];
        if matches!(instr.scanner, Some(Scanner::Class(_)))
            && !instr.marking
            && !instr.capturing
            && instr.action.is_none()
        {
            let mut instr = body.into_iter().next().expect("length checked");
            if let Some(Scanner::Class(class)) = &mut instr.scanner {
                class.min = min;
                class.max = None;
            }
            return Ok(vec![instr]);
        }
    }
    let mut out = Vec::with_capacity(body.len() * (min + 1) + 2);
    for _ in 0..min {
        out.extend(body.iter().cloned());
    }
    out.push(Instr::jump(OpCode::Branch, body.len() as isize + 2));
    let len = body.len() as isize;
    out.extend(body);
    out.push(Instr::jump(OpCode::Update, -len));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{capture, choice, class, literal, nonterminal, plus, sequence, star};

    fn compile(e: Expr) -> Vec<Instr> {
        let mut g = Grammar::with_start("A");
        g.define("A", e).unwrap();
        g.finalize().unwrap();
        let defn = g.get("A").unwrap().clone();
        compile_expr(&g, &defn).unwrap()
    }

    fn ops(instrs: &[Instr]) -> Vec<OpCode> {
        instrs.iter().map(|i| i.op).collect()
    }

    #[test]
    fn optional_template() {
        let body = compile(crate::op::optional(literal("a")));
        assert_eq!(ops(&body), vec![OpCode::Branch, OpCode::Scan, OpCode::Commit]);
        assert_eq!(body[0].off, 3);
        assert_eq!(body[2].off, 1);
    }

    #[test]
    fn star_over_class_folds_into_scanner() {
        let body = compile(star(class("0-9")));
        assert_eq!(body.len(), 1);
        let Some(Scanner::Class(class)) = &body[0].scanner else {
            panic!("expected a class scanner");
        };
        assert_eq!(class.min, 0);
        assert_eq!(class.max, None);
    }

    #[test]
    fn plus_over_class_folds_into_scanner() {
        let body = compile(plus(class("0-9")));
        assert_eq!(body.len(), 1);
        let Some(Scanner::Class(class)) = &body[0].scanner else {
            panic!("expected a class scanner");
        };
        assert_eq!(class.min, 1);
        assert_eq!(class.max, None);
    }

    #[test]
    fn star_loop_template() {
        let body = compile(star(literal("ab")));
        assert_eq!(ops(&body), vec![OpCode::Branch, OpCode::Scan, OpCode::Update]);
        assert_eq!(body[0].off, 3);
        assert_eq!(body[2].off, -1);
    }

    #[test]
    fn plus_repeats_body_before_loop() {
        let body = compile(plus(literal("ab")));
        assert_eq!(
            ops(&body),
            vec![OpCode::Scan, OpCode::Branch, OpCode::Scan, OpCode::Update]
        );
    }

    #[test]
    fn choice_template() {
        let body = compile(choice([literal("a"), literal("b"), literal("c")]));
        assert_eq!(
            ops(&body),
            vec![
                OpCode::Branch,
                OpCode::Scan,
                OpCode::Commit,
                OpCode::Branch,
                OpCode::Scan,
                OpCode::Commit,
                OpCode::Scan,
            ]
        );
        // both commits land on the instruction after the last alternative
        assert_eq!(body[2].off, 5);
        assert_eq!(body[5].off, 2);
    }

    #[test]
    fn capture_flags_simple_body() {
        let body = compile(capture(literal("a")));
        assert_eq!(body.len(), 1);
        assert!(body[0].marking);
        assert!(body[0].capturing);
    }

    #[test]
    fn capture_over_call_gets_carriers() {
        let mut g = Grammar::with_start("A");
        g.define("A", capture(nonterminal("B"))).unwrap();
        g.define("B", literal("b")).unwrap();
        g.finalize().unwrap();
        let defn = g.get("A").unwrap().clone();
        let body = compile_expr(&g, &defn).unwrap();
        assert_eq!(ops(&body), vec![OpCode::Noop, OpCode::Call, OpCode::Noop]);
        assert!(body[0].marking);
        assert!(body[2].capturing);
    }

    #[test]
    fn capture_over_choice_gets_trailing_carrier() {
        let body = compile(capture(choice([literal("a"), literal("b")])));
        assert_eq!(
            ops(&body),
            vec![
                OpCode::Branch,
                OpCode::Scan,
                OpCode::Commit,
                OpCode::Scan,
                OpCode::Noop,
            ]
        );
        assert!(body[0].marking);
        assert!(body[4].capturing);
    }

    #[test]
    fn rule_action_rides_last_scan() {
        let body = compile(crate::op::rule(
            sequence([literal("a"), literal("b")]),
            Action::constant(1i64),
        ));
        assert_eq!(ops(&body), vec![OpCode::Scan, OpCode::Scan]);
        assert!(body[0].marking);
        assert!(body[1].action.is_some());
    }

    #[test]
    fn lookahead_discards_on_success() {
        let body = compile(crate::op::and(capture(literal("a"))));
        assert_eq!(
            ops(&body),
            vec![
                OpCode::Branch,
                OpCode::Scan,
                OpCode::Restore,
                OpCode::Fail,
                OpCode::Noop,
            ]
        );
        assert!(body[0].marking);
        assert_eq!(body[4].action, Some(Action::Discard));
    }

    #[test]
    fn discard_compiles_to_an_action() {
        let body = compile(crate::op::discard(literal("a")));
        assert_eq!(body.len(), 1);
        assert!(body[0].marking);
        assert_eq!(body[0].action, Some(Action::Discard));
    }

    #[test]
    fn program_layout_and_call_patching() {
        let mut g = Grammar::with_start("A");
        g.define("A", nonterminal("B")).unwrap();
        g.define("B", literal("b")).unwrap();
        g.finalize().unwrap();
        let program = build_program(&g).unwrap();
        assert_eq!(program.code[0].op, OpCode::Fail);
        assert_eq!(program.code[program.pass_index].op, OpCode::Pass);
        let a = program.index["A"];
        let b = program.index["B"];
        assert_eq!(program.code[a].op, OpCode::Call);
        assert_eq!(program.code[a].off, b as isize);
    }
}
