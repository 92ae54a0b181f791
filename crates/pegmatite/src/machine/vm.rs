//! The interpreter loop of the parsing machine.
//!
//! State is an instruction pointer, an input position, the positional and
//! named value lists, and one stack holding three kinds of entries:
//!
//! - *return* entries (`pos` unset, pushed by `Call`),
//! - *backtrack* entries (`pos` set, pushed by `Branch`/`Update`),
//! - *mark* entries (`pos` unset, `mark` meaningful, pushed by the marking
//!   flag before its instruction executes).
//!
//! On failure the stack is popped down to the nearest backtrack entry; its
//! position is restored and the value lists are truncated to the recorded
//! lengths. On an instruction's success, a capturing flag pops the mark
//! entry and replaces the values emitted since with the matched substring,
//! and an action flag pops the mark entry and replaces them with the
//! action's output. The loop ends at `Pass` (success) or when the stack
//! runs out (failure).

use super::compiler::Program;
use super::op::OpCode;
use crate::actions::Bindings;
use crate::errors::ParseError;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
struct StackEntry {
    ip: usize,
    /// Set only for backtrack entries.
    pos: Option<usize>,
    /// The marked input position (mark entries only).
    mark: usize,
    argc: usize,
    kwc: usize,
}

/// The result of one interpreter run.
pub(crate) struct Outcome {
    pub end: Option<usize>,
    /// The furthest position where a scan failed, for error reporting.
    pub furthest: usize,
}

/// Runs the program from `start_index` against `input` at `start_pos`.
pub(crate) fn run(
    program: &Program,
    start_index: usize,
    input: &str,
    start_pos: usize,
    args: &mut Vec<Value>,
    kwargs: &mut Bindings,
) -> Result<Outcome, ParseError> {
    let code = &program.code;
    let mut stack: Vec<StackEntry> = vec![
        // failure floor: backtracking here reaches the Fail instruction at
        // address 0 with nothing left to pop, ending the run
        StackEntry {
            ip: 0,
            pos: Some(start_pos),
            mark: 0,
            argc: args.len(),
            kwc: kwargs.len(),
        },
        // top-level return: the start rule's Return jumps to Pass
        StackEntry {
            ip: program.pass_index,
            pos: None,
            mark: 0,
            argc: 0,
            kwc: 0,
        },
    ];
    let mut ip = start_index;
    let mut pos = start_pos;
    let mut furthest = start_pos;

    loop {
        let Some(instr) = code.get(ip) else {
            return Err(ParseError::new(format!(
                "instruction pointer out of range: {ip}"
            )));
        };

        if instr.marking {
            stack.push(StackEntry {
                ip: 0,
                pos: None,
                mark: pos,
                argc: args.len(),
                kwc: kwargs.len(),
            });
        }

        let mut failed = false;
        match instr.op {
            OpCode::Scan => {
                let scanner = instr
                    .scanner
                    .as_ref()
                    .ok_or_else(|| ParseError::new("scan instruction without a scanner"))?;
                match scanner.scan(input, pos)? {
                    Some(end) => pos = end,
                    None => {
                        if pos > furthest {
                            furthest = pos;
                        }
                        failed = true;
                    }
                }
            }
            OpCode::Branch => {
                stack.push(StackEntry {
                    ip: offset(ip, instr.off),
                    pos: Some(pos),
                    mark: 0,
                    argc: args.len(),
                    kwc: kwargs.len(),
                });
                ip += 1;
                continue;
            }
            OpCode::Call => {
                stack.push(StackEntry {
                    ip: ip + 1,
                    pos: None,
                    mark: 0,
                    argc: 0,
                    kwc: 0,
                });
                ip = offset(0, instr.off);
                continue;
            }
            OpCode::Commit => {
                stack.pop();
                ip = offset(ip, instr.off);
                continue;
            }
            OpCode::Update => {
                let Some(entry) = stack.pop() else {
                    return Err(ParseError::new("update with an empty stack"));
                };
                if entry.pos == Some(pos) {
                    // the loop body matched nothing; stop iterating
                    ip = entry.ip;
                } else {
                    stack.push(StackEntry {
                        ip: entry.ip,
                        pos: Some(pos),
                        mark: entry.mark,
                        argc: args.len(),
                        kwc: kwargs.len(),
                    });
                    ip = offset(ip, instr.off);
                }
                continue;
            }
            OpCode::Restore => {
                if let Some(entry) = stack.pop()
                    && let Some(saved) = entry.pos
                {
                    pos = saved;
                }
                ip = offset(ip, instr.off);
                continue;
            }
            OpCode::FailTwice => {
                if let Some(entry) = stack.pop()
                    && let Some(saved) = entry.pos
                {
                    pos = saved;
                }
                failed = true;
            }
            OpCode::Return => {
                let Some(entry) = stack.pop() else {
                    return Err(ParseError::new("return with an empty stack"));
                };
                ip = entry.ip;
                continue;
            }
            OpCode::Jump => {
                ip = offset(ip, instr.off);
                continue;
            }
            OpCode::Pass => break,
            OpCode::Fail => failed = true,
            OpCode::Noop => {}
        }

        if failed {
            let mut resumed = false;
            while let Some(entry) = stack.pop() {
                if let Some(saved) = entry.pos {
                    pos = saved;
                    ip = entry.ip;
                    args.truncate(entry.argc);
                    kwargs.truncate(entry.kwc);
                    resumed = true;
                    break;
                }
            }
            if !resumed {
                return Ok(Outcome {
                    end: None,
                    furthest,
                });
            }
            continue;
        }

        if instr.capturing {
            let Some(mark) = stack.pop() else {
                return Err(ParseError::new("capture with an empty stack"));
            };
            args.truncate(mark.argc);
            args.push(Value::Str(input[mark.mark..pos].to_owned()));
            kwargs.truncate(mark.kwc);
        }

        if let Some(action) = &instr.action {
            let Some(mark) = stack.pop() else {
                return Err(ParseError::new("action with an empty stack"));
            };
            let emitted_args = args.split_off(mark.argc);
            let emitted_kwargs = kwargs.split_off(mark.kwc);
            let (new_args, new_kwargs) =
                action.apply(input, mark.mark, pos, emitted_args, emitted_kwargs)?;
            args.extend(new_args);
            kwargs.extend(new_kwargs);
        }

        ip += 1;
    }

    Ok(Outcome {
        end: Some(pos),
        furthest,
    })
}

/// Signed offset arithmetic on instruction addresses. Out-of-range results
/// land on the Fail instruction at address 0.
fn offset(ip: usize, off: isize) -> usize {
    ip.checked_add_signed(off).unwrap_or(0)
}
