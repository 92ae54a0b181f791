//! Opcodes of the parsing machine.

/// The instruction set.
///
/// Control flow manipulates the backtrack stack; `Scan` is the only
/// instruction that consumes input. `Noop` exists to carry marking,
/// capturing, or action flags when no neighboring instruction can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub(crate) enum OpCode {
    /// Force a failure.
    Fail,
    /// Halt successfully.
    Pass,
    /// Push a backtrack entry pointing past the protected region.
    Branch,
    /// Pop the backtrack entry and jump.
    Commit,
    /// Refresh the backtrack entry with the current position and jump back
    /// (the loop instruction).
    Update,
    /// Pop the backtrack entry, restore its position, and jump.
    Restore,
    /// Pop the backtrack entry, restore its position, and fail.
    FailTwice,
    /// Push a return entry and jump to a definition.
    Call,
    /// Pop a return entry and jump to it.
    Return,
    /// Unconditional jump.
    Jump,
    /// Run the scanner at the current position.
    Scan,
    /// Carrier for standalone flags.
    Noop,
}
