//! Behavior flags for compiling and matching.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// A small bit-set of compile- and match-time switches.
///
/// `OPTIMIZE` is the default for compilation and currently covers inlining
/// and regex lifting; terminal merging stays opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u16);

impl Flags {
    pub const NONE: Self = Self(0);
    /// Log the grammar and its optimized form while compiling.
    pub const DEBUG: Self = Self(1 << 0);
    /// Turn a failed match into a [`crate::ParseError`].
    pub const STRICT: Self = Self(1 << 1);
    /// Memoize rule results per position (packrat only).
    pub const MEMOIZE: Self = Self(1 << 2);
    /// Inline non-recursive rules.
    pub const INLINE: Self = Self(1 << 3);
    /// Merge adjacent terminals.
    pub const MERGE: Self = Self(1 << 4);
    /// Lift terminal runs into compiled regular expressions.
    pub const REGEX: Self = Self(1 << 5);
    /// The default optimization level.
    pub const OPTIMIZE: Self = Self(Self::INLINE.0 | Self::REGEX.0);

    /// True if every flag in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no flags are set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 6] = [
            (Flags::DEBUG, "DEBUG"),
            (Flags::STRICT, "STRICT"),
            (Flags::MEMOIZE, "MEMOIZE"),
            (Flags::INLINE, "INLINE"),
            (Flags::MERGE, "MERGE"),
            (Flags::REGEX, "REGEX"),
        ];
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
