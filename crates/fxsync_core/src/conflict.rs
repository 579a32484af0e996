//! Conflict classification between two change histories.

use std::fmt;

/// Outcome of comparing two predecessor change lists.
///
/// `Equal` covers histories that include each other; they describe the
/// same knowledge and are never in conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictVerdict {
    /// The first list has seen everything the second has.
    AIncludesB,
    /// The second list has seen everything the first has.
    BIncludesA,
    /// Both lists include each other.
    Equal,
    /// Each list has a change the other has not seen.
    Concurrent,
}

impl ConflictVerdict {
    /// The verdict with the operands swapped.
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::AIncludesB => Self::BIncludesA,
            Self::BIncludesA => Self::AIncludesB,
            other => other,
        }
    }

    /// Returns true for concurrent histories.
    #[must_use]
    pub fn is_conflict(self) -> bool {
        self == Self::Concurrent
    }

    /// Returns true if the first operand includes the second.
    #[must_use]
    pub fn a_includes_b(self) -> bool {
        matches!(self, Self::AIncludesB | Self::Equal)
    }

    /// Returns true if the second operand includes the first.
    #[must_use]
    pub fn b_includes_a(self) -> bool {
        matches!(self, Self::BIncludesA | Self::Equal)
    }

    pub(crate) fn from_inclusion(a_includes_b: bool, b_includes_a: bool) -> Self {
        match (a_includes_b, b_includes_a) {
            (true, true) => Self::Equal,
            (true, false) => Self::AIncludesB,
            (false, true) => Self::BIncludesA,
            (false, false) => Self::Concurrent,
        }
    }
}

impl fmt::Display for ConflictVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AIncludesB => "a-includes-b",
            Self::BIncludesA => "b-includes-a",
            Self::Equal => "equal",
            Self::Concurrent => "concurrent",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_swaps_inclusion() {
        assert_eq!(ConflictVerdict::AIncludesB.inverse(), ConflictVerdict::BIncludesA);
        assert_eq!(ConflictVerdict::BIncludesA.inverse(), ConflictVerdict::AIncludesB);
        assert_eq!(ConflictVerdict::Equal.inverse(), ConflictVerdict::Equal);
        assert_eq!(ConflictVerdict::Concurrent.inverse(), ConflictVerdict::Concurrent);
    }

    #[test]
    fn only_concurrent_conflicts() {
        assert!(ConflictVerdict::Concurrent.is_conflict());
        assert!(!ConflictVerdict::Equal.is_conflict());
        assert!(ConflictVerdict::Equal.a_includes_b());
        assert!(ConflictVerdict::Equal.b_includes_a());
    }
}
