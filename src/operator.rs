//! Operator tags select the per-key operations a device reference exposes.

use std::fmt::{self, Debug};

/// A per-key device operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Insert a key.
    Insert,
    /// Test for the presence of a key.
    Contains,
    /// Locate one occurrence of a key.
    Find,
    /// Count occurrences of a key.
    Count,
    /// Turn one occurrence of a key into a tombstone.
    Erase,
}

impl Operator {
    /// All the operators.
    pub const ALL: [Operator; 5] = [
        Operator::Insert,
        Operator::Contains,
        Operator::Find,
        Operator::Count,
        Operator::Erase,
    ];

    #[inline]
    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A set of [`Operator`] values.
///
/// # Examples
///
/// ```
/// use static_multiset::{Operator, OperatorSet};
///
/// let set = OperatorSet::from([Operator::Insert, Operator::Count]);
/// assert!(set.contains(Operator::Count));
/// assert!(!set.contains(Operator::Find));
/// assert_eq!(set.len(), 2);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OperatorSet {
    bits: u8,
}

impl OperatorSet {
    /// The empty set.
    pub const EMPTY: OperatorSet = OperatorSet { bits: 0 };

    /// Returns a copy of `self` including `op`.
    #[inline]
    #[must_use]
    pub const fn with(self, op: Operator) -> Self {
        Self {
            bits: self.bits | op.bit(),
        }
    }

    /// Returns `true` if `op` is in the set.
    #[inline]
    #[must_use]
    pub const fn contains(self, op: Operator) -> bool {
        self.bits & op.bit() != 0
    }

    /// Returns `true` if the set has no operators.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Returns the number of operators in the set.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Iterates over the operators in the set.
    pub fn iter(self) -> impl Iterator<Item = Operator> {
        Operator::ALL
            .into_iter()
            .filter(move |op| self.contains(*op))
    }
}

impl Debug for OperatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl From<Operator> for OperatorSet {
    #[inline]
    fn from(op: Operator) -> Self {
        OperatorSet::EMPTY.with(op)
    }
}

impl<const N: usize> From<[Operator; N]> for OperatorSet {
    #[inline]
    fn from(ops: [Operator; N]) -> Self {
        ops.into_iter().collect()
    }
}

impl From<&[Operator]> for OperatorSet {
    #[inline]
    fn from(ops: &[Operator]) -> Self {
        ops.iter().copied().collect()
    }
}

impl FromIterator<Operator> for OperatorSet {
    #[inline]
    fn from_iter<I: IntoIterator<Item = Operator>>(iter: I) -> Self {
        iter.into_iter().fold(OperatorSet::EMPTY, OperatorSet::with)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set() {
        let set = OperatorSet::from(&[Operator::Erase, Operator::Insert, Operator::Erase][..]);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            [Operator::Insert, Operator::Erase]
        );
        assert!(OperatorSet::from([] as [Operator; 0]).is_empty());
        assert_eq!(OperatorSet::from(Operator::ALL).len(), Operator::ALL.len());
        assert_eq!(format!("{:?}", OperatorSet::from(Operator::Find)), "{Find}");
    }
}
