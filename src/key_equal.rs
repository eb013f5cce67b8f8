//! Key equality predicates.
//!
//! The comparison is order-sensitive: the query key is always on the left-hand side, and the key
//! stored in the slot is always on the right-hand side. Predicates never see sentinel values;
//! sentinel detection happens bitwise before a predicate is consulted.

use crate::Key;
use equivalent::Equivalent;

/// Compares a query key of type `Q` against a slot key of type `K`.
pub trait KeyEqual<Q: ?Sized, K>: Clone + Send + Sync + 'static {
    /// Returns `true` if `query_key` matches `slot_key`.
    fn equal(&self, query_key: &Q, slot_key: &K) -> bool;
}

/// Compares keys with [`PartialEq`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultKeyEqual;

impl<K: Key> KeyEqual<K, K> for DefaultKeyEqual {
    #[inline]
    fn equal(&self, query_key: &K, slot_key: &K) -> bool {
        query_key == slot_key
    }
}

/// Compares keys by their bit patterns.
///
/// Unlike [`DefaultKeyEqual`], `NaN` matches a `NaN` with the same payload, and `0.0` does not
/// match `-0.0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitwiseKeyEqual;

impl<K: Key> KeyEqual<K, K> for BitwiseKeyEqual {
    #[inline]
    fn equal(&self, query_key: &K, slot_key: &K) -> bool {
        query_key.bitwise_eq(*slot_key)
    }
}

/// Compares heterogeneous query keys through [`Equivalent`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EquivalentKeyEqual;

impl<Q, K> KeyEqual<Q, K> for EquivalentKeyEqual
where
    Q: Equivalent<K> + ?Sized,
    K: Key,
{
    #[inline]
    fn equal(&self, query_key: &Q, slot_key: &K) -> bool {
        query_key.equivalent(slot_key)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug)]
    struct Low16(u16);

    impl Equivalent<u64> for Low16 {
        fn equivalent(&self, key: &u64) -> bool {
            (*key & 0xffff) == u64::from(self.0)
        }
    }

    #[test]
    fn default_vs_bitwise() {
        assert!(DefaultKeyEqual.equal(&0.0_f64, &-0.0_f64));
        assert!(!BitwiseKeyEqual.equal(&0.0_f64, &-0.0_f64));
        assert!(!DefaultKeyEqual.equal(&f32::NAN, &f32::NAN));
        assert!(BitwiseKeyEqual.equal(&f32::NAN, &f32::NAN));
    }

    #[test]
    fn equivalent() {
        assert!(EquivalentKeyEqual.equal(&Low16(3), &0x1_0003_u64));
        assert!(!EquivalentKeyEqual.equal(&Low16(4), &0x1_0003_u64));
        assert!(KeyEqual::<u64, u64>::equal(&EquivalentKeyEqual, &9, &9));
    }
}
