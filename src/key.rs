//! Key types that can be stored in device slots.

use std::fmt::Debug;
use std::sync::atomic::Ordering;
use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16, AtomicU32, AtomicU64,
    AtomicU8, AtomicUsize,
};

/// A fixed-width plain value that fits into a single atomic slot.
///
/// Slot transitions are compare-and-swap operations on the bit pattern of the key, therefore
/// every [`Key`] exposes its bits through [`Key::to_bits`]. Sentinel detection is always bitwise:
/// two `f32` keys `0.0` and `-0.0` compare equal through [`PartialEq`] but are different slot
/// states.
pub trait Key: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// The atomic cell backing one slot.
    type Atomic: Default + Send + Sync;

    /// Returns the bit pattern of the key, zero-extended to 64 bits.
    fn to_bits(self) -> u64;

    /// Loads the key stored in `slot`.
    fn load(slot: &Self::Atomic, order: Ordering) -> Self;

    /// Stores `key` into `slot`.
    fn store(slot: &Self::Atomic, key: Self, order: Ordering);

    /// Replaces the content of `slot` with `new` if its bits equal those of `current`.
    ///
    /// # Errors
    ///
    /// Returns the actual content of the slot if it did not match `current`.
    fn compare_exchange(
        slot: &Self::Atomic,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;

    /// Returns `true` if `self` and `other` have the same bit pattern.
    #[inline]
    fn bitwise_eq(self, other: Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

macro_rules! impl_key_for_int {
    ($($t:ty => $atomic:ty, $unsigned:ty);* $(;)?) => {
        $(
            impl Key for $t {
                type Atomic = $atomic;

                #[inline]
                fn to_bits(self) -> u64 {
                    self as $unsigned as u64
                }

                #[inline]
                fn load(slot: &Self::Atomic, order: Ordering) -> Self {
                    slot.load(order)
                }

                #[inline]
                fn store(slot: &Self::Atomic, key: Self, order: Ordering) {
                    slot.store(key, order);
                }

                #[inline]
                fn compare_exchange(
                    slot: &Self::Atomic,
                    current: Self,
                    new: Self,
                    success: Ordering,
                    failure: Ordering,
                ) -> Result<Self, Self> {
                    slot.compare_exchange(current, new, success, failure)
                }
            }
        )*
    };
}

impl_key_for_int! {
    u8 => AtomicU8, u8;
    u16 => AtomicU16, u16;
    u32 => AtomicU32, u32;
    u64 => AtomicU64, u64;
    usize => AtomicUsize, usize;
    i8 => AtomicI8, u8;
    i16 => AtomicI16, u16;
    i32 => AtomicI32, u32;
    i64 => AtomicI64, u64;
    isize => AtomicIsize, usize;
}

macro_rules! impl_key_for_float {
    ($($t:ty => $atomic:ty);* $(;)?) => {
        $(
            impl Key for $t {
                type Atomic = $atomic;

                #[inline]
                fn to_bits(self) -> u64 {
                    u64::from(<$t>::to_bits(self))
                }

                #[inline]
                fn load(slot: &Self::Atomic, order: Ordering) -> Self {
                    <$t>::from_bits(slot.load(order))
                }

                #[inline]
                fn store(slot: &Self::Atomic, key: Self, order: Ordering) {
                    slot.store(<$t>::to_bits(key), order);
                }

                #[inline]
                fn compare_exchange(
                    slot: &Self::Atomic,
                    current: Self,
                    new: Self,
                    success: Ordering,
                    failure: Ordering,
                ) -> Result<Self, Self> {
                    slot.compare_exchange(
                        <$t>::to_bits(current),
                        <$t>::to_bits(new),
                        success,
                        failure,
                    )
                    .map(<$t>::from_bits)
                    .map_err(<$t>::from_bits)
                }
            }
        )*
    };
}

impl_key_for_float! {
    f32 => AtomicU32;
    f64 => AtomicU64;
}

/// The reserved key value marking an empty slot.
///
/// A key bitwise equal to the empty sentinel must never be inserted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmptyKey<K>(pub K);

/// The reserved key value marking an erased slot (a tombstone).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErasedKey<K>(pub K);

impl<K> EmptyKey<K> {
    /// Returns the wrapped sentinel.
    #[inline]
    pub fn get(self) -> K {
        self.0
    }
}

impl<K> ErasedKey<K> {
    /// Returns the wrapped sentinel.
    #[inline]
    pub fn get(self) -> K {
        self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::Ordering::Relaxed;

    #[test]
    fn signed_bits() {
        assert_eq!((-1_i32).to_bits(), u64::from(u32::MAX));
        assert_eq!((-1_i8).to_bits(), 0xff);
        assert!((-1_i64).bitwise_eq(-1));
    }

    #[test]
    fn float_bits() {
        assert!(0.0_f32 == -0.0_f32);
        assert!(!Key::bitwise_eq(0.0_f32, -0.0_f32));
        assert!(Key::bitwise_eq(f64::NAN, f64::NAN));
    }

    #[test]
    fn float_cas() {
        let slot = <f32 as Key>::Atomic::default();
        <f32 as Key>::store(&slot, -0.0, Relaxed);
        assert_eq!(
            <f32 as Key>::compare_exchange(&slot, 0.0, 1.5, Relaxed, Relaxed)
                .map_err(Key::to_bits),
            Err(Key::to_bits(-0.0_f32))
        );
        assert!(
            <f32 as Key>::compare_exchange(&slot, -0.0, 1.5, Relaxed, Relaxed).is_ok()
        );
        assert_eq!(<f32 as Key>::load(&slot, Relaxed), 1.5);
    }
}
