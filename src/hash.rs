//! Hash functions used by the probing schemes.

use crate::Key;
use xxhash_rust::{xxh32::xxh32, xxh64::xxh64};

/// A hash function that maps query keys of type `Q` to 64-bit hash values.
///
/// Hash functions are copied into every device reference and evaluated concurrently on all
/// execution units, so they have to be cheap to clone and free of interior state.
pub trait Hash<Q: ?Sized>: Clone + Send + Sync + 'static {
    /// Hashes `key`.
    fn hash(&self, key: &Q) -> u64;
}

/// Returns the key bits as the hash value.
///
/// This is a perfect hash function when the capacity is larger than the key domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdentityHash;

impl<K: Key> Hash<K> for IdentityHash {
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        key.to_bits()
    }
}

/// Seeded `XXH64` over the native bytes of the key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XxHash64 {
    seed: u64,
}

impl XxHash64 {
    /// Creates a new [`XxHash64`] with the given seed.
    #[inline]
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Returns the seed.
    #[inline]
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }
}

impl<K: Key> Hash<K> for XxHash64 {
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        let bytes = key.to_bits().to_le_bytes();
        xxh64(&bytes[..std::mem::size_of::<K>()], self.seed)
    }
}

/// Seeded `XXH32` over the native bytes of the key, widened to 64 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XxHash32 {
    seed: u32,
}

impl XxHash32 {
    /// Creates a new [`XxHash32`] with the given seed.
    #[inline]
    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self { seed }
    }
}

impl<K: Key> Hash<K> for XxHash32 {
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        let bytes = key.to_bits().to_le_bytes();
        u64::from(xxh32(&bytes[..std::mem::size_of::<K>()], self.seed))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity() {
        assert_eq!(Hash::<u32>::hash(&IdentityHash, &17), 17);
        assert_eq!(Hash::<i8>::hash(&IdentityHash, &-1), 0xff);
    }

    #[test]
    fn xxhash_width() {
        // Only the native bytes take part in hashing.
        let h = XxHash64::new(7);
        assert_eq!(Hash::<u64>::hash(&h, &5), xxh64(&5_u64.to_le_bytes(), 7));
        assert_eq!(Hash::<u16>::hash(&h, &5), xxh64(&5_u16.to_le_bytes(), 7));
        assert_ne!(
            Hash::<u64>::hash(&XxHash64::new(0), &5),
            Hash::<u64>::hash(&XxHash64::new(1), &5)
        );
    }

    #[test]
    fn xxhash32() {
        let h = XxHash32::new(3);
        assert_eq!(
            Hash::<i32>::hash(&h, &-2),
            u64::from(xxh32(&(-2_i32).to_le_bytes(), 3))
        );
    }
}
