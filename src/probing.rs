//! Probing schemes resolving collisions in the open-addressing slot array.

use crate::hash::{Hash, XxHash64};

/// Generates the slot indices of one probing sequence.
///
/// The iterator starts at a bucket-aligned index and advances by a fixed step, wrapping around at
/// the capacity. Wrap-around detection is up to the caller: a sequence is exhausted once
/// [`ProbingIterator::current`] returns to [`ProbingIterator::start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbingIterator {
    start: usize,
    current: usize,
    step: usize,
    upper_bound: usize,
}

impl ProbingIterator {
    /// Creates a new [`ProbingIterator`].
    #[inline]
    #[must_use]
    pub const fn new(start: usize, step: usize, upper_bound: usize) -> Self {
        Self {
            start,
            current: start,
            step,
            upper_bound,
        }
    }

    /// Returns the first slot index of the sequence.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Returns the current slot index.
    #[inline]
    #[must_use]
    pub const fn current(&self) -> usize {
        self.current
    }

    /// Advances to the next slot index.
    ///
    /// Returns `false` once the sequence has wrapped around to its first index.
    #[inline]
    pub fn advance(&mut self) -> bool {
        self.current = (self.current + self.step) % self.upper_bound;
        self.current != self.start
    }
}

/// A collision resolution strategy for query keys of type `Q`.
pub trait ProbingScheme<Q: ?Sized>: Clone + Send + Sync + 'static {
    /// Creates the probing sequence of `key` over `capacity` slots grouped in buckets of
    /// `bucket_size` slots.
    ///
    /// `capacity` is always a multiple of `bucket_size`.
    fn make_iterator(&self, key: &Q, bucket_size: usize, capacity: usize) -> ProbingIterator;
}

/// Probing schemes implement this to tell how the number of buckets has to be chosen.
pub trait BucketCount {
    /// Returns `true` if the number of buckets has to be a prime.
    ///
    /// Double hashing needs a prime number of buckets so that every step is coprime with it.
    fn requires_prime_buckets(&self) -> bool;
}

/// Rebinds a probing scheme to a different hash function.
///
/// This is how a query-side hash is plugged into a device reference for heterogeneous lookup.
pub trait WithHashFunction<H> {
    /// The re-bound probing scheme.
    type Output;

    /// Returns a copy of `self` hashing with `hash`.
    fn with_hash_function(&self, hash: H) -> Self::Output;
}

/// Linear probing: `(hash(key) % num_buckets + i) * bucket_size`.
///
/// Efficient at low occupancy and with low key multiplicity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinearProbing<H> {
    hasher: H,
}

impl<H> LinearProbing<H> {
    /// Creates a new [`LinearProbing`] with the given hash function.
    #[inline]
    pub const fn new(hasher: H) -> Self {
        Self { hasher }
    }

    /// Returns the hash function.
    #[inline]
    pub fn hash_function(&self) -> H
    where
        H: Clone,
    {
        self.hasher.clone()
    }
}

impl<Q: ?Sized, H: Hash<Q>> ProbingScheme<Q> for LinearProbing<H> {
    #[inline]
    fn make_iterator(&self, key: &Q, bucket_size: usize, capacity: usize) -> ProbingIterator {
        let num_buckets = capacity / bucket_size;
        let start = reduce(self.hasher.hash(key), num_buckets) * bucket_size;
        ProbingIterator::new(start, bucket_size, capacity)
    }
}

impl<H> BucketCount for LinearProbing<H> {
    #[inline]
    fn requires_prime_buckets(&self) -> bool {
        false
    }
}

impl<H, N> WithHashFunction<N> for LinearProbing<H> {
    type Output = LinearProbing<N>;

    #[inline]
    fn with_hash_function(&self, hash: N) -> Self::Output {
        LinearProbing::new(hash)
    }
}

/// Double hashing: the first hash picks the initial bucket, the second one the step.
///
/// Spreads keys with a high multiplicity much better than [`LinearProbing`]; it is the default
/// probing scheme of [`StaticMultiset`](crate::StaticMultiset).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoubleHashing<H1, H2> {
    hasher1: H1,
    hasher2: H2,
}

impl<H1, H2> DoubleHashing<H1, H2> {
    /// Creates a new [`DoubleHashing`] with the given hash functions.
    #[inline]
    pub const fn new(hasher1: H1, hasher2: H2) -> Self {
        Self { hasher1, hasher2 }
    }

    /// Returns the hash functions.
    #[inline]
    pub fn hash_function(&self) -> (H1, H2)
    where
        H1: Clone,
        H2: Clone,
    {
        (self.hasher1.clone(), self.hasher2.clone())
    }
}

impl Default for DoubleHashing<XxHash64, XxHash64> {
    #[inline]
    fn default() -> Self {
        Self::new(XxHash64::new(0), XxHash64::new(1))
    }
}

impl<Q: ?Sized, H1: Hash<Q>, H2: Hash<Q>> ProbingScheme<Q> for DoubleHashing<H1, H2> {
    #[inline]
    fn make_iterator(&self, key: &Q, bucket_size: usize, capacity: usize) -> ProbingIterator {
        let num_buckets = capacity / bucket_size;
        let start = reduce(self.hasher1.hash(key), num_buckets) * bucket_size;
        let step = if num_buckets > 1 {
            reduce(self.hasher2.hash(key), num_buckets - 1) + 1
        } else {
            1
        };
        ProbingIterator::new(start, step * bucket_size, capacity)
    }
}

impl<H1, H2> BucketCount for DoubleHashing<H1, H2> {
    #[inline]
    fn requires_prime_buckets(&self) -> bool {
        true
    }
}

impl<H1, H2, N1, N2> WithHashFunction<(N1, N2)> for DoubleHashing<H1, H2> {
    type Output = DoubleHashing<N1, N2>;

    #[inline]
    fn with_hash_function(&self, hash: (N1, N2)) -> Self::Output {
        DoubleHashing::new(hash.0, hash.1)
    }
}

/// Maps a hash value onto `[0, bound)`.
#[inline]
fn reduce(hash: u64, bound: usize) -> usize {
    // `bound` fits into `u64` on every supported target, and the result is below `bound`.
    #[allow(clippy::cast_possible_truncation)]
    let reduced = (hash % bound as u64) as usize;
    reduced
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hash::IdentityHash;

    fn sequence<P: ProbingScheme<u64>>(
        p: &P,
        key: u64,
        bucket_size: usize,
        capacity: usize,
    ) -> Vec<usize> {
        let mut iter = p.make_iterator(&key, bucket_size, capacity);
        let mut visited = vec![iter.current()];
        while iter.advance() {
            visited.push(iter.current());
        }
        visited
    }

    #[test]
    fn linear() {
        let p = LinearProbing::new(IdentityHash);
        assert_eq!(sequence(&p, 6, 1, 8), vec![6, 7, 0, 1, 2, 3, 4, 5]);
        assert_eq!(sequence(&p, 5, 2, 8), vec![2, 4, 6, 0]);
    }

    #[test]
    fn double_hashing_covers_all_buckets() {
        let p = DoubleHashing::new(IdentityHash, XxHash64::new(11));
        for key in 0..64 {
            let mut visited = sequence(&p, key, 2, 26);
            assert_eq!(visited.len(), 13);
            visited.sort_unstable();
            assert_eq!(visited, (0..13).map(|b| b * 2).collect::<Vec<_>>());
        }
    }

    #[test]
    fn single_bucket() {
        let p = DoubleHashing::<XxHash64, XxHash64>::default();
        assert_eq!(sequence(&p, 42, 4, 4), vec![0]);
    }

    #[test]
    fn rebind() {
        let p = LinearProbing::new(XxHash64::new(3)).with_hash_function(IdentityHash);
        assert_eq!(p.make_iterator(&9_u64, 1, 16).current(), 9);
        let d = DoubleHashing::<XxHash64, XxHash64>::default()
            .with_hash_function((IdentityHash, IdentityHash));
        assert_eq!(d.make_iterator(&9_u64, 1, 13).current(), 9);
    }
}
