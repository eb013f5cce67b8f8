//! [`MultisetRef`] is the operator-bound device view of a multiset.

use crate::key::{EmptyKey, ErasedKey};
use crate::key_equal::KeyEqual;
use crate::operator::{Operator, OperatorSet};
use crate::probing::{ProbingScheme, WithHashFunction};
use crate::scope::ThreadScope;
use crate::storage::{Extent, StorageRef};
use crate::{Error, Key, Result};
use std::fmt::{self, Debug};
use std::ops::ControlFlow;

/// The device encoding of slot states.
///
/// The encoding is a pure function of the bit patterns of the two sentinels: bit-identical
/// sentinels leave every slot either empty or occupied, distinct sentinels add a third,
/// tombstone state that erasure relies on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SlotEncoding<K> {
    /// Binary slots; erasure is not supported.
    Compact {
        /// The empty sentinel, also used as the erased sentinel.
        empty: K,
    },
    /// Empty, occupied, or erased slots.
    Extended {
        /// The empty sentinel.
        empty: K,
        /// The erased sentinel.
        erased: K,
    },
}

impl<K: Key> SlotEncoding<K> {
    /// Chooses the encoding by comparing the bit patterns of the sentinels.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_multiset::{EmptyKey, ErasedKey, SlotEncoding};
    ///
    /// let compact = SlotEncoding::new(EmptyKey(-1_i32), ErasedKey(-1));
    /// assert!(!compact.is_extended());
    ///
    /// // `0.0 == -0.0`, but the bit patterns differ.
    /// let extended = SlotEncoding::new(EmptyKey(0.0_f32), ErasedKey(-0.0));
    /// assert!(extended.is_extended());
    /// ```
    #[inline]
    pub fn new(empty: EmptyKey<K>, erased: ErasedKey<K>) -> Self {
        if empty.get().bitwise_eq(erased.get()) {
            SlotEncoding::Compact { empty: empty.get() }
        } else {
            SlotEncoding::Extended {
                empty: empty.get(),
                erased: erased.get(),
            }
        }
    }

    /// Returns the empty sentinel.
    #[inline]
    pub fn empty_key(&self) -> K {
        match *self {
            SlotEncoding::Compact { empty } | SlotEncoding::Extended { empty, .. } => empty,
        }
    }

    /// Returns the erased sentinel.
    #[inline]
    pub fn erased_key(&self) -> K {
        match *self {
            SlotEncoding::Compact { empty } => empty,
            SlotEncoding::Extended { erased, .. } => erased,
        }
    }

    /// Returns `true` for the tombstone-capable encoding.
    #[inline]
    pub fn is_extended(&self) -> bool {
        matches!(self, SlotEncoding::Extended { .. })
    }

    /// Classifies the content of a slot. Sentinels are always detected bitwise.
    #[inline]
    fn classify(&self, slot_key: K) -> SlotState {
        match *self {
            SlotEncoding::Compact { empty } if slot_key.bitwise_eq(empty) => SlotState::Empty,
            SlotEncoding::Extended { empty, .. } if slot_key.bitwise_eq(empty) => SlotState::Empty,
            SlotEncoding::Extended { erased, .. } if slot_key.bitwise_eq(erased) => {
                SlotState::Erased
            }
            _ => SlotState::Occupied,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Erased,
    Occupied,
}

/// Identifies the slot a key was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Locator(usize);

impl Locator {
    /// The locator of a key that was not found.
    pub const NOT_FOUND: Locator = Locator(usize::MAX);

    /// Returns the slot index, or `None` for [`Locator::NOT_FOUND`].
    #[inline]
    #[must_use]
    pub fn index(self) -> Option<usize> {
        (self != Self::NOT_FOUND).then_some(self.0)
    }

    /// Returns `true` unless `self` is [`Locator::NOT_FOUND`].
    #[inline]
    #[must_use]
    pub fn is_found(self) -> bool {
        self != Self::NOT_FOUND
    }
}

impl Default for Locator {
    #[inline]
    fn default() -> Self {
        Self::NOT_FOUND
    }
}

/// A copyable device view of a multiset, bound to a set of [`Operator`] values.
///
/// A [`MultisetRef`] shares the slot storage with the multiset it was created from; it is what
/// the bulk kernels run per key on every execution unit, and it can be used directly from any
/// thread for fine-grained access.
///
/// Calling an operation whose [`Operator`] is not bound to the reference panics.
///
/// # Examples
///
/// ```
/// use static_multiset::{Device, EmptyKey, Operator, StaticMultiset, Stream};
///
/// let device = Device::new().unwrap();
/// let stream = Stream::new(&device).unwrap();
/// let multiset: StaticMultiset<u32> =
///     StaticMultiset::new(32, EmptyKey(u32::MAX), &stream).unwrap();
/// stream.synchronize().unwrap();
///
/// let inserter = multiset.device_ref([Operator::Insert, Operator::Count]).unwrap();
/// assert!(inserter.insert(7));
/// assert!(inserter.insert(7));
/// assert_eq!(inserter.count(&7), 2);
/// ```
pub struct MultisetRef<K: Key, E, P> {
    storage: StorageRef<K>,
    encoding: SlotEncoding<K>,
    key_eq: E,
    probing_scheme: P,
    scope: ThreadScope,
    operators: OperatorSet,
}

impl<K: Key, E: Clone, P: Clone> MultisetRef<K, E, P> {
    pub(crate) fn new(
        storage: StorageRef<K>,
        encoding: SlotEncoding<K>,
        key_eq: E,
        probing_scheme: P,
        scope: ThreadScope,
        operators: OperatorSet,
    ) -> Result<Self> {
        if operators.is_empty() {
            return Err(Error::NoOperators);
        }
        if operators.contains(Operator::Erase) && !encoding.is_extended() {
            return Err(Error::ErasureUnsupported);
        }
        Ok(Self {
            storage,
            encoding,
            key_eq,
            probing_scheme,
            scope,
            operators,
        })
    }

    /// Returns a copy of `self` bound to a different set of operators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoOperators`] if `operators` is empty, and
    /// [`Error::ErasureUnsupported`] if [`Operator::Erase`] is requested in the compact encoding.
    pub fn with_operators<O: Into<OperatorSet>>(&self, operators: O) -> Result<Self> {
        Self::new(
            self.storage.clone(),
            self.encoding,
            self.key_eq.clone(),
            self.probing_scheme.clone(),
            self.scope,
            operators.into(),
        )
    }

    /// Returns a copy of `self` comparing keys with `key_eq`.
    #[must_use]
    pub fn with_key_eq<N>(&self, key_eq: N) -> MultisetRef<K, N, P> {
        MultisetRef {
            storage: self.storage.clone(),
            encoding: self.encoding,
            key_eq,
            probing_scheme: self.probing_scheme.clone(),
            scope: self.scope,
            operators: self.operators,
        }
    }

    /// Returns a copy of `self` probing with `hash` in place of the hash function of the probing
    /// scheme.
    ///
    /// Keys are only found if `hash` agrees with the original hash function on equal keys.
    #[must_use]
    pub fn with_hash_function<H>(&self, hash: H) -> MultisetRef<K, E, P::Output>
    where
        P: WithHashFunction<H>,
    {
        MultisetRef {
            storage: self.storage.clone(),
            encoding: self.encoding,
            key_eq: self.key_eq.clone(),
            probing_scheme: self.probing_scheme.with_hash_function(hash),
            scope: self.scope,
            operators: self.operators,
        }
    }
}

impl<K: Key, E, P> MultisetRef<K, E, P> {
    /// Returns the number of slots.
    #[inline]
    pub fn capacity(&self) -> Extent {
        self.storage.capacity()
    }

    /// Returns the empty sentinel.
    #[inline]
    pub fn empty_key_sentinel(&self) -> K {
        self.encoding.empty_key()
    }

    /// Returns the erased sentinel.
    #[inline]
    pub fn erased_key_sentinel(&self) -> K {
        self.encoding.erased_key()
    }

    /// Returns the slot encoding.
    #[inline]
    pub fn slot_encoding(&self) -> SlotEncoding<K> {
        self.encoding
    }

    /// Returns the bound operators.
    #[inline]
    pub fn operators(&self) -> OperatorSet {
        self.operators
    }

    /// Returns the key equality predicate.
    #[inline]
    pub fn key_eq(&self) -> &E {
        &self.key_eq
    }

    /// Returns the probing scheme.
    #[inline]
    pub fn probing_scheme(&self) -> &P {
        &self.probing_scheme
    }

    /// Returns the slot storage.
    #[inline]
    pub fn storage_ref(&self) -> &StorageRef<K> {
        &self.storage
    }

    /// Returns the thread scope.
    #[inline]
    pub fn scope(&self) -> ThreadScope {
        self.scope
    }

    /// Inserts `key`.
    ///
    /// Equal keys are all retained. Returns `false` if no empty or erased slot was found within a
    /// full probing cycle.
    ///
    /// # Panics
    ///
    /// Panics if [`Operator::Insert`] is not bound to `self`.
    pub fn insert(&self, key: K) -> bool
    where
        P: ProbingScheme<K>,
    {
        self.require(Operator::Insert);
        self.walk(&key, |_, bucket| {
            for slot in bucket {
                let mut observed = K::load(slot, self.scope.load());
                while self.encoding.classify(observed) != SlotState::Occupied {
                    match K::compare_exchange(
                        slot,
                        observed,
                        key,
                        self.scope.read_modify_write(),
                        self.scope.load(),
                    ) {
                        Ok(_) => return ControlFlow::Break(()),
                        Err(actual) => observed = actual,
                    }
                }
            }
            ControlFlow::Continue(())
        })
        .is_some()
    }

    /// Returns `true` if at least one occurrence of `key` is present.
    ///
    /// # Panics
    ///
    /// Panics if [`Operator::Contains`] is not bound to `self`.
    pub fn contains<Q: ?Sized>(&self, key: &Q) -> bool
    where
        E: KeyEqual<Q, K>,
        P: ProbingScheme<Q>,
    {
        self.require(Operator::Contains);
        self.locate(key).is_found()
    }

    /// Returns the [`Locator`] of an occurrence of `key`, or [`Locator::NOT_FOUND`].
    ///
    /// Which occurrence is located is unspecified when `key` is present more than once.
    ///
    /// # Panics
    ///
    /// Panics if [`Operator::Find`] is not bound to `self`.
    pub fn find<Q: ?Sized>(&self, key: &Q) -> Locator
    where
        E: KeyEqual<Q, K>,
        P: ProbingScheme<Q>,
    {
        self.require(Operator::Find);
        self.locate(key)
    }

    /// Returns the key stored in the slot `locator` names, if the slot is still occupied.
    ///
    /// # Panics
    ///
    /// Panics if [`Operator::Find`] is not bound to `self`.
    pub fn key_at(&self, locator: Locator) -> Option<K> {
        self.require(Operator::Find);
        let slot = self.storage.slots().get(locator.index()?)?;
        let key = K::load(slot, self.scope.load());
        (self.encoding.classify(key) == SlotState::Occupied).then_some(key)
    }

    /// Returns the number of occurrences of `key`.
    ///
    /// # Panics
    ///
    /// Panics if [`Operator::Count`] is not bound to `self`.
    pub fn count<Q: ?Sized>(&self, key: &Q) -> usize
    where
        E: KeyEqual<Q, K>,
        P: ProbingScheme<Q>,
    {
        self.require(Operator::Count);
        let mut total = 0;
        self.walk(key, |_, bucket| {
            let mut reached_empty = false;
            for slot in bucket {
                let slot_key = K::load(slot, self.scope.load());
                match self.encoding.classify(slot_key) {
                    SlotState::Empty => reached_empty = true,
                    SlotState::Erased => (),
                    SlotState::Occupied => {
                        if self.key_eq.equal(key, &slot_key) {
                            total += 1;
                        }
                    }
                }
            }
            if reached_empty {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        total
    }

    /// Returns the number of occurrences of `key`, or `1` if there are none.
    ///
    /// # Panics
    ///
    /// Panics if [`Operator::Count`] is not bound to `self`.
    #[inline]
    pub fn count_outer<Q: ?Sized>(&self, key: &Q) -> usize
    where
        E: KeyEqual<Q, K>,
        P: ProbingScheme<Q>,
    {
        self.count(key).max(1)
    }

    /// Turns one occurrence of `key` into a tombstone.
    ///
    /// Returns `false` if `key` was not present.
    ///
    /// # Panics
    ///
    /// Panics if [`Operator::Erase`] is not bound to `self`.
    pub fn erase<Q: ?Sized>(&self, key: &Q) -> bool
    where
        E: KeyEqual<Q, K>,
        P: ProbingScheme<Q>,
    {
        self.require(Operator::Erase);
        let erased = self.encoding.erased_key();
        self.walk(key, |_, bucket| {
            let mut reached_empty = false;
            for slot in bucket {
                let mut observed = K::load(slot, self.scope.load());
                loop {
                    match self.encoding.classify(observed) {
                        SlotState::Empty => {
                            reached_empty = true;
                            break;
                        }
                        SlotState::Erased => break,
                        SlotState::Occupied if !self.key_eq.equal(key, &observed) => break,
                        SlotState::Occupied => (),
                    }
                    match K::compare_exchange(
                        slot,
                        observed,
                        erased,
                        self.scope.read_modify_write(),
                        self.scope.load(),
                    ) {
                        Ok(_) => return ControlFlow::Break(true),
                        Err(actual) => observed = actual,
                    }
                }
            }
            if reached_empty {
                ControlFlow::Break(false)
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap_or(false)
    }

    /// Returns the number of occupied slots in `slots`.
    pub(crate) fn occupied(&self, slots: &[K::Atomic]) -> usize {
        slots
            .iter()
            .filter(|slot| {
                self.encoding.classify(K::load(slot, self.scope.load())) == SlotState::Occupied
            })
            .count()
    }

    fn locate<Q: ?Sized>(&self, key: &Q) -> Locator
    where
        E: KeyEqual<Q, K>,
        P: ProbingScheme<Q>,
    {
        self.walk(key, |base, bucket| {
            let mut reached_empty = false;
            for (offset, slot) in bucket.iter().enumerate() {
                let slot_key = K::load(slot, self.scope.load());
                match self.encoding.classify(slot_key) {
                    SlotState::Empty => reached_empty = true,
                    SlotState::Erased => (),
                    SlotState::Occupied => {
                        if self.key_eq.equal(key, &slot_key) {
                            return ControlFlow::Break(Locator(base + offset));
                        }
                    }
                }
            }
            if reached_empty {
                ControlFlow::Break(Locator::NOT_FOUND)
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap_or(Locator::NOT_FOUND)
    }

    /// Visits the buckets of the probing sequence of `key` until `visit` breaks or the sequence
    /// wraps around.
    fn walk<Q: ?Sized, R, F>(&self, key: &Q, mut visit: F) -> Option<R>
    where
        P: ProbingScheme<Q>,
        F: FnMut(usize, &[K::Atomic]) -> ControlFlow<R>,
    {
        let slots = self.storage.slots();
        let bucket_size = self.storage.bucket_size();
        let mut iter = self
            .probing_scheme
            .make_iterator(key, bucket_size, slots.len());
        loop {
            let base = iter.current();
            if let ControlFlow::Break(result) = visit(base, &slots[base..base + bucket_size]) {
                return Some(result);
            }
            if !iter.advance() {
                return None;
            }
        }
    }

    #[inline]
    fn require(&self, op: Operator) {
        assert!(
            self.operators.contains(op),
            "operator {op:?} is not bound to this reference (bound: {:?})",
            self.operators
        );
    }
}

impl<K: Key, E: Clone, P: Clone> Clone for MultisetRef<K, E, P> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            encoding: self.encoding,
            key_eq: self.key_eq.clone(),
            probing_scheme: self.probing_scheme.clone(),
            scope: self.scope,
            operators: self.operators,
        }
    }
}

impl<K: Key, E: Debug, P: Debug> Debug for MultisetRef<K, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultisetRef")
            .field("storage", &self.storage)
            .field("encoding", &self.encoding)
            .field("key_eq", &self.key_eq)
            .field("probing_scheme", &self.probing_scheme)
            .field("scope", &self.scope)
            .field("operators", &self.operators)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::Device;
    use crate::hash::IdentityHash;
    use crate::key_equal::DefaultKeyEqual;
    use crate::probing::LinearProbing;
    use crate::storage::SlotStorage;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::Arc;

    fn view(
        capacity: usize,
        bucket_size: usize,
        encoding: SlotEncoding<i32>,
    ) -> MultisetRef<i32, DefaultKeyEqual, LinearProbing<IdentityHash>> {
        let device = Device::builder().num_workers(1).build().unwrap();
        let storage = SlotStorage::<i32>::allocate(&device, capacity, bucket_size).unwrap();
        storage
            .slots()
            .iter()
            .for_each(|s| <i32 as Key>::store(s, encoding.empty_key(), Relaxed));
        MultisetRef::new(
            StorageRef::new(Arc::new(storage)),
            encoding,
            DefaultKeyEqual,
            LinearProbing::new(IdentityHash),
            ThreadScope::Thread,
            Operator::ALL
                .into_iter()
                .filter(|op| encoding.is_extended() || *op != Operator::Erase)
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn encoding() {
        let compact = SlotEncoding::new(EmptyKey(-1), ErasedKey(-1));
        assert_eq!(compact, SlotEncoding::Compact { empty: -1 });
        assert_eq!(compact.erased_key(), -1);
        assert_eq!(compact.classify(-1), SlotState::Empty);
        let extended = SlotEncoding::new(EmptyKey(-1), ErasedKey(-2));
        assert_eq!(extended.classify(-2), SlotState::Erased);
        assert_eq!(extended.classify(0), SlotState::Occupied);
        let float = SlotEncoding::new(EmptyKey(f64::NAN), ErasedKey(f64::NAN));
        assert!(!float.is_extended());
        assert_eq!(float.classify(f64::NAN), SlotState::Empty);
    }

    #[test]
    fn multiset_ops() {
        let r = view(8, 1, SlotEncoding::new(EmptyKey(-1), ErasedKey(-2)));
        for key in [3, 3, 5, 3, 11] {
            assert!(r.insert(key));
        }
        assert_eq!(r.count(&3), 3);
        assert_eq!(r.count(&11), 1);
        assert_eq!(r.count_outer(&7), 1);
        assert!(r.contains(&5));
        assert!(!r.contains(&7));
        let locator = r.find(&11);
        assert_eq!(r.key_at(locator), Some(11));
        assert_eq!(r.find(&19), Locator::NOT_FOUND);
        assert_eq!(r.key_at(Locator::NOT_FOUND), None);

        assert!(r.erase(&3));
        assert_eq!(r.count(&3), 2);
        // Tombstones do not cut probing sequences short.
        assert!(r.contains(&11));
        assert!(r.insert(19));
        assert_eq!(r.count(&19), 1);
        assert_eq!(r.occupied(r.storage_ref().slots()), 5);
    }

    #[test]
    fn buckets() {
        let r = view(8, 4, SlotEncoding::new(EmptyKey(-1), ErasedKey(-1)));
        for _ in 0..6 {
            assert!(r.insert(2));
        }
        assert_eq!(r.count(&2), 6);
        assert!(r.insert(2));
        assert!(r.insert(2));
        assert!(!r.insert(2));
        assert_eq!(r.count(&2), 8);
    }

    #[test]
    fn operators() {
        let r = view(4, 1, SlotEncoding::new(EmptyKey(-1), ErasedKey(-1)));
        assert!(matches!(
            r.with_operators(Operator::Erase),
            Err(Error::ErasureUnsupported)
        ));
        assert!(matches!(
            r.with_operators([] as [Operator; 0]),
            Err(Error::NoOperators)
        ));
        let counter = r.with_operators(Operator::Count).unwrap();
        assert_eq!(counter.count(&1), 0);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| counter.insert(1)));
        assert!(outcome.is_err());
    }
}
