//! [`OpenAddressing`] is the engine behind [`StaticMultiset`](crate::StaticMultiset): it owns
//! the slot storage and turns batches of keys into kernels issued on a [`Stream`].

use crate::device::DeviceBuffer;
use crate::key::{EmptyKey, ErasedKey};
use crate::key_equal::KeyEqual;
use crate::multiset_ref::{Locator, MultisetRef, SlotEncoding};
use crate::operator::{Operator, OperatorSet};
use crate::probing::{BucketCount, ProbingScheme};
use crate::scope::ThreadScope;
use crate::storage::{make_valid_extent, Extent, SlotStorage, StorageLayout, StorageRef};
use crate::stream::Stream;
use crate::{Error, Key, Result};
use rayon::prelude::*;
use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

/// Open-addressing slot array with bulk, stream-ordered operations.
///
/// Every `*_async` method validates its arguments, copies the input keys, and issues one kernel
/// on the stream; nothing waits for the kernel to finish. Blocking methods issue a kernel and
/// synchronize the stream.
pub struct OpenAddressing<K: Key, E, P> {
    storage: Arc<SlotStorage<K>>,
    encoding: SlotEncoding<K>,
    key_eq: E,
    probing_scheme: P,
    scope: ThreadScope,
}

impl<K, E, P> OpenAddressing<K, E, P>
where
    K: Key,
    E: KeyEqual<K, K>,
    P: ProbingScheme<K> + BucketCount,
{
    /// Allocates at least `capacity` slots on the device of `stream`, and issues the kernel that
    /// fills them with the empty sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] or [`Error::Allocation`] if the slots could not be
    /// allocated, and [`Error::StreamClosed`] if the fill kernel could not be issued.
    pub fn new<S: StorageLayout>(
        capacity: usize,
        empty_key: EmptyKey<K>,
        erased_key: ErasedKey<K>,
        key_eq: E,
        probing_scheme: P,
        scope: ThreadScope,
        stream: &Stream,
    ) -> Result<Self> {
        let extent = make_valid_extent::<S, P>(capacity, &probing_scheme)?;
        let storage = SlotStorage::allocate(stream.device(), extent, S::BUCKET_SIZE)?;
        let engine = Self {
            storage: Arc::new(storage),
            encoding: SlotEncoding::new(empty_key, erased_key),
            key_eq,
            probing_scheme,
            scope,
        };
        log::debug!(
            "open addressing: requested {capacity}, extent {extent}, {:?}",
            engine.encoding
        );
        engine.clear_async(stream)?;
        Ok(engine)
    }

    /// Resets every slot to the empty sentinel and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn clear(&self, stream: &Stream) -> Result<()> {
        self.clear_async(stream)?;
        stream.synchronize()
    }

    /// Issues the kernel resetting every slot to the empty sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn clear_async(&self, stream: &Stream) -> Result<()> {
        let storage = self.storage.clone();
        let empty = self.encoding.empty_key();
        let order = self.scope.store();
        log::debug!("clearing {} slots", storage.capacity());
        stream.enqueue(
            "clear",
            Box::new(move |_| {
                storage
                    .slots()
                    .par_iter()
                    .for_each(|slot| K::store(slot, empty, order));
                Ok(())
            }),
        )
    }

    /// Issues the kernel inserting `keys`.
    ///
    /// The kernel records [`Error::CapacityExhausted`] on the stream if any key could not be
    /// placed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn insert_async(&self, keys: &[K], stream: &Stream) -> Result<()> {
        let inserter = self.make_ref(Operator::Insert)?;
        let keys = keys.to_vec();
        stream.enqueue(
            "insert",
            Box::new(move |_| {
                let dropped = keys
                    .par_iter()
                    .filter(|key| !inserter.insert(**key))
                    .count();
                exhausted(dropped)
            }),
        )
    }

    /// Issues the kernel inserting each `keys[i]` for which `pred(&stencil[i])` holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `stencil` and `keys` differ in length, and
    /// [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn insert_if_async<T, F>(
        &self,
        keys: &[K],
        stencil: &[T],
        pred: F,
        stream: &Stream,
    ) -> Result<()>
    where
        T: Copy + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        check_len(keys.len(), stencil.len())?;
        let inserter = self.make_ref(Operator::Insert)?;
        let keys = keys.to_vec();
        let stencil = stencil.to_vec();
        stream.enqueue(
            "insert_if",
            Box::new(move |_| {
                let dropped = keys
                    .par_iter()
                    .zip(stencil.par_iter())
                    .filter(|&(key, s)| pred(s) && !inserter.insert(*key))
                    .count();
                exhausted(dropped)
            }),
        )
    }

    /// Issues the kernel erasing one occurrence of each of `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ErasureUnsupported`] in the compact slot encoding, and
    /// [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn erase_async(&self, keys: &[K], stream: &Stream) -> Result<()> {
        let eraser = self.make_ref(Operator::Erase)?;
        let keys = keys.to_vec();
        stream.enqueue(
            "erase",
            Box::new(move |_| {
                keys.par_iter().for_each(|key| {
                    eraser.erase(key);
                });
                Ok(())
            }),
        )
    }

    /// Issues the kernel writing `output[i] = contains(keys[i])`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `output` and `keys` differ in length, and
    /// [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn contains_async(
        &self,
        keys: &[K],
        output: &DeviceBuffer<bool>,
        stream: &Stream,
    ) -> Result<()> {
        check_len(keys.len(), output.len())?;
        let finder = self.make_ref(Operator::Contains)?;
        let keys = keys.to_vec();
        let output = output.clone();
        stream.enqueue(
            "contains",
            Box::new(move |_| {
                let found: Vec<bool> = keys.par_iter().map(|key| finder.contains(key)).collect();
                output.publish(found);
                Ok(())
            }),
        )
    }

    /// Issues the kernel writing `output[i] = contains(keys[i])` for each `i` where
    /// `pred(&stencil[i])` holds; the other outputs are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `stencil` or `output` differ in length from `keys`,
    /// and [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn contains_if_async<T, F>(
        &self,
        keys: &[K],
        stencil: &[T],
        pred: F,
        output: &DeviceBuffer<bool>,
        stream: &Stream,
    ) -> Result<()>
    where
        T: Copy + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        check_len(keys.len(), stencil.len())?;
        check_len(keys.len(), output.len())?;
        let finder = self.make_ref(Operator::Contains)?;
        let keys = keys.to_vec();
        let stencil = stencil.to_vec();
        let output = output.clone();
        stream.enqueue(
            "contains_if",
            Box::new(move |_| {
                let found: Vec<Option<bool>> = keys
                    .par_iter()
                    .zip(stencil.par_iter())
                    .map(|(key, s)| pred(s).then(|| finder.contains(key)))
                    .collect();
                output.publish_some(&found);
                Ok(())
            }),
        )
    }

    /// Issues the kernel writing the [`Locator`] of an occurrence of `keys[i]` to `output[i]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `output` and `keys` differ in length, and
    /// [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn find_async(
        &self,
        keys: &[K],
        output: &DeviceBuffer<Locator>,
        stream: &Stream,
    ) -> Result<()> {
        check_len(keys.len(), output.len())?;
        let finder = self.make_ref(Operator::Find)?;
        let keys = keys.to_vec();
        let output = output.clone();
        stream.enqueue(
            "find",
            Box::new(move |_| {
                let located: Vec<Locator> = keys.par_iter().map(|key| finder.find(key)).collect();
                output.publish(located);
                Ok(())
            }),
        )
    }

    /// Reads the key stored in the slot `locator` names.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn key_at(&self, locator: Locator, stream: &Stream) -> Result<Option<K>> {
        let finder = self.make_ref(Operator::Find)?;
        let output = DeviceBuffer::filled(1, None);
        let result = output.clone();
        stream.enqueue(
            "key_at",
            Box::new(move |_| {
                output.publish(vec![finder.key_at(locator)]);
                Ok(())
            }),
        )?;
        stream.synchronize()?;
        Ok(result.to_vec().into_iter().flatten().next())
    }

    /// Counts the occurrences of all the `keys`, using the query-side `key_eq` and
    /// `probing_scheme`, and waits for the result.
    ///
    /// With `outer` set, keys without any occurrence count as one.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn count<Q, E2, P2>(
        &self,
        keys: &[Q],
        key_eq: E2,
        probing_scheme: P2,
        outer: bool,
        stream: &Stream,
    ) -> Result<usize>
    where
        Q: Clone + Send + Sync + 'static,
        E2: KeyEqual<Q, K>,
        P2: ProbingScheme<Q>,
    {
        let counter = MultisetRef::new(
            self.storage_ref(),
            self.encoding,
            key_eq,
            probing_scheme,
            self.scope,
            Operator::Count.into(),
        )?;
        let keys = keys.to_vec();
        let total = Arc::new(AtomicUsize::new(0));
        let result = total.clone();
        stream.enqueue(
            if outer { "count_outer" } else { "count" },
            Box::new(move |_| {
                let sum: usize = if outer {
                    keys.par_iter().map(|key| counter.count_outer(key)).sum()
                } else {
                    keys.par_iter().map(|key| counter.count(key)).sum()
                };
                total.store(sum, Relaxed);
                Ok(())
            }),
        )?;
        stream.synchronize()?;
        Ok(result.load(Relaxed))
    }

    /// Counts the occupied slots and waits for the result.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn size(&self, stream: &Stream) -> Result<usize> {
        let counter = self.make_ref(Operator::Count)?;
        let total = Arc::new(AtomicUsize::new(0));
        let result = total.clone();
        stream.enqueue(
            "size",
            Box::new(move |_| {
                let slots = counter.storage_ref().slots();
                let occupied = slots
                    .par_chunks(counter.storage_ref().bucket_size().max(64))
                    .map(|chunk| counter.occupied(chunk))
                    .sum();
                total.store(occupied, Relaxed);
                Ok(())
            }),
        )?;
        stream.synchronize()?;
        Ok(result.load(Relaxed))
    }

    /// Creates a device reference bound to `operators`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoOperators`] if `operators` is empty, and
    /// [`Error::ErasureUnsupported`] if [`Operator::Erase`] is requested in the compact encoding.
    pub fn make_ref<O: Into<OperatorSet>>(&self, operators: O) -> Result<MultisetRef<K, E, P>> {
        MultisetRef::new(
            self.storage_ref(),
            self.encoding,
            self.key_eq.clone(),
            self.probing_scheme.clone(),
            self.scope,
            operators.into(),
        )
    }
}

impl<K: Key, E, P> OpenAddressing<K, E, P> {
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

    /// Returns the thread scope.
    #[inline]
    pub fn scope(&self) -> ThreadScope {
        self.scope
    }

    /// Returns a reference to the slot storage.
    #[inline]
    pub fn storage_ref(&self) -> StorageRef<K> {
        StorageRef::new(self.storage.clone())
    }

    /// Returns the slot storage.
    #[inline]
    pub fn storage(&self) -> &SlotStorage<K> {
        &self.storage
    }
}

impl<K: Key, E: Debug, P: Debug> Debug for OpenAddressing<K, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAddressing")
            .field("storage", &self.storage)
            .field("encoding", &self.encoding)
            .field("key_eq", &self.key_eq)
            .field("probing_scheme", &self.probing_scheme)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Fails with [`Error::LengthMismatch`] unless `actual == expected`.
#[inline]
pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::LengthMismatch { expected, actual })
    }
}

#[inline]
fn exhausted(dropped: usize) -> Result<()> {
    if dropped == 0 {
        Ok(())
    } else {
        Err(Error::CapacityExhausted { dropped })
    }
}
