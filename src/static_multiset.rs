//! [`StaticMultiset`] is a fixed-capacity multiset living in device memory.

use crate::device::{Device, DeviceBuffer};
use crate::hash::XxHash64;
use crate::key::{EmptyKey, ErasedKey};
use crate::key_equal::{DefaultKeyEqual, KeyEqual};
use crate::multiset_ref::{Locator, MultisetRef, SlotEncoding};
use crate::open_addressing::{check_len, OpenAddressing};
use crate::operator::OperatorSet;
use crate::probing::{BucketCount, DoubleHashing, ProbingScheme, WithHashFunction};
use crate::scope::ThreadScope;
use crate::storage::{BucketStorage, Extent, StorageLayout, StorageRef};
use crate::stream::Stream;
use crate::{Error, Key, Result};
use std::fmt::{self, Debug};
use std::marker::PhantomData;

/// Fixed-capacity, open-addressing multiset operated on by batches of keys.
///
/// Every operation takes a [`Stream`] and is executed as a kernel on the device of the stream.
/// The blocking form of an operation issues the kernel and then synchronizes the stream; the
/// `*_async` form only issues the kernel, leaving it to the caller to synchronize the stream
/// before relying on the result. Batches of zero keys return immediately without touching the
/// stream.
///
/// Equal keys are all retained. The capacity is fixed at construction: keys that cannot be
/// placed are dropped and reported as [`Error::CapacityExhausted`].
///
/// ## The key domain
///
/// The empty sentinel, and the erased sentinel if one is configured, are reserved values: they
/// must never be inserted.
///
/// ## Slot encoding
///
/// A multiset constructed with an erased sentinel whose bit pattern differs from that of the empty
/// sentinel uses the [`SlotEncoding::Extended`] encoding and supports [`StaticMultiset::erase`];
/// otherwise slots are binary and erasure fails with [`Error::ErasureUnsupported`].
///
/// # Examples
///
/// ```
/// use static_multiset::{Device, EmptyKey, StaticMultiset, Stream};
///
/// let device = Device::new().unwrap();
/// let stream = Stream::new(&device).unwrap();
/// let multiset: StaticMultiset<i32> =
///     StaticMultiset::new(16, EmptyKey(-1), &stream).unwrap();
///
/// multiset.insert(&[3, 3, 5, 3], &stream).unwrap();
/// assert_eq!(multiset.size(&stream), Ok(4));
/// assert_eq!(multiset.count(&[3], &stream), Ok(3));
///
/// let mut found = [false; 3];
/// multiset.contains(&[3, 5, 7], &mut found, &stream).unwrap();
/// assert_eq!(found, [true, true, false]);
/// ```
pub struct StaticMultiset<
    K: Key,
    E = DefaultKeyEqual,
    P = DoubleHashing<XxHash64, XxHash64>,
    S = BucketStorage<1>,
> {
    engine: Box<OpenAddressing<K, E, P>>,
    layout: PhantomData<S>,
}

impl<K, E, P, S> StaticMultiset<K, E, P, S>
where
    K: Key,
    E: KeyEqual<K, K> + Default,
    P: ProbingScheme<K> + BucketCount + Default,
    S: StorageLayout,
{
    /// Creates a [`StaticMultiset`] with at least `capacity` slots, with the default key
    /// equality, probing scheme and [`ThreadScope`].
    ///
    /// The slots are initialized by a kernel issued on `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `capacity` is zero, and [`Error::Allocation`] if the
    /// device cannot hold the slots.
    pub fn new(capacity: usize, empty_key: EmptyKey<K>, stream: &Stream) -> Result<Self> {
        Self::with_parts(
            capacity,
            empty_key,
            E::default(),
            P::default(),
            ThreadScope::default(),
            stream,
        )
    }
}

impl<K, E, P, S> StaticMultiset<K, E, P, S>
where
    K: Key,
    E: KeyEqual<K, K>,
    P: ProbingScheme<K> + BucketCount,
    S: StorageLayout,
{
    /// Creates a [`StaticMultiset`] with at least `capacity` slots.
    ///
    /// The erased sentinel is the empty sentinel, therefore the multiset does not support erasure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `capacity` is zero, and [`Error::Allocation`] if the
    /// device cannot hold the slots.
    pub fn with_parts(
        capacity: usize,
        empty_key: EmptyKey<K>,
        key_eq: E,
        probing_scheme: P,
        scope: ThreadScope,
        stream: &Stream,
    ) -> Result<Self> {
        let erased_key = ErasedKey(empty_key.get());
        Self::with_erased_key(
            capacity,
            empty_key,
            erased_key,
            key_eq,
            probing_scheme,
            scope,
            stream,
        )
    }

    /// Creates a [`StaticMultiset`] sized to hold `n` keys at `desired_load_factor`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLoadFactor`] unless `desired_load_factor` lies in `(0, 1]`, and
    /// otherwise the errors of [`StaticMultiset::with_parts`].
    ///
    /// # Examples
    ///
    /// ```
    /// use static_multiset::{DefaultKeyEqual, Device, DoubleHashing, EmptyKey, StaticMultiset};
    /// use static_multiset::{Stream, ThreadScope};
    ///
    /// let device = Device::new().unwrap();
    /// let stream = Stream::new(&device).unwrap();
    /// let multiset: StaticMultiset<u64> = StaticMultiset::with_load_factor(
    ///     100,
    ///     0.5,
    ///     EmptyKey(u64::MAX),
    ///     DefaultKeyEqual,
    ///     DoubleHashing::default(),
    ///     ThreadScope::Device,
    ///     &stream,
    /// )
    /// .unwrap();
    /// assert!(multiset.capacity() >= 200);
    /// ```
    pub fn with_load_factor(
        n: usize,
        desired_load_factor: f64,
        empty_key: EmptyKey<K>,
        key_eq: E,
        probing_scheme: P,
        scope: ThreadScope,
        stream: &Stream,
    ) -> Result<Self> {
        if !(desired_load_factor > 0.0 && desired_load_factor <= 1.0) {
            return Err(Error::InvalidLoadFactor(desired_load_factor));
        }
        // The quotient is at least `n`, and saturates when it does not fit.
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss,
            clippy::cast_sign_loss
        )]
        let capacity = (n as f64 / desired_load_factor).ceil() as usize;
        Self::with_parts(capacity, empty_key, key_eq, probing_scheme, scope, stream)
    }

    /// Creates a [`StaticMultiset`] with at least `capacity` slots and a dedicated erased
    /// sentinel.
    ///
    /// The slot encoding is chosen here, once, by comparing the bit patterns of the two
    /// sentinels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `capacity` is zero, and [`Error::Allocation`] if the
    /// device cannot hold the slots.
    pub fn with_erased_key(
        capacity: usize,
        empty_key: EmptyKey<K>,
        erased_key: ErasedKey<K>,
        key_eq: E,
        probing_scheme: P,
        scope: ThreadScope,
        stream: &Stream,
    ) -> Result<Self> {
        let engine = OpenAddressing::new::<S>(
            capacity,
            empty_key,
            erased_key,
            key_eq,
            probing_scheme,
            scope,
            stream,
        )?;
        Ok(Self {
            engine: Box::new(engine),
            layout: PhantomData,
        })
    }

    /// Removes every key.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn clear(&self, stream: &Stream) -> Result<()> {
        self.engine.clear(stream)
    }

    /// Removes every key asynchronously.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn clear_async(&self, stream: &Stream) -> Result<()> {
        self.engine.clear_async(stream)
    }

    /// Inserts all the `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExhausted`] with the number of keys that could not be placed.
    pub fn insert(&self, keys: &[K], stream: &Stream) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.engine.insert_async(keys, stream)?;
        stream.synchronize()
    }

    /// Inserts all the `keys` asynchronously.
    ///
    /// Keys that cannot be placed are reported by the next synchronization of `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn insert_async(&self, keys: &[K], stream: &Stream) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.engine.insert_async(keys, stream)
    }

    /// Inserts each `keys[i]` for which `pred(&stencil[i])` is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `stencil` and `keys` differ in length, and
    /// [`Error::CapacityExhausted`] with the number of keys that could not be placed.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_multiset::{Device, EmptyKey, StaticMultiset, Stream};
    ///
    /// let device = Device::new().unwrap();
    /// let stream = Stream::new(&device).unwrap();
    /// let multiset: StaticMultiset<u32> = StaticMultiset::new(8, EmptyKey(0), &stream).unwrap();
    ///
    /// multiset.insert_if(&[1, 2, 3, 4], &[1, 2, 3, 4], |s| s % 2 == 0, &stream).unwrap();
    /// assert_eq!(multiset.count(&[1, 2, 3, 4], &stream), Ok(2));
    /// ```
    pub fn insert_if<T, F>(&self, keys: &[K], stencil: &[T], pred: F, stream: &Stream) -> Result<()>
    where
        T: Copy + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        check_len(keys.len(), stencil.len())?;
        if keys.is_empty() {
            return Ok(());
        }
        self.engine.insert_if_async(keys, stencil, pred, stream)?;
        stream.synchronize()
    }

    /// Inserts each `keys[i]` for which `pred(&stencil[i])` is `true` asynchronously.
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
        if keys.is_empty() {
            return Ok(());
        }
        self.engine.insert_if_async(keys, stencil, pred, stream)
    }

    /// Erases one occurrence of each of `keys`; keys without an occurrence left are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ErasureUnsupported`] in the compact slot encoding.
    pub fn erase(&self, keys: &[K], stream: &Stream) -> Result<()> {
        self.check_erase()?;
        if keys.is_empty() {
            return Ok(());
        }
        self.engine.erase_async(keys, stream)?;
        stream.synchronize()
    }

    /// Erases one occurrence of each of `keys` asynchronously.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ErasureUnsupported`] in the compact slot encoding, and
    /// [`Error::StreamClosed`] if the kernel could not be issued.
    pub fn erase_async(&self, keys: &[K], stream: &Stream) -> Result<()> {
        self.check_erase()?;
        if keys.is_empty() {
            return Ok(());
        }
        self.engine.erase_async(keys, stream)
    }

    /// Writes to `output[i]` whether `keys[i]` is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `output` and `keys` differ in length.
    pub fn contains(&self, keys: &[K], output: &mut [bool], stream: &Stream) -> Result<()> {
        check_len(keys.len(), output.len())?;
        if keys.is_empty() {
            return Ok(());
        }
        let buffer = DeviceBuffer::from_slice(output);
        self.engine.contains_async(keys, &buffer, stream)?;
        read_back(stream, &buffer, output)
    }

    /// Writes to `output[i]` whether `keys[i]` is present, asynchronously.
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
        if keys.is_empty() {
            return Ok(());
        }
        self.engine.contains_async(keys, output, stream)
    }

    /// Writes to `output[i]` whether `keys[i]` is present for each `i` where `pred(&stencil[i])`
    /// is `true`; the other outputs are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `stencil` or `output` differ in length from `keys`.
    pub fn contains_if<T, F>(
        &self,
        keys: &[K],
        stencil: &[T],
        pred: F,
        output: &mut [bool],
        stream: &Stream,
    ) -> Result<()>
    where
        T: Copy + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        check_len(keys.len(), stencil.len())?;
        check_len(keys.len(), output.len())?;
        if keys.is_empty() {
            return Ok(());
        }
        let buffer = DeviceBuffer::from_slice(output);
        self.engine
            .contains_if_async(keys, stencil, pred, &buffer, stream)?;
        read_back(stream, &buffer, output)
    }

    /// Writes to `output[i]` whether `keys[i]` is present for each `i` where `pred(&stencil[i])`
    /// is `true`, asynchronously.
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
        if keys.is_empty() {
            return Ok(());
        }
        self.engine
            .contains_if_async(keys, stencil, pred, output, stream)
    }

    /// Writes to `output[i]` the [`Locator`] of an occurrence of `keys[i]`, or
    /// [`Locator::NOT_FOUND`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `output` and `keys` differ in length.
    pub fn find(&self, keys: &[K], output: &mut [Locator], stream: &Stream) -> Result<()> {
        check_len(keys.len(), output.len())?;
        if keys.is_empty() {
            return Ok(());
        }
        let buffer = DeviceBuffer::from_slice(output);
        self.engine.find_async(keys, &buffer, stream)?;
        read_back(stream, &buffer, output)
    }

    /// Writes to `output[i]` the [`Locator`] of an occurrence of `keys[i]` asynchronously.
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
        if keys.is_empty() {
            return Ok(());
        }
        self.engine.find_async(keys, output, stream)
    }

    /// Returns the key stored in the slot `locator` names, or `None` if the slot is not occupied.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn key_at(&self, locator: Locator, stream: &Stream) -> Result<Option<K>> {
        if !locator.is_found() {
            return Ok(None);
        }
        self.engine.key_at(locator, stream)
    }

    /// Returns the total number of occurrences of all the `keys`.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn count(&self, keys: &[K], stream: &Stream) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.engine.count(
            keys,
            self.engine.key_eq().clone(),
            self.engine.probing_scheme().clone(),
            false,
            stream,
        )
    }

    /// Returns the total number of occurrences of all the `keys`, comparing them with
    /// `query_key_equal` and hashing them with `query_hash`.
    ///
    /// `query_hash` must hash a query key to the same value the probing scheme hashes the keys
    /// it matches to.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_multiset::{
    ///     DefaultKeyEqual, Device, EmptyKey, Equivalent, EquivalentKeyEqual, Hash, IdentityHash,
    ///     LinearProbing, StaticMultiset, Stream, ThreadScope,
    /// };
    ///
    /// #[derive(Clone)]
    /// struct Id(u16);
    ///
    /// impl Equivalent<u32> for Id {
    ///     fn equivalent(&self, key: &u32) -> bool {
    ///         u32::from(self.0) == *key
    ///     }
    /// }
    ///
    /// #[derive(Clone)]
    /// struct IdHash;
    ///
    /// impl Hash<Id> for IdHash {
    ///     fn hash(&self, id: &Id) -> u64 {
    ///         u64::from(id.0)
    ///     }
    /// }
    ///
    /// let device = Device::new().unwrap();
    /// let stream = Stream::new(&device).unwrap();
    /// let multiset: StaticMultiset<u32, DefaultKeyEqual, LinearProbing<IdentityHash>> =
    ///     StaticMultiset::with_parts(
    ///         64,
    ///         EmptyKey(u32::MAX),
    ///         DefaultKeyEqual,
    ///         LinearProbing::new(IdentityHash),
    ///         ThreadScope::Device,
    ///         &stream,
    ///     )
    ///     .unwrap();
    /// multiset.insert(&[1, 3, 3], &stream).unwrap();
    ///
    /// let queries = [Id(3), Id(4)];
    /// assert_eq!(multiset.count_with(&queries, EquivalentKeyEqual, IdHash, &stream), Ok(2));
    /// assert_eq!(multiset.count_outer(&queries, EquivalentKeyEqual, IdHash, &stream), Ok(3));
    /// ```
    pub fn count_with<Q, PE, H>(
        &self,
        keys: &[Q],
        query_key_equal: PE,
        query_hash: H,
        stream: &Stream,
    ) -> Result<usize>
    where
        Q: Clone + Send + Sync + 'static,
        PE: KeyEqual<Q, K>,
        P: WithHashFunction<H>,
        P::Output: ProbingScheme<Q>,
    {
        if keys.is_empty() {
            return Ok(0);
        }
        let probing_scheme = self.engine.probing_scheme().with_hash_function(query_hash);
        self.engine
            .count(keys, query_key_equal, probing_scheme, false, stream)
    }

    /// Returns the total number of occurrences of all the `keys`, where keys without any
    /// occurrence count as one; keys are compared with `query_key_equal` and hashed with
    /// `query_hash`.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn count_outer<Q, PE, H>(
        &self,
        keys: &[Q],
        query_key_equal: PE,
        query_hash: H,
        stream: &Stream,
    ) -> Result<usize>
    where
        Q: Clone + Send + Sync + 'static,
        PE: KeyEqual<Q, K>,
        P: WithHashFunction<H>,
        P::Output: ProbingScheme<Q>,
    {
        if keys.is_empty() {
            return Ok(0);
        }
        let probing_scheme = self.engine.probing_scheme().with_hash_function(query_hash);
        self.engine
            .count(keys, query_key_equal, probing_scheme, true, stream)
    }

    /// Returns the number of keys.
    ///
    /// # Errors
    ///
    /// Returns the fault reported by the stream.
    pub fn size(&self, stream: &Stream) -> Result<usize> {
        self.engine.size(stream)
    }

    /// Creates a device reference bound to `operators`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoOperators`] if `operators` is empty, and
    /// [`Error::ErasureUnsupported`] if [`Operator::Erase`](crate::Operator::Erase) is requested
    /// in the compact encoding.
    pub fn device_ref<O: Into<OperatorSet>>(&self, operators: O) -> Result<MultisetRef<K, E, P>> {
        self.engine.make_ref(operators)
    }

    #[inline]
    fn check_erase(&self) -> Result<()> {
        if self.supports_erase() {
            Ok(())
        } else {
            Err(Error::ErasureUnsupported)
        }
    }
}

impl<K: Key, E, P, S> StaticMultiset<K, E, P, S> {
    /// Returns the number of slots.
    #[inline]
    pub fn capacity(&self) -> Extent {
        self.engine.capacity()
    }

    /// Returns the empty sentinel.
    #[inline]
    pub fn empty_key_sentinel(&self) -> K {
        self.engine.empty_key_sentinel()
    }

    /// Returns the erased sentinel.
    #[inline]
    pub fn erased_key_sentinel(&self) -> K {
        self.engine.erased_key_sentinel()
    }

    /// Returns the key equality predicate.
    #[inline]
    pub fn key_eq(&self) -> &E {
        self.engine.key_eq()
    }

    /// Returns the probing scheme.
    #[inline]
    pub fn probing_scheme(&self) -> &P {
        self.engine.probing_scheme()
    }

    /// Returns a reference to the slot storage.
    #[inline]
    pub fn storage_ref(&self) -> StorageRef<K> {
        self.engine.storage_ref()
    }

    /// Returns the thread scope.
    #[inline]
    pub fn scope(&self) -> ThreadScope {
        self.engine.scope()
    }

    /// Returns the slot encoding.
    #[inline]
    pub fn slot_encoding(&self) -> SlotEncoding<K> {
        self.engine.slot_encoding()
    }

    /// Returns `true` if the multiset supports erasure.
    #[inline]
    pub fn supports_erase(&self) -> bool {
        self.engine.slot_encoding().is_extended()
    }

    /// Returns the device the slots live on.
    #[inline]
    pub fn device(&self) -> &Device {
        self.engine.storage().device()
    }
}

impl<K: Key, E: Debug, P: Debug, S> Debug for StaticMultiset<K, E, P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticMultiset")
            .field("engine", &self.engine)
            .finish()
    }
}

/// Synchronizes `stream` and copies `buffer` into `output`; a fault does not prevent the copy.
fn read_back<T: Copy + Send + Sync>(
    stream: &Stream,
    buffer: &DeviceBuffer<T>,
    output: &mut [T],
) -> Result<()> {
    let synchronized = stream.synchronize();
    buffer.copy_to(output)?;
    synchronized
}
