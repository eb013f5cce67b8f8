//! Slot storage: the layout tags, the capacity rounding rule, and the device slot array.

use crate::device::{Device, MemoryReservation};
use crate::probing::BucketCount;
use crate::{Error, Key, Result};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// A number of slots.
pub type Extent = usize;

/// Describes how slots are grouped into buckets.
pub trait StorageLayout: Clone + Copy + Debug + Default + Send + Sync + 'static {
    /// Number of slots in one bucket.
    const BUCKET_SIZE: usize;
}

/// Slots grouped into buckets of `N` consecutive slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BucketStorage<const N: usize>;

impl<const N: usize> StorageLayout for BucketStorage<N> {
    const BUCKET_SIZE: usize = {
        assert!(N > 0, "a bucket holds at least one slot");
        N
    };
}

/// Rounds `requested` up to a capacity the storage layout and the probing scheme can work with.
///
/// The capacity is always a whole number of buckets; schemes that require it get a prime number
/// of buckets.
///
/// # Errors
///
/// Returns [`Error::InvalidCapacity`] if `requested` is zero or the rounded capacity overflows.
///
/// # Examples
///
/// ```
/// use static_multiset::{make_valid_extent, BucketStorage, DoubleHashing, IdentityHash};
/// use static_multiset::LinearProbing;
///
/// let linear = LinearProbing::new(IdentityHash);
/// assert_eq!(make_valid_extent::<BucketStorage<2>, _>(7, &linear), Ok(8));
///
/// let double = DoubleHashing::new(IdentityHash, IdentityHash);
/// assert_eq!(make_valid_extent::<BucketStorage<1>, _>(16, &double), Ok(17));
/// assert_eq!(make_valid_extent::<BucketStorage<2>, _>(16, &double), Ok(22));
/// ```
pub fn make_valid_extent<S: StorageLayout, P: BucketCount>(
    requested: usize,
    probing_scheme: &P,
) -> Result<Extent> {
    let invalid = Error::InvalidCapacity { requested };
    if requested == 0 {
        return Err(invalid);
    }
    let mut num_buckets = requested.div_ceil(S::BUCKET_SIZE);
    if probing_scheme.requires_prime_buckets() {
        while !primal::is_prime(num_buckets as u64) {
            num_buckets = num_buckets.checked_add(1).ok_or(invalid.clone())?;
        }
    }
    num_buckets.checked_mul(S::BUCKET_SIZE).ok_or(invalid)
}

/// The device slot array.
///
/// The memory is charged against the budget of the [`Device`] it was allocated on, and is
/// returned once the last [`StorageRef`] is gone.
pub struct SlotStorage<K: Key> {
    slots: Box<[K::Atomic]>,
    bucket_size: usize,
    reservation: MemoryReservation,
}

impl<K: Key> SlotStorage<K> {
    /// Allocates `capacity` slots on `device`.
    ///
    /// The content of the slots is unspecified until they are initialized.
    pub(crate) fn allocate(device: &Device, capacity: Extent, bucket_size: usize) -> Result<Self> {
        let bytes = capacity
            .checked_mul(std::mem::size_of::<K::Atomic>())
            .ok_or(Error::Allocation { bytes: usize::MAX })?;
        let reservation = device.reserve(bytes)?;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| Error::Allocation { bytes })?;
        slots.resize_with(capacity, K::Atomic::default);
        log::debug!("allocated {capacity} slots ({bytes} bytes)");
        Ok(Self {
            slots: slots.into_boxed_slice(),
            bucket_size,
            reservation,
        })
    }

    /// Returns the number of slots.
    #[inline]
    pub fn capacity(&self) -> Extent {
        self.slots.len()
    }

    /// Returns the number of slots in one bucket.
    #[inline]
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Returns the number of buckets.
    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.slots.len() / self.bucket_size
    }

    /// Returns the device the slots live on.
    #[inline]
    pub fn device(&self) -> &Device {
        self.reservation.device()
    }

    #[inline]
    pub(crate) fn slots(&self) -> &[K::Atomic] {
        &self.slots
    }
}

impl<K: Key> Debug for SlotStorage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotStorage")
            .field("capacity", &self.capacity())
            .field("bucket_size", &self.bucket_size)
            .finish()
    }
}

/// A shared, non-owning view of a [`SlotStorage`] handed to kernels and device references.
pub struct StorageRef<K: Key> {
    storage: Arc<SlotStorage<K>>,
}

impl<K: Key> StorageRef<K> {
    #[inline]
    pub(crate) fn new(storage: Arc<SlotStorage<K>>) -> Self {
        Self { storage }
    }

    /// Returns the number of slots.
    #[inline]
    pub fn capacity(&self) -> Extent {
        self.storage.capacity()
    }

    /// Returns the number of slots in one bucket.
    #[inline]
    pub fn bucket_size(&self) -> usize {
        self.storage.bucket_size()
    }

    /// Returns the number of buckets.
    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.storage.num_buckets()
    }

    /// Returns `true` if both references view the same slot array.
    #[inline]
    pub fn same_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    #[inline]
    pub(crate) fn slots(&self) -> &[K::Atomic] {
        self.storage.slots()
    }
}

impl<K: Key> Clone for StorageRef<K> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<K: Key> Debug for StorageRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.storage.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hash::IdentityHash;
    use crate::probing::{DoubleHashing, LinearProbing};

    #[test]
    fn extent() {
        let linear = LinearProbing::new(IdentityHash);
        let double = DoubleHashing::new(IdentityHash, IdentityHash);
        assert_eq!(
            make_valid_extent::<BucketStorage<1>, _>(16, &linear),
            Ok(16)
        );
        assert_eq!(
            make_valid_extent::<BucketStorage<4>, _>(13, &linear),
            Ok(16)
        );
        assert_eq!(make_valid_extent::<BucketStorage<1>, _>(1, &double), Ok(2));
        assert_eq!(
            make_valid_extent::<BucketStorage<1>, _>(100, &double),
            Ok(101)
        );
        assert_eq!(
            make_valid_extent::<BucketStorage<1>, _>(0, &linear),
            Err(Error::InvalidCapacity { requested: 0 })
        );
        assert!(
            make_valid_extent::<BucketStorage<2>, _>(usize::MAX, &linear).is_err()
        );
    }

    #[test]
    fn allocation_accounting() {
        let device = Device::builder()
            .num_workers(1)
            .memory_limit(64)
            .build()
            .unwrap();
        let storage = SlotStorage::<u32>::allocate(&device, 16, 1).unwrap();
        assert_eq!(device.allocated(), 64);
        assert_eq!(
            SlotStorage::<u32>::allocate(&device, 1, 1).err(),
            Some(Error::Allocation { bytes: 4 })
        );
        let view = StorageRef::new(Arc::new(storage));
        let copy = view.clone();
        assert!(view.same_storage(&copy));
        drop(view);
        assert_eq!(device.allocated(), 64);
        drop(copy);
        assert_eq!(device.allocated(), 0);
    }
}
