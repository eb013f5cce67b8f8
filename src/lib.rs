//! Fixed-capacity, stream-ordered, massively parallel multiset.
//!
//! # static_multiset::StaticMultiset
//! An open-addressing multiset whose slots live in [`Device`] memory and are operated on by
//! batches of keys issued to a [`Stream`]: every batch runs as one kernel across all the execution
//! units of the device.
//!
//! # static_multiset::MultisetRef
//! An operator-bound view of the slots for fine-grained, per-key access.
//!
//! # static_multiset::Stream
//! An ordered queue of kernels; blocking operations are asynchronous operations followed by
//! [`Stream::synchronize`].

mod device;
mod error;
mod exit_guard;
mod hash;
mod key;
mod key_equal;
mod multiset_ref;
mod open_addressing;
mod operator;
mod probing;
mod scope;
mod static_multiset;
mod storage;
mod stream;
mod wait_queue;

// static_multiset::StaticMultiset
pub use static_multiset::StaticMultiset;

pub use key::{EmptyKey, ErasedKey, Key};
pub use multiset_ref::{Locator, MultisetRef, SlotEncoding};
pub use open_addressing::OpenAddressing;
pub use operator::{Operator, OperatorSet};
pub use scope::ThreadScope;

// Hashing, probing, and key comparison.
pub use equivalent::Equivalent;
pub use hash::{Hash, IdentityHash, XxHash32, XxHash64};
pub use key_equal::{BitwiseKeyEqual, DefaultKeyEqual, EquivalentKeyEqual, KeyEqual};
pub use probing::{
    BucketCount, DoubleHashing, LinearProbing, ProbingIterator, ProbingScheme, WithHashFunction,
};

// Slot storage.
pub use storage::{
    make_valid_extent, BucketStorage, Extent, SlotStorage, StorageLayout, StorageRef,
};

// Device and stream.
pub use device::{Device, DeviceBuffer, DeviceBuilder};
pub use stream::Stream;

pub use error::{Error, Result};
