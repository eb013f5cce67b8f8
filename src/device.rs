//! [`Device`] is the pool of parallel execution units kernels run on, together with its memory
//! budget.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::Arc;

/// A set of parallel execution units with a bounded amount of device memory.
///
/// [`Device`] is cheap to clone; all clones share the same execution units and memory budget.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    pool: rayon::ThreadPool,
    memory_limit: usize,
    allocated: AtomicUsize,
}

/// Configures and creates a [`Device`].
///
/// # Examples
///
/// ```
/// use static_multiset::Device;
///
/// let device = Device::builder().num_workers(2).memory_limit(1 << 20).build().unwrap();
/// assert_eq!(device.num_workers(), 2);
/// assert_eq!(device.memory_limit(), 1 << 20);
/// ```
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    num_workers: Option<usize>,
    memory_limit: Option<usize>,
    name: Option<String>,
}

impl DeviceBuilder {
    /// Sets the number of execution units.
    ///
    /// Defaults to the available parallelism of the host.
    #[must_use]
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    /// Sets the number of bytes of device memory that can be allocated at once.
    ///
    /// Unlimited by default.
    #[must_use]
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Sets the name prefix of the execution unit threads.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Creates the [`Device`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the execution units could not be spawned.
    pub fn build(self) -> Result<Device> {
        let name = self.name.unwrap_or_else(|| String::from("device"));
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(move |index| format!("{name}-unit-{index}"));
        if let Some(num_workers) = self.num_workers {
            builder = builder.num_threads(num_workers);
        }
        let pool = builder.build().map_err(|e| Error::Device(e.to_string()))?;
        let memory_limit = self.memory_limit.unwrap_or(usize::MAX);
        log::debug!(
            "device up: {} execution units, memory limit {memory_limit} bytes",
            pool.current_num_threads()
        );
        Ok(Device {
            inner: Arc::new(DeviceInner {
                pool,
                memory_limit,
                allocated: AtomicUsize::new(0),
            }),
        })
    }
}

impl Device {
    /// Returns a [`DeviceBuilder`].
    #[inline]
    #[must_use]
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    /// Creates a [`Device`] with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the execution units could not be spawned.
    #[inline]
    pub fn new() -> Result<Device> {
        Self::builder().build()
    }

    /// Returns the number of execution units.
    #[inline]
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.inner.pool.current_num_threads()
    }

    /// Returns the memory budget in bytes.
    #[inline]
    #[must_use]
    pub fn memory_limit(&self) -> usize {
        self.inner.memory_limit
    }

    /// Returns the number of bytes currently allocated.
    #[inline]
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Acquire)
    }

    /// Returns `true` if both handles refer to the same device.
    #[inline]
    #[must_use]
    pub fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `op` on the execution units of the device.
    ///
    /// Parallel iterators used inside `op` are scheduled on this device.
    #[inline]
    pub(crate) fn install<R: Send, F: FnOnce() -> R + Send>(&self, op: F) -> R {
        self.inner.pool.install(op)
    }

    /// Charges `bytes` against the memory budget.
    ///
    /// The reservation is released when the returned [`MemoryReservation`] is dropped.
    pub(crate) fn reserve(&self, bytes: usize) -> Result<MemoryReservation> {
        let mut current = self.inner.allocated.load(Relaxed);
        loop {
            let Some(next) = current
                .checked_add(bytes)
                .filter(|next| *next <= self.inner.memory_limit)
            else {
                return Err(Error::Allocation { bytes });
            };
            match self
                .inner
                .allocated
                .compare_exchange_weak(current, next, AcqRel, Relaxed)
            {
                Ok(_) => {
                    return Ok(MemoryReservation {
                        device: self.clone(),
                        bytes,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("num_workers", &self.num_workers())
            .field("memory_limit", &self.memory_limit())
            .field("allocated", &self.allocated())
            .finish()
    }
}

/// A chunk of the device memory budget.
pub(crate) struct MemoryReservation {
    device: Device,
    bytes: usize,
}

impl MemoryReservation {
    /// Returns the device the memory was reserved on.
    #[inline]
    pub(crate) fn device(&self) -> &Device {
        &self.device
    }
}

impl Drop for MemoryReservation {
    #[inline]
    fn drop(&mut self) {
        self.device.inner.allocated.fetch_sub(self.bytes, AcqRel);
    }
}

/// A buffer that kernels write their per-key results into.
///
/// Clones share the same memory, which is how a buffer is handed to a kernel while the caller
/// keeps a handle to read it back. A kernel computes its results on the side and publishes them
/// all at once when it finishes, so the length of a buffer never waits for a kernel, and reading
/// a buffer before the stream that writes it has been synchronized yields the content published
/// last.
///
/// # Examples
///
/// ```
/// use static_multiset::DeviceBuffer;
///
/// let buffer = DeviceBuffer::filled(3, false);
/// assert_eq!(buffer.len(), 3);
/// assert_eq!(buffer.to_vec(), vec![false; 3]);
/// ```
pub struct DeviceBuffer<T> {
    len: usize,
    data: Arc<RwLock<Box<[T]>>>,
}

impl<T: Copy + Send + Sync> DeviceBuffer<T> {
    /// Creates a buffer of `len` elements set to `value`.
    #[must_use]
    pub fn filled(len: usize, value: T) -> Self {
        Self {
            len,
            data: Arc::new(RwLock::new(vec![value; len].into_boxed_slice())),
        }
    }

    /// Creates a buffer holding a copy of `data`.
    #[must_use]
    pub fn from_slice(data: &[T]) -> Self {
        Self {
            len: data.len(),
            data: Arc::new(RwLock::new(data.into())),
        }
    }

    /// Returns the number of elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer has no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the content of the buffer into a new [`Vec`].
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.data.read().to_vec()
    }

    /// Copies the content of the buffer into `output`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `output` is not exactly as long as the buffer.
    pub fn copy_to(&self, output: &mut [T]) -> Result<()> {
        if self.len != output.len() {
            return Err(Error::LengthMismatch {
                expected: self.len,
                actual: output.len(),
            });
        }
        output.copy_from_slice(&self.data.read());
        Ok(())
    }

    /// Replaces the whole content with `values`.
    ///
    /// `values` must have exactly [`DeviceBuffer::len`] elements.
    pub(crate) fn publish(&self, values: Vec<T>) {
        debug_assert_eq!(values.len(), self.len);
        *self.data.write() = values.into_boxed_slice();
    }

    /// Overwrites the elements for which `values` holds `Some`.
    pub(crate) fn publish_some(&self, values: &[Option<T>]) {
        debug_assert_eq!(values.len(), self.len);
        let mut data = self.data.write();
        for (slot, value) in data.iter_mut().zip(values) {
            if let Some(value) = value {
                *slot = *value;
            }
        }
    }
}

impl<T> Clone for DeviceBuffer<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            len: self.len,
            data: self.data.clone(),
        }
    }
}

impl<T: Copy + Send + Sync + Debug> Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.data.read().iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_budget() {
        let device = Device::builder()
            .num_workers(1)
            .memory_limit(100)
            .build()
            .unwrap();
        let a = device.reserve(60).unwrap();
        assert_eq!(device.allocated(), 60);
        assert_eq!(
            device.reserve(41).err(),
            Some(Error::Allocation { bytes: 41 })
        );
        let b = device.reserve(40).unwrap();
        assert_eq!(device.allocated(), 100);
        drop(a);
        assert_eq!(device.allocated(), 40);
        drop(b);
        assert_eq!(device.allocated(), 0);
        assert!(device.reserve(usize::MAX).is_err());
    }

    #[test]
    fn buffer_shared() {
        let buffer = DeviceBuffer::filled(4, 0_u32);
        let clone = buffer.clone();
        clone.publish(vec![1, 2, 3, 4]);
        clone.publish_some(&[None, Some(9), None, None]);
        let mut out = [0; 4];
        buffer.copy_to(&mut out).unwrap();
        assert_eq!(out, [1, 9, 3, 4]);

        // The length never waits for a writer.
        let data = clone.data.write();
        assert_eq!(buffer.len(), 4);
        drop(data);
        assert_eq!(
            buffer.copy_to(&mut [0; 3]),
            Err(Error::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
    }
}
