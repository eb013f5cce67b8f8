//! [`Error`] is the single error type of the crate.

/// Errors reported by [`StaticMultiset`](crate::StaticMultiset), [`Stream`](crate::Stream) and
/// [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The requested capacity is zero or cannot be honored by the storage layout.
    #[error("invalid capacity {requested}: the storage layout needs at least one full bucket")]
    InvalidCapacity {
        /// The capacity the caller asked for.
        requested: usize,
    },

    /// The desired load factor is not within `(0, 1]`.
    #[error("invalid load factor {0}: must lie in (0, 1]")]
    InvalidLoadFactor(f64),

    /// A device reference was requested without any operator.
    #[error("no operators specified")]
    NoOperators,

    /// An output or stencil range does not match the length of the input range.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length of the input range.
        expected: usize,
        /// Length of the mismatching range.
        actual: usize,
    },

    /// Erasure was requested on a container whose empty and erased sentinels are bit-identical.
    #[error("erasure requires distinct empty and erased key sentinels")]
    ErasureUnsupported,

    /// Device memory could not be reserved.
    #[error("failed to allocate {bytes} bytes of device memory")]
    Allocation {
        /// Size of the failed reservation.
        bytes: usize,
    },

    /// The device could not be brought up.
    #[error("device initialization failed: {0}")]
    Device(String),

    /// Keys were dropped because no free slot was found within a full probing cycle.
    #[error("container is full: {dropped} keys could not be inserted")]
    CapacityExhausted {
        /// Number of keys the kernel dropped.
        dropped: usize,
    },

    /// A kernel panicked while executing on the device.
    #[error("kernel `{kernel}` panicked")]
    KernelPanicked {
        /// Name of the panicking kernel.
        kernel: &'static str,
    },

    /// The stream no longer accepts work.
    #[error("stream is closed")]
    StreamClosed,
}

/// Shorthand for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
