//! [`ThreadScope`] sets the visibility of slot updates.

use std::sync::atomic::Ordering::{self, AcqRel, Acquire, Relaxed, Release};

/// The set of execution units that must observe slot updates in order.
///
/// A multiset only accessed by bulk kernels of one stream can use [`ThreadScope::Thread`]: the
/// stream boundary already orders kernels, and the claims within a kernel only rely on the
/// atomicity of compare-and-swap. Wider scopes are for device references shared across
/// concurrently running kernels and host threads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ThreadScope {
    /// Ordering is only guaranteed for a single execution unit.
    Thread,
    /// Ordering is guaranteed within a group of cooperating execution units.
    Block,
    /// Ordering is guaranteed across the whole device.
    #[default]
    Device,
    /// Ordering is guaranteed across the device and the host.
    System,
}

impl ThreadScope {
    #[inline]
    pub(crate) const fn load(self) -> Ordering {
        match self {
            ThreadScope::Thread => Relaxed,
            _ => Acquire,
        }
    }

    #[inline]
    pub(crate) const fn store(self) -> Ordering {
        match self {
            ThreadScope::Thread => Relaxed,
            _ => Release,
        }
    }

    #[inline]
    pub(crate) const fn read_modify_write(self) -> Ordering {
        match self {
            ThreadScope::Thread => Relaxed,
            _ => AcqRel,
        }
    }
}
