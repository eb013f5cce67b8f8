//! A minimal scope guard.

/// [`ExitGuard`] hands the captured value to a callback when it goes out of scope, including
/// during unwinding.
pub(crate) struct ExitGuard<T, F: FnOnce(T)> {
    armed: Option<(T, F)>,
}

impl<T, F: FnOnce(T)> ExitGuard<T, F> {
    /// Creates a new [`ExitGuard`].
    #[inline]
    pub(crate) fn new(captured: T, on_exit: F) -> Self {
        Self {
            armed: Some((captured, on_exit)),
        }
    }
}

impl<T, F: FnOnce(T)> Drop for ExitGuard<T, F> {
    #[inline]
    fn drop(&mut self) {
        if let Some((captured, on_exit)) = self.armed.take() {
            on_exit(captured);
        }
    }
}
