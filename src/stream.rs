//! [`Stream`] orders kernels issued to a [`Device`].

use crate::device::Device;
use crate::exit_guard::ExitGuard;
use crate::wait_queue::WaitQueue;
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of device work.
pub(crate) type Kernel = Box<dyn FnOnce(&Device) -> Result<()> + Send + 'static>;

/// An ordered queue of kernels bound to one [`Device`].
///
/// Kernels issued to the same [`Stream`] run one after another in issue order; every kernel runs
/// data-parallel across the execution units of the device. Issuing a kernel never blocks.
///
/// A kernel that fails records a fault on the stream. The fault is reported, and cleared, by the
/// next [`Stream::synchronize`] or [`Stream::synchronize_async`].
///
/// Dropping a [`Stream`] waits for all the issued kernels to finish.
///
/// # Examples
///
/// ```
/// use static_multiset::{Device, Stream};
///
/// let device = Device::builder().num_workers(2).build().unwrap();
/// let stream = Stream::new(&device).unwrap();
/// assert!(stream.synchronize().is_ok());
/// assert!(stream.device().same_device(&device));
/// ```
pub struct Stream {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

struct Shared {
    device: Device,
    queue: Mutex<Queue>,
    issued: Condvar,
    wait_queue: WaitQueue,
    fault: Mutex<Option<Error>>,
}

#[derive(Default)]
struct Queue {
    kernels: VecDeque<(u64, &'static str, Kernel)>,
    last_ticket: u64,
    closed: bool,
}

impl Stream {
    /// Creates a new [`Stream`] on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the dispatcher thread could not be spawned.
    pub fn new(device: &Device) -> Result<Stream> {
        let shared = Arc::new(Shared {
            device: device.clone(),
            queue: Mutex::new(Queue::default()),
            issued: Condvar::new(),
            wait_queue: WaitQueue::default(),
            fault: Mutex::new(None),
        });
        let dispatcher_shared = shared.clone();
        let dispatcher = std::thread::Builder::new()
            .name(String::from("stream-dispatcher"))
            .spawn(move || dispatcher_shared.dispatch())
            .map_err(|e| Error::Device(e.to_string()))?;
        Ok(Stream {
            shared,
            dispatcher: Some(dispatcher),
        })
    }

    /// Returns the device the stream issues kernels to.
    #[inline]
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.shared.device
    }

    /// Blocks until every kernel issued so far has completed.
    ///
    /// # Errors
    ///
    /// Returns the fault recorded by a kernel since the last synchronization.
    pub fn synchronize(&self) -> Result<()> {
        let ticket = self.last_ticket();
        self.shared.wait_queue.wait_sync(ticket);
        self.take_fault()
    }

    /// Waits until every kernel issued so far has completed.
    ///
    /// # Errors
    ///
    /// Returns the fault recorded by a kernel since the last synchronization.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_multiset::{Device, Stream};
    ///
    /// let device = Device::new().unwrap();
    /// let stream = Stream::new(&device).unwrap();
    /// let future = stream.synchronize_async();
    /// ```
    pub async fn synchronize_async(&self) -> Result<()> {
        let ticket = self.last_ticket();
        self.shared.wait_queue.wait_async(ticket).await;
        self.take_fault()
    }

    /// Returns `true` if every kernel issued so far has completed.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.wait_queue.completed() >= self.last_ticket()
    }

    /// Issues `kernel`.
    ///
    /// Ticket assignment and queueing happen under the same lock, which defines the issue order.
    pub(crate) fn enqueue(&self, name: &'static str, kernel: Kernel) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            return Err(Error::StreamClosed);
        }
        queue.last_ticket += 1;
        let ticket = queue.last_ticket;
        queue.kernels.push_back((ticket, name, kernel));
        drop(queue);
        log::trace!("issued `{name}` as #{ticket}");
        self.shared.issued.notify_one();
        Ok(())
    }

    #[inline]
    fn last_ticket(&self) -> u64 {
        self.shared.queue.lock().last_ticket
    }

    #[inline]
    fn take_fault(&self) -> Result<()> {
        self.shared.fault.lock().take().map_or(Ok(()), Err)
    }
}

impl Shared {
    /// Runs kernels in issue order until the stream is closed and drained.
    fn dispatch(&self) {
        loop {
            let (ticket, name, kernel) = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(next) = queue.kernels.pop_front() {
                        break next;
                    }
                    if queue.closed {
                        return;
                    }
                    self.issued.wait(&mut queue);
                }
            };
            let _completion = ExitGuard::new(ticket, |ticket| self.wait_queue.signal(ticket));
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.device.install(|| kernel(&self.device))
            }));
            match outcome {
                Ok(Ok(())) => log::trace!("completed `{name}` (#{ticket})"),
                Ok(Err(error)) => self.record_fault(name, error),
                Err(_) => self.record_fault(name, Error::KernelPanicked { kernel: name }),
            }
        }
    }

    /// Records `error`; dropped-key counts accumulate, any other fault keeps the first one.
    fn record_fault(&self, name: &'static str, error: Error) {
        log::warn!("kernel `{name}` faulted: {error}");
        let mut fault = self.fault.lock();
        *fault = match (fault.take(), error) {
            (None, error) => Some(error),
            (
                Some(Error::CapacityExhausted { dropped: earlier }),
                Error::CapacityExhausted { dropped },
            ) => Some(Error::CapacityExhausted {
                dropped: earlier + dropped,
            }),
            (Some(first), _) => Some(first),
        };
    }
}

impl Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("Stream")
            .field("issued", &queue.last_ticket)
            .field("completed", &self.shared.wait_queue.completed())
            .field("pending", &queue.kernels.len())
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shared.queue.lock().closed = true;
        self.shared.issued.notify_one();
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                log::warn!("stream dispatcher terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;

    fn stream() -> Stream {
        let device = Device::builder().num_workers(2).build().unwrap();
        Stream::new(&device).unwrap()
    }

    #[test]
    fn issue_order() {
        let stream = stream();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..64 {
            let log = log.clone();
            let kernel: Kernel = Box::new(move |_| {
                log.lock().push(i);
                Ok(())
            });
            stream.enqueue("push", kernel).unwrap();
        }
        stream.synchronize().unwrap();
        assert!(stream.is_idle());
        assert_eq!(*log.lock(), (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn faults_are_sticky_until_synchronized() {
        let stream = stream();
        let ran = Arc::new(AtomicUsize::new(0));
        for dropped in [2, 3] {
            let kernel: Kernel = Box::new(move |_| Err(Error::CapacityExhausted { dropped }));
            stream.enqueue("fail", kernel).unwrap();
        }
        let ran_clone = ran.clone();
        let kernel: Kernel = Box::new(move |_| {
            ran_clone.fetch_add(1, Relaxed);
            Ok(())
        });
        stream.enqueue("after", kernel).unwrap();
        assert_eq!(
            stream.synchronize(),
            Err(Error::CapacityExhausted { dropped: 5 })
        );
        assert_eq!(ran.load(Relaxed), 1);
        assert_eq!(stream.synchronize(), Ok(()));
    }

    #[test]
    fn kernel_panic() {
        let stream = stream();
        let kernel: Kernel = Box::new(|_| panic!("kernel failure"));
        stream.enqueue("boom", kernel).unwrap();
        assert_eq!(
            stream.synchronize(),
            Err(Error::KernelPanicked { kernel: "boom" })
        );
        stream.enqueue("fine", Box::new(|_| Ok(()))).unwrap();
        assert_eq!(stream.synchronize(), Ok(()));
    }

    #[test]
    fn drop_drains() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stream = stream();
        for _ in 0..16 {
            let counter = counter.clone();
            let kernel: Kernel = Box::new(move |_| {
                counter.fetch_add(1, Relaxed);
                Ok(())
            });
            stream.enqueue("count", kernel).unwrap();
        }
        drop(stream);
        assert_eq!(counter.load(Relaxed), 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn synchronize_async() {
        let stream = stream();
        let kernel: Kernel = Box::new(|_| Err(Error::CapacityExhausted { dropped: 1 }));
        stream.enqueue("fail", kernel).unwrap();
        assert_eq!(
            stream.synchronize_async().await,
            Err(Error::CapacityExhausted { dropped: 1 })
        );
        assert_eq!(stream.synchronize_async().await, Ok(()));
    }
}
