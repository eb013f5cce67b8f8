//! Completion tickets that blocking threads and async tasks wait on.

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// [`WaitQueue`] lets threads and tasks wait until a stream has completed a given ticket.
///
/// Tickets complete in increasing order, so the queue only needs to remember the highest
/// completed ticket. Synchronous waiters block on a condition variable, asynchronous waiters
/// park their [`Waker`] in the queue.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    state: Mutex<State>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct State {
    completed: u64,
    wakers: Vec<(u64, Waker)>,
}

impl WaitQueue {
    /// Returns the highest completed ticket.
    #[inline]
    pub(crate) fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// Blocks the current thread until `ticket` has completed.
    pub(crate) fn wait_sync(&self, ticket: u64) {
        let mut state = self.state.lock();
        while state.completed < ticket {
            self.condvar.wait(&mut state);
        }
    }

    /// Returns a future that resolves once `ticket` has completed.
    #[inline]
    pub(crate) fn wait_async(&self, ticket: u64) -> AsyncWait<'_> {
        AsyncWait {
            wait_queue: self,
            ticket,
        }
    }

    /// Marks every ticket up to `ticket` completed and wakes up the waiters it satisfies.
    pub(crate) fn signal(&self, ticket: u64) {
        let ready = {
            let mut state = self.state.lock();
            if ticket <= state.completed {
                return;
            }
            state.completed = ticket;
            let (ready, pending): (Vec<_>, Vec<_>) = state
                .wakers
                .drain(..)
                .partition(|(waiting_for, _)| *waiting_for <= ticket);
            state.wakers = pending;
            ready
        };
        self.condvar.notify_all();
        ready.into_iter().for_each(|(_, waker)| waker.wake());
    }
}

/// [`AsyncWait`] resolves once the ticket it waits for has completed.
#[derive(Debug)]
pub(crate) struct AsyncWait<'w> {
    wait_queue: &'w WaitQueue,
    ticket: u64,
}

impl Future for AsyncWait<'_> {
    type Output = ();

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.wait_queue.state.lock();
        if state.completed >= self.ticket {
            return Poll::Ready(());
        }
        let ticket = self.ticket;
        if let Some(entry) = state
            .wakers
            .iter_mut()
            .find(|(t, w)| *t == ticket && w.will_wake(cx.waker()))
        {
            entry.1.clone_from(cx.waker());
        } else {
            state.wakers.push((ticket, cx.waker().clone()));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::{Arc, Barrier};

    #[test]
    fn wait_queue() {
        let num_threads = 8;
        let barrier = Arc::new(Barrier::new(num_threads + 1));
        let wait_queue = Arc::new(WaitQueue::default());
        let observed = Arc::new(AtomicU64::new(0));
        let mut thread_handles = Vec::with_capacity(num_threads);
        for ticket in 1..=num_threads as u64 {
            let barrier = barrier.clone();
            let wait_queue = wait_queue.clone();
            let observed = observed.clone();
            thread_handles.push(std::thread::spawn(move || {
                barrier.wait();
                wait_queue.wait_sync(ticket);
                assert!(wait_queue.completed() >= ticket);
                observed.fetch_max(ticket, Relaxed);
            }));
        }
        barrier.wait();
        for ticket in 1..=num_threads as u64 {
            wait_queue.signal(ticket);
        }
        thread_handles
            .into_iter()
            .for_each(|t| assert!(t.join().is_ok()));
        assert_eq!(observed.load(Relaxed), num_threads as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn async_wait() {
        let wait_queue = Arc::new(WaitQueue::default());
        let signaller = wait_queue.clone();
        let task = tokio::task::spawn_blocking(move || {
            for ticket in 1..=16 {
                signaller.signal(ticket);
            }
        });
        wait_queue.wait_async(16).await;
        assert_eq!(wait_queue.completed(), 16);
        wait_queue.wait_async(3).await;
        assert!(task.await.is_ok());
    }
}
