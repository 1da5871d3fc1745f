//! Wait queue for interrupt-driven wakeups.
//!
//! [`WaitQueue`] stores [`Waker`]s from async tasks waiting on a port event:
//! carrier coming up for a blocked open, room appearing in the transmit ring
//! for a writer, or any modem-status delta. Interrupt handlers and the top
//! half call [`wake_all`](WaitQueue::wake_all) after dropping the port lock;
//! the waiting side re-checks its condition under the lock on every poll.

use alloc::collections::VecDeque;
use core::task::Waker;

use super::IrqSpinLock;

/// Heap-backed queue of [`Waker`]s waiting for an event.
///
/// Wakers are woken outside the internal lock so a woken task that
/// immediately re-registers cannot deadlock against the waker.
pub struct WaitQueue {
    waiters: IrqSpinLock<VecDeque<Waker>>,
}

impl WaitQueue {
    /// Creates an empty wait queue.
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            waiters: IrqSpinLock::named("waitqueue", VecDeque::new()),
        }
    }

    /// Creates an empty wait queue.
    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            waiters: IrqSpinLock::named("waitqueue", VecDeque::new()),
        }
    }

    /// Registers a waker to be woken by the next [`wake_all`](Self::wake_all).
    ///
    /// A waker that would wake the same task as one already queued is not
    /// queued twice, so a future polled repeatedly does not grow the queue.
    pub fn register_waker(&self, waker: &Waker) {
        let mut waiters = self.waiters.lock();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push_back(waker.clone());
        }
    }

    /// Wakes all waiting tasks.
    pub fn wake_all(&self) {
        let drained = core::mem::take(&mut *self.waiters.lock());
        for w in drained {
            w.wake();
        }
    }

    /// Returns the number of queued wakers.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Returns `true` if no waker is queued.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitQueue")
            .field("waiters", &self.len())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::test_util::counting_waker;
    use std::sync::atomic::Ordering;

    #[test]
    fn register_dedups_same_task() {
        let wq = WaitQueue::new();
        let (waker, _) = counting_waker();
        wq.register_waker(&waker);
        wq.register_waker(&waker.clone());
        assert_eq!(wq.len(), 1);
    }

    #[test]
    fn wake_all_wakes_everyone() {
        let wq = WaitQueue::new();
        let (w1, c1) = counting_waker();
        let (w2, c2) = counting_waker();
        wq.register_waker(&w1);
        wq.register_waker(&w2);

        wq.wake_all();
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
        assert!(wq.is_empty());
    }

    #[test]
    fn wake_on_empty_queue_is_harmless() {
        let wq = WaitQueue::new();
        wq.wake_all();
        assert!(wq.is_empty());
    }

    #[test]
    fn woken_task_can_register_again() {
        let wq = WaitQueue::new();
        let (waker, count) = counting_waker();
        wq.register_waker(&waker);
        wq.wake_all();
        wq.register_waker(&waker);
        assert_eq!(wq.len(), 1);
        wq.wake_all();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
