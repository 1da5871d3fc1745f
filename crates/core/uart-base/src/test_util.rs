//! Host-side helpers for testing code built on the serial core.
//!
//! Provides [`noop_waker`] and [`counting_waker`] for polling futures by
//! hand, a minimal [`block_on`] executor, and [`LogCapture`] for asserting
//! on log output. Available to dependent crates through the `test-util`
//! feature.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

use crate::log::{self, LogLevel};

// ---------------------------------------------------------------------------
// Wakers
// ---------------------------------------------------------------------------

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

/// Creates a [`Waker`] that does nothing when woken.
pub fn noop_waker() -> Waker {
    Waker::from(Arc::new(NoopWake))
}

struct CountingWake(Arc<AtomicUsize>);

impl Wake for CountingWake {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Creates a [`Waker`] that increments a counter each time it is woken.
///
/// Returns the waker and the counter that tracks wake calls.
pub fn counting_waker() -> (Waker, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let waker = Waker::from(Arc::new(CountingWake(Arc::clone(&counter))));
    (waker, counter)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

struct ThreadWake(Thread);

impl Wake for ThreadWake {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// Runs a future to completion on the current thread, parking between polls.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = std::pin::pin!(fut);
    let waker = Waker::from(Arc::new(ThreadWake(thread::current())));
    let mut cx = Context::from_waker(&waker);
    loop {
        if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
            return out;
        }
        thread::park();
    }
}

/// Polls a future exactly once with a no-op waker.
pub fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    std::pin::Pin::new(fut).poll(&mut cx)
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

thread_local! {
    static CAPTURED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn capture_sink(level: LogLevel, target: &'static str, args: fmt::Arguments<'_>) {
    let line = format!("[{}] {target}: {args}", level.name());
    CAPTURED.with(|c| c.borrow_mut().push(line));
}

/// Collects log lines emitted on the current thread.
///
/// Installing the capture replaces the global sink; lines are kept per
/// thread so parallel tests do not see each other's output.
pub struct LogCapture {
    _private: (),
}

impl LogCapture {
    /// Installs the capturing sink and clears this thread's buffer.
    pub fn install() -> Self {
        // SAFETY: `capture_sink` only touches a thread-local buffer.
        unsafe { log::set_log_fn(capture_sink) };
        CAPTURED.with(|c| c.borrow_mut().clear());
        Self { _private: () }
    }

    /// Takes all lines captured on this thread so far.
    pub fn take(&self) -> Vec<String> {
        CAPTURED.with(|c| std::mem::take(&mut *c.borrow_mut()))
    }
}
