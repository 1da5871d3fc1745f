//! Loom compatibility shim.
//!
//! Under `cfg(loom)` the lock flag and the spin hint come from loom so the
//! port lock protocol can be model-checked. Otherwise the `core` atomics are
//! used directly.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicBool, Ordering};

/// Backs off inside a spin loop.
///
/// Loom cannot make progress on a busy loop, so the model build yields to
/// the scheduler instead of issuing a CPU pause hint.
#[inline]
pub(crate) fn spin_loop() {
    #[cfg(loom)]
    loom::thread::yield_now();
    #[cfg(not(loom))]
    core::hint::spin_loop();
}
