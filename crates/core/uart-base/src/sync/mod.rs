//! Synchronization primitives for the serial core.
//!
//! Provides [`IrqSpinLock`], the lock every port uses to serialize its
//! register access, transmit ring and modem flags between the interrupt
//! handler and caller threads, and [`WaitQueue`], the list of tasks blocked
//! in `open()`, in a full-ring write, or on a modem-status change.

mod irq_spinlock;
pub mod waitqueue;

pub(crate) mod loom_compat;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use waitqueue::WaitQueue;
