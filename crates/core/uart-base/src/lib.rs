//! Base primitives for the UART serial core.
//!
//! This crate contains the host-testable building blocks the serial core is
//! layered on: an interrupt-safe spin lock shared between interrupt handlers
//! and caller threads, a waker-based wait queue for blocked opens and
//! writers, and a leveled logging facade whose sink is registered by the
//! surrounding system.
//!
//! Nothing here touches hardware, so everything can be exercised with
//! `cargo test` and loom on the host.

#![cfg_attr(not(any(test, feature = "test-util")), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod log;
pub mod sync;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
