//! Hardware-independent serial core.
//!
//! This crate sits between UART hardware drivers and the layers that
//! consume a byte stream (line disciplines, consoles). It owns:
//!
//! - the port lifecycle: [`UartPort::open`], [`OpenPort`] and hangup,
//! - the transmit ring ([`CircBuf`]) and the receive flip buffer,
//! - modem-signal handling: carrier-driven opens and hangups, RTS/CTS
//!   pacing,
//! - the [`UartOps`] contract every hardware family implements,
//! - the driver [`Registry`] and console binding.
//!
//! Each port serializes its interrupt handler and its callers through one
//! interrupt-safe lock; notifications produced under the lock are
//! delivered after it is released.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod circ;
pub mod console;
pub mod driver;
pub mod error;
pub mod flags;
pub mod icount;
pub mod irq;
pub mod ldisc;
pub mod modem;
pub mod ops;
pub mod port;
pub mod resource;
mod state;
pub mod termios;
mod tty;
mod uart;

#[cfg(all(test, not(loom)))]
mod testing;

pub use circ::{CircBuf, UART_XMIT_SIZE, WAKEUP_CHARS};
pub use console::{ConsoleOptions, UartConsole};
pub use driver::{DriverConfig, Registry, UartDriver};
pub use error::SerialError;
pub use flags::{ConfigFlags, Events, InfoFlags, Mctrl, OpenFlags, PortFlags, RxStatus};
pub use icount::Icount;
pub use irq::IrqContext;
pub use ldisc::{
    LineDiscipline, NoSignals, OpenRequest, Pgrp, RxChar, RxFlag, SessionId, SignalFlag,
    SignalSink,
};
pub use ops::{PowerState, UartOps};
pub use port::{DEFAULT_UARTCLK, IoType, PortData, PortType, SerialInfo};
pub use resource::{PlatformResources, ResourceTable};
pub use termios::{ControlFlags, DataBits, InputFlags, LineConfig, Parity, StopBits, Termios};
pub use tty::OpenPort;
pub use uart::{PortName, UartPort};
