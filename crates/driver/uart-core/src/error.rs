//! Error type shared by every serial-core operation.

use core::fmt;

/// Errors returned by the serial core and by hardware operations.
///
/// Interrupt-context code never produces these; conditions detected there
/// are reported through the port counters instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerialError {
    /// The I/O region or IRQ is already owned by another consumer.
    ResourceConflict,
    /// The requested baud, format or port type cannot be produced.
    InvalidConfig,
    /// The hardware lacks the requested capability.
    Unsupported,
    /// The port or driver is still in use.
    Busy,
    /// No port or driver is registered under that line or name.
    NotFound,
    /// Another port is already registered on that line.
    LineOccupied,
    /// A driver with the same name is already registered.
    DuplicateDriver,
    /// The transmit ring is full; retry later.
    WouldBlock,
    /// A blocking operation was aborted by a signal.
    Interrupted,
    /// The session was hung up; the handle is no longer valid.
    HungUp,
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceConflict => f.write_str("resource already claimed"),
            Self::InvalidConfig => f.write_str("invalid configuration"),
            Self::Unsupported => f.write_str("operation not supported"),
            Self::Busy => f.write_str("device or resource busy"),
            Self::NotFound => f.write_str("no such port"),
            Self::LineOccupied => f.write_str("line already occupied"),
            Self::DuplicateDriver => f.write_str("driver already registered"),
            Self::WouldBlock => f.write_str("transmit buffer full"),
            Self::Interrupted => f.write_str("interrupted by signal"),
            Self::HungUp => f.write_str("port hung up"),
        }
    }
}

impl core::error::Error for SerialError {}
