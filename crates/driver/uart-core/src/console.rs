//! Console output through a serial port.
//!
//! A bound console writes with [`UartOps::poll_put_char`](crate::UartOps)
//! straight to the hardware, outside the open/close lifecycle. It never
//! allocates and never waits: if the port lock is held elsewhere the text
//! is dropped and counted.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::Ordering;

use crate::error::SerialError;
use crate::ops::PowerState;
use crate::termios::{DataBits, LineConfig, Parity, StopBits};
use crate::uart::{self, UartPort};

/// Console line settings parsed from an option string such as
/// `"115200n8r"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleOptions {
    /// Baud rate.
    pub baud: u32,
    /// Parity mode.
    pub parity: Parity,
    /// Data bits.
    pub bits: DataBits,
    /// RTS/CTS flow control.
    pub flow: bool,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            baud: 9600,
            parity: Parity::None,
            bits: DataBits::Eight,
            flow: false,
        }
    }
}

impl ConsoleOptions {
    /// Parses `<baud>[<parity>[<bits>[r]]]`.
    ///
    /// Parity is one of `n`, `o`, `e`. Omitted fields keep their defaults
    /// (9600n8, no flow control).
    pub fn parse(options: &str) -> Result<Self, SerialError> {
        let mut opts = Self::default();
        let digits = options
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();
        let (baud, rest) = options.split_at(digits);
        if !baud.is_empty() {
            opts.baud = baud.parse().map_err(|_| SerialError::InvalidConfig)?;
        }

        let mut rest = rest.bytes();
        if let Some(p) = rest.next() {
            opts.parity = match p {
                b'n' => Parity::None,
                b'o' => Parity::Odd,
                b'e' => Parity::Even,
                _ => return Err(SerialError::InvalidConfig),
            };
        }
        if let Some(b) = rest.next() {
            if !b.is_ascii_digit() {
                return Err(SerialError::InvalidConfig);
            }
            opts.bits = DataBits::from_count(b - b'0')?;
        }
        match rest.next() {
            None => {}
            Some(b'r') => opts.flow = true,
            Some(_) => return Err(SerialError::InvalidConfig),
        }
        if rest.next().is_some() {
            return Err(SerialError::InvalidConfig);
        }
        Ok(opts)
    }

    /// The equivalent line settings. Consoles never wait for carrier.
    pub fn line_config(&self) -> LineConfig {
        LineConfig {
            baud: self.baud,
            parity: self.parity,
            data_bits: self.bits,
            stop_bits: StopBits::One,
            hw_flow: self.flow,
            carrier_required: false,
        }
    }
}

/// Applies console options to `port` and pushes them to the hardware.
///
/// Rejected settings leave the port unchanged.
pub fn set_options(port: &UartPort, opts: &ConsoleOptions) -> Result<(), SerialError> {
    let config = opts.line_config();
    port.with_lock(|inner, ops, _| {
        let old = inner.data.termios;
        let new = config.apply_to(old);
        new.validate(inner.data.uartclk, inner.data.flags, inner.custom_divisor)?;
        inner.data.termios = new;
        if let Err(e) = uart::change_speed(inner, ops) {
            inner.data.termios = old;
            return Err(e);
        }
        Ok(())
    })
}

/// A port bound as the system console.
#[derive(Clone)]
pub struct UartConsole {
    port: Arc<UartPort>,
}

impl UartConsole {
    /// Marks `port` as the console and powers it up for good.
    pub(crate) fn attach(port: Arc<UartPort>) -> Self {
        port.with_lock(|inner, ops, _| {
            inner.is_console = true;
            uart::set_power(inner, ops, PowerState::On);
        });
        Self { port }
    }

    /// Releases the console mark. Powers the port off unless it is open.
    pub(crate) fn detach(port: &UartPort) {
        port.with_lock(|inner, ops, _| {
            inner.is_console = false;
            if inner.info.is_none() {
                uart::set_power(inner, ops, PowerState::Off);
            }
        });
    }

    /// The console port.
    pub fn port(&self) -> &Arc<UartPort> {
        &self.port
    }

    /// Writes `s`, expanding `\n` to `\r\n`.
    ///
    /// Returns `false` if the text was dropped because the port was busy or
    /// the hardware cannot poll.
    pub fn write(&self, s: &str) -> bool {
        let Some(inner) = self.port.inner.try_lock() else {
            self.port.console_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let ops = self.port.ops();
        for b in s.bytes() {
            let ok = if b == b'\n' {
                ops.poll_put_char(&inner.data, b'\r')
                    .and_then(|()| ops.poll_put_char(&inner.data, b'\n'))
            } else {
                ops.poll_put_char(&inner.data, b)
            };
            if ok.is_err() {
                self.port.console_dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        true
    }

    /// Writes dropped on the console port, across every binding.
    pub fn dropped(&self) -> usize {
        self.port.console_dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Write for UartConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Dropped output is not an error for the formatter.
        UartConsole::write(self, s);
        Ok(())
    }
}

impl fmt::Debug for UartConsole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UartConsole")
            .field("port", &self.port.name())
            .field("dropped", &self.dropped())
            .finish()
    }
}
