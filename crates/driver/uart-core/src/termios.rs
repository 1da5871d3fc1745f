//! Line configuration: baud rate, framing and flow control.
//!
//! [`Termios`] is the flag-level form handed to
//! [`UartOps::reconfigure`](crate::UartOps::reconfigure); [`LineConfig`] is
//! the typed form callers usually build. Both are validated against the
//! port's reference clock before anything reaches the hardware.

use bitflags::bitflags;

use crate::error::SerialError;
use crate::flags::PortFlags;

/// Baud rate used to program the divisor while the line is hung up (B0).
const HANGUP_DIVISOR_BAUD: u32 = 9600;

/// Largest value a 16-bit divisor latch can hold.
pub(crate) const MAX_DIVISOR: u64 = 0xffff;

bitflags! {
    /// Control-mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlFlags: u32 {
        /// Character size mask.
        const CSIZE   = 0x0030;
        /// 5 data bits.
        const CS5     = 0x0000;
        /// 6 data bits.
        const CS6     = 0x0010;
        /// 7 data bits.
        const CS7     = 0x0020;
        /// 8 data bits.
        const CS8     = 0x0030;
        /// Two stop bits.
        const CSTOPB  = 0x0040;
        /// Enable the receiver.
        const CREAD   = 0x0080;
        /// Generate and check parity.
        const PARENB  = 0x0100;
        /// Odd parity (even when clear).
        const PARODD  = 0x0200;
        /// Drop DTR/RTS on last close.
        const HUPCL   = 0x0400;
        /// Ignore modem status lines.
        const CLOCAL  = 0x0800;
        /// RTS/CTS hardware flow control.
        const CRTSCTS = 0x8000_0000;
    }
}

bitflags! {
    /// Input-mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputFlags: u32 {
        /// Ignore break conditions.
        const IGNBRK = 0x0001;
        /// Report break conditions.
        const BRKINT = 0x0002;
        /// Ignore characters with parity or framing errors.
        const IGNPAR = 0x0004;
        /// Mark parity and framing errors.
        const PARMRK = 0x0008;
        /// Check input parity.
        const INPCK  = 0x0010;
        /// Honour XON/XOFF on output.
        const IXON   = 0x0400;
        /// Send XON/XOFF to throttle input.
        const IXOFF  = 0x1000;
    }
}

/// Parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataBits {
    /// 5 bits.
    Five,
    /// 6 bits.
    Six,
    /// 7 bits.
    Seven,
    /// 8 bits.
    #[default]
    Eight,
}

impl DataBits {
    /// Builds from a bit count in `5..=8`.
    pub fn from_count(bits: u8) -> Result<Self, SerialError> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            _ => Err(SerialError::InvalidConfig),
        }
    }

    /// Returns the bit count.
    pub fn count(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }

    fn csize(self) -> ControlFlags {
        match self {
            Self::Five => ControlFlags::CS5,
            Self::Six => ControlFlags::CS6,
            Self::Seven => ControlFlags::CS7,
            Self::Eight => ControlFlags::CS8,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

// ---------------------------------------------------------------------------
// Termios
// ---------------------------------------------------------------------------

/// Flag-level line settings of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Termios {
    /// Control-mode flags.
    pub cflag: ControlFlags,
    /// Input-mode flags.
    pub iflag: InputFlags,
    /// Baud rate; zero requests a modem hang-up.
    pub baud: u32,
    /// Character sent to resume input (XON).
    pub start_char: u8,
    /// Character sent to throttle input (XOFF).
    pub stop_char: u8,
}

impl Default for Termios {
    /// 9600 8N1, receiver on, hang up on close, modem lines ignored.
    fn default() -> Self {
        Self {
            cflag: ControlFlags::CS8
                | ControlFlags::CREAD
                | ControlFlags::HUPCL
                | ControlFlags::CLOCAL,
            iflag: InputFlags::empty(),
            baud: 9600,
            start_char: 0x11,
            stop_char: 0x13,
        }
    }
}

impl Termios {
    /// Data bits encoded in `CSIZE`.
    pub fn data_bits(&self) -> DataBits {
        let size = self.cflag & ControlFlags::CSIZE;
        if size == ControlFlags::CS8 {
            DataBits::Eight
        } else if size == ControlFlags::CS7 {
            DataBits::Seven
        } else if size == ControlFlags::CS6 {
            DataBits::Six
        } else {
            DataBits::Five
        }
    }

    /// Parity encoded in `PARENB`/`PARODD`.
    pub fn parity(&self) -> Parity {
        if !self.cflag.contains(ControlFlags::PARENB) {
            Parity::None
        } else if self.cflag.contains(ControlFlags::PARODD) {
            Parity::Odd
        } else {
            Parity::Even
        }
    }

    /// Stop bits encoded in `CSTOPB`.
    pub fn stop_bits(&self) -> StopBits {
        if self.cflag.contains(ControlFlags::CSTOPB) {
            StopBits::Two
        } else {
            StopBits::One
        }
    }

    /// Returns `true` if carrier is ignored.
    pub fn clocal(&self) -> bool {
        self.cflag.contains(ControlFlags::CLOCAL)
    }

    /// Returns `true` if RTS/CTS flow control is requested.
    pub fn crtscts(&self) -> bool {
        self.cflag.contains(ControlFlags::CRTSCTS)
    }

    /// Computes the clock divisor for this baud rate.
    ///
    /// B0 programs the divisor for 9600 baud; the hang-up itself is done on
    /// the modem lines. With [`PortFlags::SPD_CUST`] a request for 38400
    /// baud selects `custom_divisor` instead, which must fit the latch.
    pub fn divisor(
        &self,
        uartclk: u32,
        flags: PortFlags,
        custom_divisor: u32,
    ) -> Result<u32, SerialError> {
        if self.baud == 38400 && flags.contains(PortFlags::SPD_CUST) && custom_divisor != 0 {
            if u64::from(custom_divisor) > MAX_DIVISOR {
                return Err(SerialError::InvalidConfig);
            }
            return Ok(custom_divisor);
        }
        let baud = if self.baud == 0 {
            HANGUP_DIVISOR_BAUD
        } else {
            self.baud
        };
        let quot = u64::from(uartclk) / (16 * u64::from(baud));
        if quot == 0 || quot > MAX_DIVISOR {
            return Err(SerialError::InvalidConfig);
        }
        // Bounded by MAX_DIVISOR above.
        Ok(u32::try_from(quot).unwrap_or(u32::MAX))
    }

    /// Checks that the hardware can produce these settings.
    ///
    /// Invalid combinations are rejected, never clamped.
    pub fn validate(
        &self,
        uartclk: u32,
        flags: PortFlags,
        custom_divisor: u32,
    ) -> Result<u32, SerialError> {
        if self.cflag.contains(ControlFlags::PARODD) && !self.cflag.contains(ControlFlags::PARENB)
        {
            return Err(SerialError::InvalidConfig);
        }
        self.divisor(uartclk, flags, custom_divisor)
    }
}

// ---------------------------------------------------------------------------
// LineConfig
// ---------------------------------------------------------------------------

/// Typed line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineConfig {
    /// Baud rate; zero hangs up the modem.
    pub baud: u32,
    /// Parity mode.
    pub parity: Parity,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// RTS/CTS flow control.
    pub hw_flow: bool,
    /// Wait for and monitor carrier detect.
    pub carrier_required: bool,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud: 9600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            hw_flow: false,
            carrier_required: false,
        }
    }
}

impl LineConfig {
    /// Validates against a port clock and returns the divisor.
    pub fn validate(&self, uartclk: u32) -> Result<u32, SerialError> {
        self.to_termios()
            .validate(uartclk, PortFlags::empty(), 0)
    }

    /// Converts to flag form, keeping default start/stop characters.
    pub fn to_termios(&self) -> Termios {
        self.apply_to(Termios::default())
    }

    /// Overlays these settings on `base`, keeping its other flags.
    pub fn apply_to(&self, base: Termios) -> Termios {
        let mut cflag = base.cflag
            & !(ControlFlags::CSIZE
                | ControlFlags::CSTOPB
                | ControlFlags::PARENB
                | ControlFlags::PARODD
                | ControlFlags::CRTSCTS
                | ControlFlags::CLOCAL);
        cflag |= self.data_bits.csize() | ControlFlags::CREAD;
        match self.parity {
            Parity::None => {}
            Parity::Even => cflag |= ControlFlags::PARENB,
            Parity::Odd => cflag |= ControlFlags::PARENB | ControlFlags::PARODD,
        }
        if self.stop_bits == StopBits::Two {
            cflag |= ControlFlags::CSTOPB;
        }
        if self.hw_flow {
            cflag |= ControlFlags::CRTSCTS;
        }
        if !self.carrier_required {
            cflag |= ControlFlags::CLOCAL;
        }
        let mut iflag = base.iflag;
        iflag.set(InputFlags::INPCK, self.parity != Parity::None);
        Termios {
            cflag,
            iflag,
            baud: self.baud,
            ..base
        }
    }

    /// Extracts the typed settings from flag form.
    pub fn from_termios(termios: &Termios) -> Self {
        Self {
            baud: termios.baud,
            parity: termios.parity(),
            data_bits: termios.data_bits(),
            stop_bits: termios.stop_bits(),
            hw_flow: termios.crtscts(),
            carrier_required: !termios.clocal(),
        }
    }
}
