//! Port descriptor: the hardware-identifying record of one serial line.

use crate::flags::{Mctrl, PortFlags, RxStatus};
use crate::icount::Icount;
use crate::termios::{ControlFlags, InputFlags, Parity, StopBits, Termios};

/// Default UART reference clock (1.8432 MHz crystal).
pub const DEFAULT_UARTCLK: u32 = 1_843_200;

// ---------------------------------------------------------------------------
// Port type identification
// ---------------------------------------------------------------------------

/// Detected hardware type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum PortType {
    /// Not detected; the port cannot be opened.
    #[default]
    Unknown = 0,
    P8250 = 1,
    P16450 = 2,
    P16550 = 3,
    P16550A = 4,
    Cirrus = 5,
    P16650 = 6,
    P16650V2 = 7,
    P16750 = 8,
    Startech = 9,
    P16C950 = 10,
    P16654 = 11,
    P16850 = 12,
    Rsa = 13,
    Amba = 32,
    Clps711x = 33,
    Sa1100 = 34,
    Uart00 = 35,
    P21285 = 37,
    /// Software-emulated UART.
    Virtual = 64,
}

impl PortType {
    /// Human-readable name used in registration messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::P8250 => "8250",
            Self::P16450 => "16450",
            Self::P16550 => "16550",
            Self::P16550A => "16550A",
            Self::Cirrus => "Cirrus",
            Self::P16650 => "ST16650",
            Self::P16650V2 => "ST16650V2",
            Self::P16750 => "TI16750",
            Self::Startech => "Startech",
            Self::P16C950 => "16C950/954",
            Self::P16654 => "ST16654",
            Self::P16850 => "XR16850",
            Self::Rsa => "RSA",
            Self::Amba => "AMBA",
            Self::Clps711x => "CLPS711x",
            Self::Sa1100 => "SA1100",
            Self::Uart00 => "UART00",
            Self::P21285 => "DC21285",
            Self::Virtual => "virtual",
        }
    }

    /// Looks up a type by its numeric identifier.
    pub const fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => Self::Unknown,
            1 => Self::P8250,
            2 => Self::P16450,
            3 => Self::P16550,
            4 => Self::P16550A,
            5 => Self::Cirrus,
            6 => Self::P16650,
            7 => Self::P16650V2,
            8 => Self::P16750,
            9 => Self::Startech,
            10 => Self::P16C950,
            11 => Self::P16654,
            12 => Self::P16850,
            13 => Self::Rsa,
            32 => Self::Amba,
            33 => Self::Clps711x,
            34 => Self::Sa1100,
            35 => Self::Uart00,
            37 => Self::P21285,
            64 => Self::Virtual,
            _ => return None,
        })
    }
}

/// How the port's registers are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IoType {
    /// Port I/O space.
    #[default]
    Port,
    /// Hub6 multiplexed port I/O.
    Hub6,
    /// Memory-mapped.
    Mem,
}

// ---------------------------------------------------------------------------
// PortData
// ---------------------------------------------------------------------------

/// Descriptor of one serial port.
///
/// Everything a hardware driver needs to reach and program the device.
/// Mutated only under the port lock; drivers receive it by reference from
/// every [`UartOps`](crate::UartOps) call.
#[derive(Debug, Clone)]
pub struct PortData {
    /// Port I/O base.
    pub iobase: u64,
    /// Mapped register base for memory-mapped ports.
    pub membase: Option<usize>,
    /// Physical address to map for memory-mapped ports.
    pub mapbase: u64,
    /// IRQ line.
    pub irq: u32,
    /// Reference clock in Hz.
    pub uartclk: u32,
    /// Transmit FIFO depth.
    pub fifosize: u16,
    /// Register offset shift.
    pub regshift: u8,
    /// Register access style.
    pub iotype: IoType,
    /// Receive status bits that are reported.
    pub read_status_mask: RxStatus,
    /// Receive status bits whose characters are discarded.
    pub ignore_status_mask: RxStatus,
    /// Persistent port flags.
    pub flags: PortFlags,
    /// Last modem control outputs written to the hardware.
    pub mctrl: Mctrl,
    /// Detected hardware type.
    pub port_type: PortType,
    /// Line number within the owning driver.
    pub line: usize,
    /// High-priority character (XON/XOFF) waiting to be sent.
    pub x_char: Option<u8>,
    /// Event counters.
    pub icount: Icount,
    /// Current line settings.
    pub termios: Termios,
    /// Time to drain a full FIFO at the current baud, in microseconds.
    pub timeout_us: u32,
}

impl Default for PortData {
    fn default() -> Self {
        Self {
            iobase: 0,
            membase: None,
            mapbase: 0,
            irq: 0,
            uartclk: DEFAULT_UARTCLK,
            fifosize: 1,
            regshift: 0,
            iotype: IoType::Port,
            read_status_mask: RxStatus::empty(),
            ignore_status_mask: RxStatus::empty(),
            flags: PortFlags::empty(),
            mctrl: Mctrl::empty(),
            port_type: PortType::Unknown,
            line: 0,
            x_char: None,
            icount: Icount::default(),
            termios: Termios::default(),
            timeout_us: 0,
        }
    }
}

impl PortData {
    /// Creates a port-I/O descriptor.
    pub fn new(line: usize, iobase: u64, irq: u32) -> Self {
        Self {
            line,
            iobase,
            irq,
            ..Self::default()
        }
    }

    /// Returns `true` if the descriptor points at any hardware at all.
    pub fn has_address(&self) -> bool {
        self.iobase != 0 || self.membase.is_some() || self.mapbase != 0
    }

    /// Recomputes the read and ignore status masks from the current
    /// input and control flags.
    pub fn update_status_masks(&mut self) {
        let iflag = self.termios.iflag;
        let cflag = self.termios.cflag;

        self.read_status_mask = RxStatus::OVERRUN | RxStatus::DATA;
        if iflag.contains(InputFlags::INPCK) {
            self.read_status_mask |= RxStatus::FRAME | RxStatus::PARITY;
        }
        if iflag.intersects(InputFlags::BRKINT | InputFlags::PARMRK) {
            self.read_status_mask |= RxStatus::BREAK;
        }

        self.ignore_status_mask = RxStatus::empty();
        if iflag.contains(InputFlags::IGNPAR) {
            self.ignore_status_mask |= RxStatus::PARITY | RxStatus::FRAME;
        }
        if iflag.contains(InputFlags::IGNBRK) {
            self.ignore_status_mask |= RxStatus::BREAK;
            // Ignoring both means overruns are uninteresting too.
            if iflag.contains(InputFlags::IGNPAR) {
                self.ignore_status_mask |= RxStatus::OVERRUN;
            }
        }
        if !cflag.contains(ControlFlags::CREAD) {
            self.ignore_status_mask |= RxStatus::DATA;
        }
    }

    /// Recomputes [`timeout_us`](Self::timeout_us) for `baud`.
    pub fn update_timeout(&mut self, baud: u32) {
        let t = &self.termios;
        let mut bits = 1 + u32::from(t.data_bits().count());
        if t.parity() != Parity::None {
            bits += 1;
        }
        bits += match t.stop_bits() {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        let baud = u64::from(baud.max(1));
        let us = u64::from(bits) * u64::from(self.fifosize) * 1_000_000 / baud + 20_000;
        self.timeout_us = u32::try_from(us).unwrap_or(u32::MAX);
    }

    /// Returns `true` if modem-status interrupts should be armed: when
    /// carrier drives PPS, when RTS/CTS is on, or when carrier matters.
    pub fn wants_modem_status(&self) -> bool {
        self.flags.contains(PortFlags::HARDPPS_CD)
            || self.termios.crtscts()
            || !self.termios.clocal()
    }
}

// ---------------------------------------------------------------------------
// SerialInfo
// ---------------------------------------------------------------------------

/// User-visible port configuration for `get_serial`/`set_serial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct SerialInfo {
    pub port_type: PortType,
    pub line: usize,
    pub port: u64,
    pub irq: u32,
    pub flags: PortFlags,
    pub xmit_fifo_size: u16,
    /// Reference clock divided by 16.
    pub baud_base: u32,
    pub close_delay: u32,
    pub closing_wait: u32,
    pub custom_divisor: u32,
    pub io_type: IoType,
    pub iomem_base: Option<usize>,
    pub iomem_reg_shift: u8,
}
