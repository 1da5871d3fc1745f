//! Register model of the emulated UART.
//!
//! Bit layouts follow the 16550 so that register dumps read the same as on
//! real hardware.

use bitflags::bitflags;
use uart_core::{ControlFlags, Mctrl, RxStatus};

bitflags! {
    /// Interrupt Enable Register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Ier: u8 {
        /// Received data available.
        const DATA_AVAILABLE = 1 << 0;
        /// Transmitter holding register empty.
        const THR_EMPTY      = 1 << 1;
        /// Receiver line status.
        const LINE_STATUS    = 1 << 2;
        /// Modem status change.
        const MODEM_STATUS   = 1 << 3;
    }
}

bitflags! {
    /// Line Control Register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Lcr: u8 {
        /// Word length bit 0.
        const WORD_LEN_0    = 1 << 0;
        /// Word length bit 1.
        const WORD_LEN_1    = 1 << 1;
        /// Extra stop bit.
        const STOP_BIT      = 1 << 2;
        /// Parity enable.
        const PARITY_ENABLE = 1 << 3;
        /// Even parity.
        const EVEN_PARITY   = 1 << 4;
        /// Stick parity.
        const STICK_PARITY  = 1 << 5;
        /// Set break.
        const BREAK         = 1 << 6;
        /// Divisor Latch Access Bit.
        const DLAB          = 1 << 7;

        /// 8 data bits, no parity, 1 stop bit.
        const EIGHT_N_ONE = Self::WORD_LEN_0.bits() | Self::WORD_LEN_1.bits();
    }
}

impl Lcr {
    /// Framing bits for the given control flags.
    pub fn from_cflag(cflag: ControlFlags) -> Self {
        let size = cflag & ControlFlags::CSIZE;
        let mut lcr = if size == ControlFlags::CS8 {
            Self::EIGHT_N_ONE
        } else if size == ControlFlags::CS7 {
            Self::WORD_LEN_1
        } else if size == ControlFlags::CS6 {
            Self::WORD_LEN_0
        } else {
            Self::empty()
        };
        if cflag.contains(ControlFlags::CSTOPB) {
            lcr |= Self::STOP_BIT;
        }
        if cflag.contains(ControlFlags::PARENB) {
            lcr |= Self::PARITY_ENABLE;
            if !cflag.contains(ControlFlags::PARODD) {
                lcr |= Self::EVEN_PARITY;
            }
        }
        lcr
    }
}

bitflags! {
    /// Modem Control Register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mcr: u8 {
        /// Data Terminal Ready.
        const DTR      = 1 << 0;
        /// Request To Send.
        const RTS      = 1 << 1;
        /// Auxiliary output 1.
        const OUT1     = 1 << 2;
        /// Auxiliary output 2.
        const OUT2     = 1 << 3;
        /// Loopback mode.
        const LOOPBACK = 1 << 4;
    }
}

impl Mcr {
    /// Register image of the core's modem outputs.
    pub fn from_mctrl(mctrl: Mctrl) -> Self {
        let mut mcr = Self::empty();
        mcr.set(Self::DTR, mctrl.contains(Mctrl::DTR));
        mcr.set(Self::RTS, mctrl.contains(Mctrl::RTS));
        mcr.set(Self::OUT1, mctrl.contains(Mctrl::OUT1));
        mcr.set(Self::OUT2, mctrl.contains(Mctrl::OUT2));
        mcr.set(Self::LOOPBACK, mctrl.contains(Mctrl::LOOP));
        mcr
    }

    /// Inputs seen in loopback: DTR drives DSR, RTS drives CTS, OUT1
    /// drives RI and OUT2 drives DCD.
    pub fn looped_inputs(self) -> Msr {
        let mut msr = Msr::empty();
        msr.set(Msr::DSR, self.contains(Self::DTR));
        msr.set(Msr::CTS, self.contains(Self::RTS));
        msr.set(Msr::RI, self.contains(Self::OUT1));
        msr.set(Msr::DCD, self.contains(Self::OUT2));
        msr
    }
}

bitflags! {
    /// Line Status Register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Lsr: u8 {
        /// Data ready.
        const DATA_READY        = 1 << 0;
        /// Overrun error.
        const OVERRUN_ERROR     = 1 << 1;
        /// Parity error.
        const PARITY_ERROR      = 1 << 2;
        /// Framing error.
        const FRAMING_ERROR     = 1 << 3;
        /// Break indicator.
        const BREAK_INDICATOR   = 1 << 4;
        /// Transmit holding register empty.
        const THR_EMPTY         = 1 << 5;
        /// Transmitter fully empty.
        const TRANSMITTER_EMPTY = 1 << 6;
    }
}

impl Lsr {
    /// Receive status as the core understands it.
    pub fn rx_status(self) -> RxStatus {
        let mut status = RxStatus::empty();
        status.set(RxStatus::OVERRUN, self.contains(Self::OVERRUN_ERROR));
        status.set(RxStatus::PARITY, self.contains(Self::PARITY_ERROR));
        status.set(RxStatus::FRAME, self.contains(Self::FRAMING_ERROR));
        status.set(RxStatus::BREAK, self.contains(Self::BREAK_INDICATOR));
        status
    }

    /// Error bits for a receive status.
    pub fn from_rx_status(status: RxStatus) -> Self {
        let mut lsr = Self::DATA_READY;
        lsr.set(Self::OVERRUN_ERROR, status.contains(RxStatus::OVERRUN));
        lsr.set(Self::PARITY_ERROR, status.contains(RxStatus::PARITY));
        lsr.set(Self::FRAMING_ERROR, status.contains(RxStatus::FRAME));
        lsr.set(Self::BREAK_INDICATOR, status.contains(RxStatus::BREAK));
        lsr
    }
}

bitflags! {
    /// Modem Status Register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Msr: u8 {
        /// CTS changed since last read.
        const DELTA_CTS = 1 << 0;
        /// DSR changed since last read.
        const DELTA_DSR = 1 << 1;
        /// RI went inactive since last read.
        const TRAILING_RI = 1 << 2;
        /// DCD changed since last read.
        const DELTA_DCD = 1 << 3;
        /// Clear To Send.
        const CTS = 1 << 4;
        /// Data Set Ready.
        const DSR = 1 << 5;
        /// Ring Indicator.
        const RI  = 1 << 6;
        /// Data Carrier Detect.
        const DCD = 1 << 7;

        /// All delta bits.
        const DELTAS = Self::DELTA_CTS.bits() | Self::DELTA_DSR.bits()
            | Self::TRAILING_RI.bits() | Self::DELTA_DCD.bits();
        /// All line bits.
        const LINES = Self::CTS.bits() | Self::DSR.bits() | Self::RI.bits() | Self::DCD.bits();
    }
}

impl Msr {
    /// Line states as modem-control bits.
    pub fn to_mctrl(self) -> Mctrl {
        let mut mctrl = Mctrl::empty();
        mctrl.set(Mctrl::CTS, self.contains(Self::CTS));
        mctrl.set(Mctrl::DSR, self.contains(Self::DSR));
        mctrl.set(Mctrl::RNG, self.contains(Self::RI));
        mctrl.set(Mctrl::CAR, self.contains(Self::DCD));
        mctrl
    }

    /// Delta bits implied by moving from `old` line states to `self`.
    pub fn deltas_from(self, old: Self) -> Self {
        let changed = (self ^ old) & Self::LINES;
        let mut deltas = Self::empty();
        deltas.set(Self::DELTA_CTS, changed.contains(Self::CTS));
        deltas.set(Self::DELTA_DSR, changed.contains(Self::DSR));
        deltas.set(Self::DELTA_DCD, changed.contains(Self::DCD));
        deltas.set(
            Self::TRAILING_RI,
            old.contains(Self::RI) && !self.contains(Self::RI),
        );
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcr_encodes_framing() {
        let cflag = ControlFlags::CS7 | ControlFlags::PARENB | ControlFlags::CSTOPB;
        assert_eq!(
            Lcr::from_cflag(cflag),
            Lcr::WORD_LEN_1 | Lcr::STOP_BIT | Lcr::PARITY_ENABLE | Lcr::EVEN_PARITY
        );
        let odd = ControlFlags::CS8 | ControlFlags::PARENB | ControlFlags::PARODD;
        assert_eq!(Lcr::from_cflag(odd), Lcr::EIGHT_N_ONE | Lcr::PARITY_ENABLE);
    }

    #[test]
    fn loopback_wiring() {
        let mcr = Mcr::DTR | Mcr::OUT2;
        assert_eq!(mcr.looped_inputs().to_mctrl(), Mctrl::DSR | Mctrl::CAR);
    }

    #[test]
    fn ring_delta_is_trailing_edge_only() {
        assert!(Msr::RI.deltas_from(Msr::empty()).is_empty());
        assert_eq!(Msr::empty().deltas_from(Msr::RI), Msr::TRAILING_RI);
        assert_eq!(
            Msr::DCD.deltas_from(Msr::CTS),
            Msr::DELTA_DCD | Msr::DELTA_CTS
        );
    }
}
