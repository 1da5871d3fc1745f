//! Bitflag types shared between the core and hardware drivers.

use bitflags::bitflags;

bitflags! {
    /// Modem control and status lines.
    ///
    /// The first five bits are outputs driven through
    /// [`UartOps::set_modem_control`](crate::UartOps::set_modem_control);
    /// the rest are inputs reported by
    /// [`UartOps::get_modem_control`](crate::UartOps::get_modem_control).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mctrl: u32 {
        /// Data Terminal Ready.
        const DTR  = 1 << 0;
        /// Request To Send.
        const RTS  = 1 << 1;
        /// Auxiliary output 1.
        const OUT1 = 1 << 2;
        /// Auxiliary output 2.
        const OUT2 = 1 << 3;
        /// Loopback.
        const LOOP = 1 << 4;
        /// Clear To Send.
        const CTS  = 1 << 5;
        /// Carrier Detect.
        const CAR  = 1 << 6;
        /// Ring Indicator.
        const RNG  = 1 << 7;
        /// Data Set Ready.
        const DSR  = 1 << 8;

        /// Lines a caller may drive.
        const OUTPUTS = Self::DTR.bits() | Self::RTS.bits() | Self::OUT1.bits()
            | Self::OUT2.bits() | Self::LOOP.bits();
        /// Lines reported by the hardware.
        const INPUTS = Self::CTS.bits() | Self::CAR.bits() | Self::RNG.bits() | Self::DSR.bits();
    }
}

bitflags! {
    /// Per-port configuration flags, persistent across opens.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PortFlags: u32 {
        /// Losing carrier on a callout open does not hang up.
        const CALLOUT_NOHUP = 1 << 0;
        /// A received break raises a secure-attention request.
        const SAK           = 1 << 1;
        /// Carrier detect carries a PPS signal; keeps modem interrupts armed.
        const HARDPPS_CD    = 1 << 2;
        /// Skip the loopback self-test during autoconfiguration.
        const SKIP_TEST     = 1 << 3;
        /// Detect the IRQ during autoconfiguration.
        const AUTO_IRQ      = 1 << 4;
        /// Autoconfigure the port when it is added.
        const BOOT_AUTOCONF = 1 << 5;
        /// Deliver received data with minimal latency.
        const LOW_LATENCY   = 1 << 6;
        /// A requested 38400 baud means "use the custom divisor".
        const SPD_CUST      = 1 << 7;

        /// Flags a caller may change through `set_serial`.
        const USR_MASK = Self::CALLOUT_NOHUP.bits() | Self::SAK.bits()
            | Self::HARDPPS_CD.bits() | Self::LOW_LATENCY.bits() | Self::SPD_CUST.bits();
    }
}

bitflags! {
    /// Runtime state flags, valid only while the port is open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InfoFlags: u32 {
        /// Hardware startup has completed.
        const INITIALIZED    = 1 << 0;
        /// Opened in callout mode.
        const CALLOUT_ACTIVE = 1 << 1;
        /// Opened in normal (dial-in) mode.
        const NORMAL_ACTIVE  = 1 << 2;
        /// Final close in progress.
        const CLOSING        = 1 << 3;
        /// RTS/CTS flow control is enabled.
        const CTS_FLOW       = 1 << 4;
        /// Carrier loss hangs up the session.
        const CHECK_CD       = 1 << 5;
        /// Transmission held off by CTS.
        const HW_STOPPED     = 1 << 6;
        /// Transmission held off by the caller (stop/start).
        const STOPPED        = 1 << 7;
        /// Receive side throttled by the line discipline.
        const THROTTLED      = 1 << 8;
    }
}

bitflags! {
    /// Receive status bits reported with each received character.
    ///
    /// Also used for the port's read and ignore status masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RxStatus: u8 {
        /// Character present. Only meaningful in the ignore mask, where it
        /// discards every received character (receiver disabled).
        const DATA    = 1 << 0;
        /// Receiver overrun; a character was lost before this one.
        const OVERRUN = 1 << 1;
        /// Parity error.
        const PARITY  = 1 << 2;
        /// Framing error.
        const FRAME   = 1 << 3;
        /// Break condition.
        const BREAK   = 1 << 4;
    }
}

bitflags! {
    /// What [`UartOps::config_port`](crate::UartOps::config_port) should
    /// detect.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConfigFlags: u8 {
        /// Detect the port type.
        const TYPE = 1 << 0;
        /// Detect the IRQ line.
        const IRQ  = 1 << 1;
    }
}

bitflags! {
    /// Flags for an open request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u8 {
        /// Do not wait for carrier.
        const NONBLOCK = 1 << 0;
        /// Callout (dial-out) open: ignores carrier.
        const CALLOUT  = 1 << 1;
    }
}

bitflags! {
    /// Events raised under the port lock, delivered after it is released.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Events: u8 {
        /// Transmit ring has room again.
        const WRITE_WAKEUP = 1 << 0;
        /// Transmit ring ran empty.
        const TX_DRAINED   = 1 << 1;
    }
}
