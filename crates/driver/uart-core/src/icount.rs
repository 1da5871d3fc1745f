//! Interrupt and modem-status counters.

/// Per-port event counters.
///
/// Counters only ever increase (wrapping at `u32::MAX`) and are reset only
/// when the port is registered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct Icount {
    pub cts: u32,
    pub dsr: u32,
    pub rng: u32,
    pub dcd: u32,
    pub rx: u32,
    pub tx: u32,
    pub frame: u32,
    pub overrun: u32,
    pub parity: u32,
    pub brk: u32,
    pub buf_overrun: u32,
}

/// Increments a counter, wrapping on overflow.
#[inline]
pub(crate) fn bump(counter: &mut u32) {
    *counter = counter.wrapping_add(1);
}

impl Icount {
    /// Returns `true` if any modem-status counter selected by `mask`
    /// differs between `self` and `earlier`.
    pub(crate) fn modem_changed(&self, earlier: &Self, mask: crate::Mctrl) -> bool {
        use crate::Mctrl;
        (mask.contains(Mctrl::RNG) && self.rng != earlier.rng)
            || (mask.contains(Mctrl::DSR) && self.dsr != earlier.dsr)
            || (mask.contains(Mctrl::CAR) && self.dcd != earlier.dcd)
            || (mask.contains(Mctrl::CTS) && self.cts != earlier.cts)
    }
}
