//! Interrupt-side view of a port.
//!
//! [`IrqContext`] is what a driver's [`UartOps::interrupt`] sees: the
//! consumer end of the transmit ring, the receive flip buffer, and the
//! modem-signal handlers. It only exists while the port lock is held;
//! everything that must run without the lock (line discipline calls,
//! wakeups, hangup) is recorded and performed after the handler returns.

use crate::flags::{Events, InfoFlags, PortFlags, RxStatus};
use crate::icount::bump;
use crate::ldisc::{RxChar, RxFlag};
use crate::modem;
use crate::ops::UartOps;
use crate::port::PortData;
use crate::state::{FLIP_BUF_SIZE, Pending, PortInfo};

/// Interrupt-context access to one port.
pub struct IrqContext<'a> {
    pub(crate) port: &'a mut PortData,
    pub(crate) info: Option<&'a mut PortInfo>,
    pub(crate) ops: &'a dyn UartOps,
    pub(crate) pending: &'a mut Pending,
}

impl<'a> IrqContext<'a> {
    pub(crate) fn new(
        port: &'a mut PortData,
        info: Option<&'a mut PortInfo>,
        ops: &'a dyn UartOps,
        pending: &'a mut Pending,
    ) -> Self {
        Self {
            port,
            info,
            ops,
            pending,
        }
    }

    /// The port descriptor.
    pub fn port(&self) -> &PortData {
        self.port
    }

    /// The port descriptor, mutably.
    pub fn port_mut(&mut self) -> &mut PortData {
        self.port
    }

    /// Returns `true` if the port is open.
    pub fn is_open(&self) -> bool {
        self.info.is_some()
    }

    // -----------------------------------------------------------------------
    // Transmit side
    // -----------------------------------------------------------------------

    /// Takes the pending XON/XOFF character, counting it as transmitted.
    pub fn take_x_char(&mut self) -> Option<u8> {
        let ch = self.port.x_char.take()?;
        bump(&mut self.port.icount.tx);
        Some(ch)
    }

    /// Returns `true` if transmission is held off, or the port is closed.
    pub fn tx_stopped(&self) -> bool {
        self.info.as_deref().is_none_or(PortInfo::tx_stopped)
    }

    /// Bytes waiting in the transmit ring.
    pub fn tx_pending(&self) -> usize {
        self.info.as_deref().map_or(0, |i| i.xmit.pending())
    }

    /// Pops the next byte to send, counting it as transmitted.
    ///
    /// Raises a write wakeup when the ring drains past its low-water mark.
    pub fn tx_pop(&mut self) -> Option<u8> {
        let info = self.info.as_deref_mut()?;
        let (byte, wakeup) = info.xmit.pop_wakeup()?;
        if wakeup {
            info.events |= Events::WRITE_WAKEUP;
        }
        if info.xmit.is_empty() {
            info.events |= Events::TX_DRAINED;
        }
        bump(&mut self.port.icount.tx);
        Some(byte)
    }

    // -----------------------------------------------------------------------
    // Receive side
    // -----------------------------------------------------------------------

    /// Records a received character with its line status.
    ///
    /// Updates the error counters, applies the read and ignore masks, and
    /// queues the character (plus an overrun marker if needed) for the line
    /// discipline. Characters are counted but dropped while the port is
    /// closed or the flip buffer is full.
    pub fn insert_char(&mut self, status: RxStatus, ch: u8) {
        let status = status | RxStatus::DATA;
        let icount = &mut self.port.icount;
        bump(&mut icount.rx);
        if status.contains(RxStatus::BREAK) {
            bump(&mut icount.brk);
        } else if status.contains(RxStatus::PARITY) {
            bump(&mut icount.parity);
        } else if status.contains(RxStatus::FRAME) {
            bump(&mut icount.frame);
        }
        if status.contains(RxStatus::OVERRUN) {
            bump(&mut icount.overrun);
        }
        if status.contains(RxStatus::BREAK) {
            self.handle_break();
        }

        let masked = status & self.port.read_status_mask;
        let ignore = self.port.ignore_status_mask;
        let flag = if masked.contains(RxStatus::BREAK) {
            RxFlag::Break
        } else if masked.contains(RxStatus::PARITY) {
            RxFlag::Parity
        } else if masked.contains(RxStatus::FRAME) {
            RxFlag::Frame
        } else {
            RxFlag::Normal
        };

        if (masked & ignore & !RxStatus::OVERRUN).is_empty() {
            self.queue_rx(RxChar { ch, flag });
        }
        if (masked & !ignore).contains(RxStatus::OVERRUN) {
            self.queue_rx(RxChar {
                ch: 0,
                flag: RxFlag::Overrun,
            });
        }
    }

    fn queue_rx(&mut self, rx: RxChar) {
        let Some(info) = self.info.as_deref_mut() else {
            return;
        };
        if info.flip.len() >= FLIP_BUF_SIZE {
            bump(&mut self.port.icount.buf_overrun);
            return;
        }
        info.flip.push(rx);
    }

    /// Reacts to a received break: raises a secure-attention request on
    /// ports with [`PortFlags::SAK`].
    pub fn handle_break(&mut self) {
        if self.port.flags.contains(PortFlags::SAK) && self.info.is_some() {
            self.pending.sak = true;
        }
    }

    // -----------------------------------------------------------------------
    // Modem status
    // -----------------------------------------------------------------------

    /// Carrier detect changed; see [`modem::handle_dcd_change`].
    pub fn handle_dcd_change(&mut self, active: bool) {
        modem::handle_dcd_change(self, active);
    }

    /// Clear-to-send changed; see [`modem::handle_cts_change`].
    pub fn handle_cts_change(&mut self, active: bool) {
        modem::handle_cts_change(self, active);
    }

    /// Data-set-ready changed.
    pub fn handle_dsr_change(&mut self) {
        modem::handle_dsr_change(self);
    }

    /// Ring indicator trailing edge.
    pub fn handle_ri_change(&mut self) {
        modem::handle_ri_change(self);
    }

    pub(crate) fn info_flags(&self) -> InfoFlags {
        self.info.as_deref().map_or(InfoFlags::empty(), |i| i.flags)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::ldisc::OpenRequest;
    use crate::testing::{MockOps, Recorder};
    use alloc::sync::Arc;

    fn open_info() -> PortInfo {
        PortInfo::new(&OpenRequest::new(Arc::new(Recorder::default())))
    }

    fn configured_port() -> PortData {
        let mut port = PortData::default();
        port.termios.iflag = crate::InputFlags::INPCK | crate::InputFlags::BRKINT;
        port.update_status_masks();
        port
    }

    #[test]
    fn tx_pop_counts_and_drains() {
        let ops = MockOps::default();
        let mut port = configured_port();
        let mut info = open_info();
        info.xmit.write_from(b"ok");
        let mut pending = Pending::default();
        let mut cx = IrqContext::new(&mut port, Some(&mut info), &ops, &mut pending);
        assert_eq!(cx.tx_pending(), 2);
        assert_eq!(cx.tx_pop(), Some(b'o'));
        assert_eq!(cx.tx_pop(), Some(b'k'));
        assert_eq!(cx.tx_pop(), None);
        assert_eq!(port.icount.tx, 2);
    }

    #[test]
    fn errors_are_counted_and_annotated() {
        let ops = MockOps::default();
        let mut port = configured_port();
        let mut info = open_info();
        let mut pending = Pending::default();
        let mut cx = IrqContext::new(&mut port, Some(&mut info), &ops, &mut pending);
        cx.insert_char(RxStatus::empty(), b'a');
        cx.insert_char(RxStatus::PARITY, b'b');
        cx.insert_char(RxStatus::FRAME | RxStatus::OVERRUN, b'c');
        cx.insert_char(RxStatus::BREAK, 0);

        let flags: Vec<_> = info.flip.iter().map(|r| (r.ch, r.flag)).collect();
        assert_eq!(
            flags,
            [
                (b'a', RxFlag::Normal),
                (b'b', RxFlag::Parity),
                (b'c', RxFlag::Frame),
                (0, RxFlag::Overrun),
                (0, RxFlag::Break),
            ]
        );
        let ic = port.icount;
        assert_eq!((ic.rx, ic.parity, ic.frame, ic.overrun, ic.brk), (4, 1, 1, 1, 1));
    }

    #[test]
    fn ignored_errors_are_counted_not_queued() {
        let ops = MockOps::default();
        let mut port = PortData::default();
        port.termios.iflag = crate::InputFlags::INPCK | crate::InputFlags::IGNPAR;
        port.update_status_masks();
        let mut info = open_info();
        let mut pending = Pending::default();
        let mut cx = IrqContext::new(&mut port, Some(&mut info), &ops, &mut pending);
        cx.insert_char(RxStatus::PARITY, b'x');
        assert!(info.flip.is_empty());
        assert_eq!(port.icount.parity, 1);
    }

    #[test]
    fn flip_overflow_counts_buf_overrun() {
        let ops = MockOps::default();
        let mut port = configured_port();
        let mut info = open_info();
        let mut pending = Pending::default();
        let mut cx = IrqContext::new(&mut port, Some(&mut info), &ops, &mut pending);
        for _ in 0..FLIP_BUF_SIZE + 3 {
            cx.insert_char(RxStatus::empty(), b'z');
        }
        assert_eq!(info.flip.len(), FLIP_BUF_SIZE);
        assert_eq!(port.icount.buf_overrun, 3);
    }

    #[test]
    fn break_raises_sak_only_when_enabled() {
        let ops = MockOps::default();
        let mut port = configured_port();
        port.flags = PortFlags::SAK;
        let mut info = open_info();
        let mut pending = Pending::default();
        IrqContext::new(&mut port, Some(&mut info), &ops, &mut pending)
            .insert_char(RxStatus::BREAK, 0);
        assert!(pending.sak);
    }

    #[test]
    fn closed_port_counts_but_drops() {
        let ops = MockOps::default();
        let mut port = configured_port();
        let mut pending = Pending::default();
        let mut cx = IrqContext::new(&mut port, None, &ops, &mut pending);
        assert!(cx.tx_stopped());
        assert_eq!(cx.tx_pop(), None);
        cx.insert_char(RxStatus::empty(), b'q');
        assert_eq!(port.icount.rx, 1);
    }
}
