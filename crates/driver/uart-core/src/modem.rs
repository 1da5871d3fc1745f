//! Modem-signal event handlers.
//!
//! Called from a driver's interrupt routine (through [`IrqContext`]) when
//! the hardware reports a status-line transition. They never fail: every
//! event is counted, and anything that needs the lock released is recorded
//! in the pending set.

use crate::flags::{Events, InfoFlags, PortFlags};
use crate::icount::bump;
use crate::irq::IrqContext;

/// Carrier detect changed to `active`.
///
/// With carrier checking on, a rising carrier wakes blocked openers and a
/// falling carrier hangs up the owning session, unless this is a callout
/// open on a port with [`PortFlags::CALLOUT_NOHUP`].
pub fn handle_dcd_change(cx: &mut IrqContext<'_>, active: bool) {
    bump(&mut cx.port.icount.dcd);
    cx.pending.modem_delta = true;

    let flags = cx.info_flags();
    if !flags.contains(InfoFlags::CHECK_CD) {
        return;
    }
    if active {
        cx.pending.wake_open = true;
    } else if !(flags.contains(InfoFlags::CALLOUT_ACTIVE)
        && cx.port.flags.contains(PortFlags::CALLOUT_NOHUP))
    {
        cx.pending.hangup = true;
    }
}

/// Clear-to-send changed to `active`.
///
/// With RTS/CTS flow control on, a rising CTS restarts a held-off
/// transmitter and raises a write wakeup; a falling CTS holds it off.
pub fn handle_cts_change(cx: &mut IrqContext<'_>, active: bool) {
    bump(&mut cx.port.icount.cts);
    cx.pending.modem_delta = true;

    let Some(info) = cx.info.as_deref_mut() else {
        return;
    };
    if !info.flags.contains(InfoFlags::CTS_FLOW) {
        return;
    }
    if info.flags.contains(InfoFlags::HW_STOPPED) {
        if active {
            info.flags.remove(InfoFlags::HW_STOPPED);
            cx.ops.start_tx(cx.port);
            info.events |= Events::WRITE_WAKEUP;
        }
    } else if !active {
        info.flags.insert(InfoFlags::HW_STOPPED);
        cx.ops.stop_tx(cx.port);
    }
}

/// Data-set-ready changed.
pub fn handle_dsr_change(cx: &mut IrqContext<'_>) {
    bump(&mut cx.port.icount.dsr);
    cx.pending.modem_delta = true;
}

/// Ring indicator went inactive.
pub fn handle_ri_change(cx: &mut IrqContext<'_>) {
    bump(&mut cx.port.icount.rng);
    cx.pending.modem_delta = true;
}
