//! Lock-protected port state: the runtime record of an open port and the
//! settings that persist across opens.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::circ::{CircBuf, UART_XMIT_SIZE};
use crate::flags::{Events, InfoFlags};
use crate::ldisc::{LineDiscipline, OpenRequest, Pgrp, RxChar, SessionId};
use crate::ops::PowerState;
use crate::port::PortData;

/// Receive characters buffered per interrupt before delivery.
pub(crate) const FLIP_BUF_SIZE: usize = 512;

/// Runtime state, present only while the port is open.
pub(crate) struct PortInfo {
    pub(crate) xmit: Box<CircBuf<UART_XMIT_SIZE>>,
    pub(crate) flags: InfoFlags,
    pub(crate) events: Events,
    pub(crate) session: SessionId,
    pub(crate) pgrp: Pgrp,
    pub(crate) blocked_open: u32,
    pub(crate) ldisc: Arc<dyn LineDiscipline>,
    pub(crate) flip: Vec<RxChar>,
}

impl PortInfo {
    pub(crate) fn new(req: &OpenRequest) -> Self {
        Self {
            xmit: Box::new(CircBuf::new()),
            flags: InfoFlags::empty(),
            events: Events::empty(),
            session: req.session,
            pgrp: req.pgrp,
            blocked_open: 0,
            ldisc: Arc::clone(&req.ldisc),
            flip: Vec::with_capacity(FLIP_BUF_SIZE),
        }
    }

    /// Returns `true` if transmission is held off by software or CTS.
    pub(crate) fn tx_stopped(&self) -> bool {
        self.flags
            .intersects(InfoFlags::STOPPED | InfoFlags::HW_STOPPED)
    }
}

/// Everything guarded by the port lock.
pub(crate) struct PortInner {
    pub(crate) data: PortData,
    pub(crate) info: Option<PortInfo>,
    /// Open handles plus openers still waiting for carrier.
    pub(crate) count: u32,
    /// Bumped whenever the runtime state is torn down; handles remember
    /// the value they were opened under.
    pub(crate) generation: u64,
    pub(crate) power: PowerState,
    pub(crate) is_console: bool,
    pub(crate) close_delay: u32,
    pub(crate) closing_wait: u32,
    pub(crate) custom_divisor: u32,
}

impl PortInner {
    pub(crate) fn new(data: PortData) -> Self {
        Self {
            data,
            info: None,
            count: 0,
            generation: 0,
            power: PowerState::Off,
            is_console: false,
            close_delay: 50,
            closing_wait: 3000,
            custom_divisor: 0,
        }
    }

    /// Runtime state if it belongs to `generation`.
    pub(crate) fn info_for(&mut self, generation: u64) -> Option<&mut PortInfo> {
        if self.generation == generation {
            self.info.as_mut()
        } else {
            None
        }
    }
}

/// Notifications collected under the port lock.
#[derive(Default)]
pub(crate) struct Pending {
    pub(crate) rx: Vec<RxChar>,
    pub(crate) events: Events,
    pub(crate) wake_open: bool,
    pub(crate) modem_delta: bool,
    pub(crate) hangup: bool,
    pub(crate) sak: bool,
    pub(crate) ldisc: Option<Arc<dyn LineDiscipline>>,
}

impl Pending {
    /// Moves events and received characters out of `info`, and keeps a
    /// handle on the line discipline if anything needs delivering to it.
    pub(crate) fn collect(&mut self, info: &mut PortInfo) {
        self.events |= core::mem::take(&mut info.events);
        if !info.flip.is_empty() {
            self.rx = core::mem::replace(&mut info.flip, Vec::with_capacity(FLIP_BUF_SIZE));
        }
        if !self.rx.is_empty() || !self.events.is_empty() || self.sak {
            self.ldisc = Some(Arc::clone(&info.ldisc));
        }
    }
}
