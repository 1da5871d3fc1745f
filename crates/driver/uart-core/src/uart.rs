//! The registered port object and its lock discipline.
//!
//! A [`UartPort`] pairs one [`PortData`] with its hardware implementation.
//! All state lives behind a single [`IrqSpinLock`]: the interrupt handler
//! and the top half both run their critical sections through
//! [`UartPort::with_lock`], which collects notifications while the lock is
//! held and delivers them (line discipline calls, wakeups, hangup) after it
//! is released.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::AtomicUsize;

use uart_base::sync::{IrqSpinLock, WaitQueue};
use uart_base::{udebug, uinfo, utrace};

use crate::error::SerialError;
use crate::flags::{Events, InfoFlags, Mctrl};
use crate::icount::Icount;
use crate::irq::IrqContext;
use crate::ldisc::SignalSink;
use crate::ops::{PowerState, UartOps};
use crate::port::{PortData, PortType, SerialInfo};
use crate::state::{Pending, PortInner};
use crate::termios::Termios;

/// Device name of a port, e.g. `ttyS0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortName {
    prefix: &'static str,
    line: usize,
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.line)
    }
}

/// A serial port registered with a driver.
pub struct UartPort {
    name: PortName,
    ops: Arc<dyn UartOps>,
    signals: Arc<dyn SignalSink>,
    pub(crate) inner: IrqSpinLock<PortInner>,
    pub(crate) open_wait: WaitQueue,
    pub(crate) delta_msr_wait: WaitQueue,
    pub(crate) write_wait: WaitQueue,
    /// Console writes dropped on this port.
    pub(crate) console_dropped: AtomicUsize,
}

impl UartPort {
    pub(crate) fn new(
        prefix: &'static str,
        mut data: PortData,
        ops: Arc<dyn UartOps>,
        signals: Arc<dyn SignalSink>,
    ) -> Self {
        data.update_status_masks();
        Self {
            name: PortName {
                prefix,
                line: data.line,
            },
            ops,
            signals,
            inner: IrqSpinLock::named("uart_port", PortInner::new(data)),
            open_wait: WaitQueue::new(),
            delta_msr_wait: WaitQueue::new(),
            write_wait: WaitQueue::new(),
            console_dropped: AtomicUsize::new(0),
        }
    }

    /// Device name, e.g. `ttyS0`.
    pub fn name(&self) -> PortName {
        self.name
    }

    /// Line number within the driver.
    pub fn line(&self) -> usize {
        self.name.line
    }

    /// The hardware implementation bound to this port.
    pub fn ops(&self) -> &Arc<dyn UartOps> {
        &self.ops
    }

    /// Detected hardware type.
    pub fn port_type(&self) -> PortType {
        self.inner.lock().data.port_type
    }

    /// Copy of the port descriptor.
    pub fn snapshot(&self) -> PortData {
        self.inner.lock().data.clone()
    }

    /// Current event counters.
    pub fn icount(&self) -> Icount {
        self.inner.lock().data.icount
    }

    /// Current line settings.
    pub fn termios(&self) -> Termios {
        self.inner.lock().data.termios
    }

    /// Open handles plus openers waiting for carrier.
    pub fn open_count(&self) -> u32 {
        self.inner.lock().count
    }

    /// Returns `true` if runtime state is attached.
    pub fn is_open(&self) -> bool {
        self.inner.lock().info.is_some()
    }

    /// Openers currently waiting for carrier.
    pub fn blocked_open(&self) -> u32 {
        self.inner
            .lock()
            .info
            .as_ref()
            .map_or(0, |i| i.blocked_open)
    }

    /// Runtime flags, empty while closed.
    pub fn info_flags(&self) -> InfoFlags {
        self.inner
            .lock()
            .info
            .as_ref()
            .map_or(InfoFlags::empty(), |i| i.flags)
    }

    /// Current device power state.
    pub fn power_state(&self) -> PowerState {
        self.inner.lock().power
    }

    /// User-visible configuration.
    pub fn serial_info(&self) -> SerialInfo {
        let inner = self.inner.lock();
        let d = &inner.data;
        SerialInfo {
            port_type: d.port_type,
            line: d.line,
            port: d.iobase,
            irq: d.irq,
            flags: d.flags,
            xmit_fifo_size: d.fifosize,
            baud_base: d.uartclk / 16,
            close_delay: inner.close_delay,
            closing_wait: inner.closing_wait,
            custom_divisor: inner.custom_divisor,
            io_type: d.iotype,
            iomem_base: d.membase,
            iomem_reg_shift: d.regshift,
        }
    }

    /// Enables or disables wake-on-activity.
    pub fn set_wake(&self, on: bool) -> Result<(), SerialError> {
        let inner = self.inner.lock();
        self.ops.set_wake(&inner.data, on)
    }

    /// Services a hardware interrupt for this port.
    ///
    /// Runs the driver's [`UartOps::interrupt`] under the port lock, then
    /// delivers whatever it produced.
    pub fn handle_interrupt(&self) {
        self.with_lock(|inner, ops, pending| {
            let PortInner { data, info, .. } = inner;
            let mut cx = IrqContext::new(data, info.as_mut(), ops, pending);
            ops.interrupt(&mut cx);
        });
    }

    /// Hangs up the current session, if any.
    pub fn hangup(&self) {
        let generation = self.inner.lock().generation;
        self.hangup_generation(generation);
    }

    // -----------------------------------------------------------------------
    // Lock discipline
    // -----------------------------------------------------------------------

    /// Runs `f` under the port lock and delivers the collected
    /// notifications after releasing it.
    pub(crate) fn with_lock<R>(
        &self,
        f: impl FnOnce(&mut PortInner, &dyn UartOps, &mut Pending) -> R,
    ) -> R {
        let mut pending = Pending::default();
        let (result, generation) = {
            let mut inner = self.inner.lock();
            let result = f(&mut inner, &*self.ops, &mut pending);
            if let Some(info) = inner.info.as_mut() {
                pending.collect(info);
            }
            (result, inner.generation)
        };
        self.deliver(pending, generation);
        result
    }

    fn deliver(&self, pending: Pending, generation: u64) {
        let write_wakeup = pending.events.contains(Events::WRITE_WAKEUP);
        if let Some(ldisc) = &pending.ldisc {
            if !pending.rx.is_empty() {
                ldisc.receive(&pending.rx);
            }
            if pending.sak {
                ldisc.secure_attention();
            }
            if write_wakeup {
                ldisc.write_wakeup();
            }
        }
        if write_wakeup || pending.events.contains(Events::TX_DRAINED) {
            self.write_wait.wake_all();
        }
        if pending.wake_open {
            self.open_wait.wake_all();
        }
        if pending.modem_delta {
            self.delta_msr_wait.wake_all();
        }
        if pending.hangup {
            self.hangup_generation(generation);
        }
    }

    /// Hangs up the session opened under `generation`.
    ///
    /// A no-op if that session is already gone, so racing carrier-loss
    /// interrupts hang up at most once.
    pub(crate) fn hangup_generation(&self, generation: u64) {
        let victim = {
            let mut inner = self.inner.lock();
            let Some(info) = inner.info_for(generation) else {
                return;
            };
            info.xmit.clear();
            let victim = (info.session, info.pgrp, Arc::clone(&info.ldisc));
            shutdown(&mut inner, &*self.ops);
            inner.count = 0;
            victim
        };
        uinfo!("{}: hangup", self.name);
        let (session, pgrp, ldisc) = victim;
        self.signals.hangup(session, pgrp);
        ldisc.hangup();
        self.wake_everyone();
    }

    /// Final close of the session opened under `generation`.
    pub(crate) fn close_generation(&self, generation: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.count == 0 {
                return;
            }
            inner.count -= 1;
            if inner.count > 0 {
                return;
            }
            shutdown(&mut inner, &*self.ops);
        }
        udebug!("{}: closed", self.name);
        self.wake_everyone();
    }

    fn wake_everyone(&self) {
        self.open_wait.wake_all();
        self.write_wait.wake_all();
        self.delta_msr_wait.wake_all();
    }
}

impl fmt::Debug for UartPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UartPort")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers run under the port lock
// ---------------------------------------------------------------------------

/// Sets and clears modem control outputs, touching the hardware only on
/// change.
pub(crate) fn update_mctrl(port: &mut PortData, ops: &dyn UartOps, set: Mctrl, clear: Mctrl) {
    let old = port.mctrl;
    let new = (old & !clear) | set;
    port.mctrl = new;
    if old != new {
        ops.set_modem_control(port, new);
    }
}

/// Enables the transmitter if there is data and nothing holds it off.
pub(crate) fn start_tx(inner: &mut PortInner, ops: &dyn UartOps) {
    let Some(info) = inner.info.as_ref() else {
        return;
    };
    if !info.xmit.is_empty() && !info.tx_stopped() {
        ops.start_tx(&inner.data);
    }
}

/// Transitions the device power state.
pub(crate) fn set_power(inner: &mut PortInner, ops: &dyn UartOps, state: PowerState) {
    if inner.power != state {
        ops.pm(&inner.data, state, inner.power);
        inner.power = state;
    }
}

/// Pushes the current termios to the hardware.
///
/// Refreshes the flow-control and carrier-check flags, the status masks
/// and the FIFO timeout, then re-arms modem-status interrupts if carrier,
/// CTS or PPS needs them. The transmit ring is left alone.
pub(crate) fn change_speed(inner: &mut PortInner, ops: &dyn UartOps) -> Result<(), SerialError> {
    let custom = inner.custom_divisor;
    let data = &mut inner.data;
    let termios = data.termios;
    let quot = termios.divisor(data.uartclk, data.flags, custom)?;

    if let Some(info) = inner.info.as_mut() {
        info.flags.set(InfoFlags::CTS_FLOW, termios.crtscts());
        info.flags.set(InfoFlags::CHECK_CD, !termios.clocal());
    }
    data.update_status_masks();
    let baud = u64::from(data.uartclk) / (16 * u64::from(quot.max(1)));
    data.update_timeout(u32::try_from(baud).unwrap_or(u32::MAX));
    ops.reconfigure(data, termios.cflag, termios.iflag, quot);
    if data.wants_modem_status() {
        ops.enable_modem_status(data);
    }
    utrace!("line {}: divisor {quot}", data.line);
    Ok(())
}

/// Brings the hardware up for a newly attached runtime state.
pub(crate) fn startup(inner: &mut PortInner, ops: &dyn UartOps) -> Result<(), SerialError> {
    let Some(info) = inner.info.as_ref() else {
        return Err(SerialError::HungUp);
    };
    if info.flags.contains(InfoFlags::INITIALIZED) {
        return Ok(());
    }

    set_power(inner, ops, PowerState::On);
    let result = ops
        .startup(&mut inner.data)
        .and_then(|()| change_speed(inner, ops));
    if let Err(e) = result {
        // Release whatever the partial startup acquired.
        ops.shutdown(&mut inner.data);
        if !inner.is_console {
            set_power(inner, ops, PowerState::Off);
        }
        return Err(e);
    }

    let termios = inner.data.termios;
    if termios.baud != 0 {
        update_mctrl(&mut inner.data, ops, Mctrl::DTR | Mctrl::RTS, Mctrl::empty());
    }
    let cts = ops.get_modem_control(&inner.data).contains(Mctrl::CTS);
    if let Some(info) = inner.info.as_mut() {
        info.xmit.clear();
        if termios.crtscts() && !cts {
            info.flags.insert(InfoFlags::HW_STOPPED);
        }
        info.flags.insert(InfoFlags::INITIALIZED);
    }
    Ok(())
}

/// Tears down the runtime state and the hardware behind it.
///
/// Pending transmit data is discarded. Bumps the generation so every
/// handle opened under the old one goes stale.
pub(crate) fn shutdown(inner: &mut PortInner, ops: &dyn UartOps) {
    let Some(info) = inner.info.take() else {
        return;
    };
    if info.flags.contains(InfoFlags::INITIALIZED) {
        if inner.data.termios.cflag.contains(crate::ControlFlags::HUPCL) {
            update_mctrl(&mut inner.data, ops, Mctrl::empty(), Mctrl::DTR | Mctrl::RTS);
        }
        ops.stop_rx(&inner.data);
        ops.shutdown(&mut inner.data);
    }
    inner.data.x_char = None;
    inner.generation = inner.generation.wrapping_add(1);
    if !inner.is_console {
        set_power(inner, ops, PowerState::Off);
    }
}
