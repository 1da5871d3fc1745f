//! Open/close lifecycle and the top-half operations on an open port.
//!
//! [`UartPort::open`] attaches runtime state, starts the hardware and, for
//! a carrier-checked line, waits for carrier. The resulting [`OpenPort`]
//! handle carries every caller-side operation. Dropping the handle is the
//! close.

use alloc::sync::Arc;
use core::future::poll_fn;
use core::task::{Context, Poll};

use uart_base::{udebug, uwarn};

use crate::error::SerialError;
use crate::flags::{Events, InfoFlags, Mctrl, OpenFlags, PortFlags};
use crate::icount::Icount;
use crate::ldisc::OpenRequest;
use crate::ops::UartOps;
use crate::port::{PortData, PortType, SerialInfo};
use crate::state::{Pending, PortInfo, PortInner};
use crate::termios::{InputFlags, LineConfig, MAX_DIVISOR, Termios};
use crate::uart::{self, UartPort};

// ---------------------------------------------------------------------------
// Open
// ---------------------------------------------------------------------------

impl UartPort {
    /// Opens the port.
    ///
    /// The first open attaches runtime state, powers the device and runs
    /// its `startup`; a failed startup releases everything it acquired and
    /// returns the error. Then, unless the request is non-blocking, a
    /// callout open, or the line ignores carrier, waits until carrier is
    /// present.
    ///
    /// Dropping the returned future while it waits undoes the open. A
    /// raised [`SignalFlag`](crate::SignalFlag) aborts the wait with
    /// [`SerialError::Interrupted`]; a hangup aborts it with
    /// [`SerialError::HungUp`].
    pub async fn open(self: &Arc<Self>, req: OpenRequest) -> Result<OpenPort, SerialError> {
        let generation = self.open_begin(&req)?;
        let mut undo = OpenGuard {
            port: Arc::clone(self),
            generation,
            armed: true,
        };
        self.block_til_ready(&req, generation).await?;
        undo.armed = false;
        udebug!("{}: opened", self.name());
        Ok(OpenPort {
            port: Arc::clone(self),
            generation,
        })
    }

    fn open_begin(&self, req: &OpenRequest) -> Result<u64, SerialError> {
        let result = self.with_lock(|inner, ops, _| {
            if inner.data.port_type == PortType::Unknown {
                return Err(SerialError::NotFound);
            }
            inner.count += 1;
            if inner.info.is_none() {
                inner.info = Some(PortInfo::new(req));
            }
            if let Err(e) = uart::startup(inner, ops) {
                inner.count -= 1;
                if inner.count == 0 {
                    inner.info = None;
                }
                return Err(e);
            }
            Ok(inner.generation)
        });
        if let Err(e) = result {
            if e != SerialError::NotFound {
                uwarn!("{}: startup failed: {e}", self.name());
            }
        }
        result
    }

    async fn block_til_ready(&self, req: &OpenRequest, generation: u64) -> Result<(), SerialError> {
        let mut blocked = BlockedOpen {
            port: self,
            generation,
            counted: false,
        };
        poll_fn(|cx| self.poll_ready(req, generation, &mut blocked, cx)).await
    }

    fn poll_ready(
        &self,
        req: &OpenRequest,
        generation: u64,
        blocked: &mut BlockedOpen<'_>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), SerialError>> {
        let mut inner = self.inner.lock();
        let clocal = inner.data.termios.clocal();
        let carrier = self.ops().get_modem_control(&inner.data).contains(Mctrl::CAR);
        let Some(info) = inner.info_for(generation) else {
            return Poll::Ready(Err(SerialError::HungUp));
        };

        if req.flags.contains(OpenFlags::CALLOUT) {
            if info.flags.contains(InfoFlags::NORMAL_ACTIVE) {
                return Poll::Ready(Err(SerialError::Busy));
            }
            info.flags.insert(InfoFlags::CALLOUT_ACTIVE);
            return Poll::Ready(Ok(()));
        }
        if req.flags.contains(OpenFlags::NONBLOCK) || clocal {
            if info.flags.contains(InfoFlags::CALLOUT_ACTIVE) {
                return Poll::Ready(Err(SerialError::Busy));
            }
            info.flags.insert(InfoFlags::NORMAL_ACTIVE);
            return Poll::Ready(Ok(()));
        }
        if !info.flags.contains(InfoFlags::CALLOUT_ACTIVE) && carrier {
            info.flags.insert(InfoFlags::NORMAL_ACTIVE);
            return Poll::Ready(Ok(()));
        }
        if let Some(signal) = &req.signal {
            if signal.is_raised() {
                return Poll::Ready(Err(SerialError::Interrupted));
            }
            signal.register(cx.waker());
        }
        if !blocked.counted {
            info.blocked_open += 1;
            blocked.counted = true;
        }
        // Registered under the port lock: a carrier change is recorded
        // under the same lock and woken only after it is released.
        self.open_wait.register_waker(cx.waker());
        Poll::Pending
    }
}

/// Undoes a partially completed open when dropped armed.
struct OpenGuard {
    port: Arc<UartPort>,
    generation: u64,
    armed: bool,
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        if self.armed {
            self.port.close_generation(self.generation);
        }
    }
}

/// Keeps the blocked-open count while an opener waits for carrier.
struct BlockedOpen<'a> {
    port: &'a UartPort,
    generation: u64,
    counted: bool,
}

impl Drop for BlockedOpen<'_> {
    fn drop(&mut self) {
        if !self.counted {
            return;
        }
        let mut inner = self.port.inner.lock();
        if let Some(info) = inner.info_for(self.generation) {
            info.blocked_open = info.blocked_open.saturating_sub(1);
        }
    }
}

// ---------------------------------------------------------------------------
// OpenPort
// ---------------------------------------------------------------------------

/// An open handle on a port.
///
/// Every operation fails with [`SerialError::HungUp`] once the session it
/// was opened in has been hung up. Dropping the handle closes it; the last
/// close shuts the hardware down and discards unsent data.
pub struct OpenPort {
    port: Arc<UartPort>,
    generation: u64,
}

impl OpenPort {
    /// The underlying port.
    pub fn port(&self) -> &Arc<UartPort> {
        &self.port
    }

    /// Returns `true` if the session this handle belongs to is gone.
    pub fn is_hung_up(&self) -> bool {
        let mut inner = self.port.inner.lock();
        inner.info_for(self.generation).is_none()
    }

    /// Runs `f` on the live runtime state.
    fn with_open<R>(
        &self,
        f: impl FnOnce(&mut PortData, &mut PortInfo, &dyn UartOps) -> R,
    ) -> Result<R, SerialError> {
        let generation = self.generation;
        self.port.with_lock(|inner, ops, _| {
            if inner.generation != generation {
                return Err(SerialError::HungUp);
            }
            let PortInner { data, info, .. } = inner;
            let info = info.as_mut().ok_or(SerialError::HungUp)?;
            Ok(f(data, info, ops))
        })
    }

    /// Runs `f` with the whole lock-protected state of a live session.
    fn with_inner<R>(
        &self,
        f: impl FnOnce(&mut PortInner, &dyn UartOps, &mut Pending) -> Result<R, SerialError>,
    ) -> Result<R, SerialError> {
        let generation = self.generation;
        self.port.with_lock(|inner, ops, pending| {
            if inner.info_for(generation).is_none() {
                return Err(SerialError::HungUp);
            }
            f(inner, ops, pending)
        })
    }

    // -----------------------------------------------------------------------
    // Transmit path
    // -----------------------------------------------------------------------

    /// Queues as much of `buf` as fits and starts the transmitter.
    ///
    /// Returns the number of bytes accepted, or [`SerialError::WouldBlock`]
    /// if the ring is full.
    pub fn write(&self, buf: &[u8]) -> Result<usize, SerialError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let written = self.with_open(|data, info, ops| {
            let n = info.xmit.write_from(buf);
            if n > 0 && !info.tx_stopped() {
                ops.start_tx(data);
            }
            n
        })?;
        if written == 0 {
            Err(SerialError::WouldBlock)
        } else {
            Ok(written)
        }
    }

    /// Queues all of `buf`, waiting for room whenever the ring is full.
    ///
    /// Dropping the future stops the write; bytes already queued stay
    /// queued.
    pub async fn write_all(&self, buf: &[u8]) -> Result<(), SerialError> {
        let mut done = 0;
        while done < buf.len() {
            match self.write(&buf[done..]) {
                Ok(n) => done += n,
                Err(SerialError::WouldBlock) => self.wait_for_room().await?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn wait_for_room(&self) -> Result<(), SerialError> {
        poll_fn(|cx| {
            let mut inner = self.port.inner.lock();
            let Some(info) = inner.info_for(self.generation) else {
                return Poll::Ready(Err(SerialError::HungUp));
            };
            if info.xmit.free() > 0 {
                return Poll::Ready(Ok(()));
            }
            self.port.write_wait.register_waker(cx.waker());
            Poll::Pending
        })
        .await
    }

    /// Waits until the transmit ring is empty.
    pub async fn wait_until_sent(&self) -> Result<(), SerialError> {
        poll_fn(|cx| {
            let mut inner = self.port.inner.lock();
            let Some(info) = inner.info_for(self.generation) else {
                return Poll::Ready(Err(SerialError::HungUp));
            };
            if info.xmit.is_empty() {
                return Poll::Ready(Ok(()));
            }
            self.port.write_wait.register_waker(cx.waker());
            Poll::Pending
        })
        .await
    }

    /// Queues one byte without starting the transmitter.
    ///
    /// Returns `false` if the ring is full.
    pub fn put_char(&self, ch: u8) -> Result<bool, SerialError> {
        self.with_open(|_, info, _| info.xmit.push(ch))
    }

    /// Starts transmitting bytes queued with [`put_char`](Self::put_char).
    pub fn flush_chars(&self) -> Result<(), SerialError> {
        self.with_inner(|inner, ops, _| {
            uart::start_tx(inner, ops);
            Ok(())
        })
    }

    /// Free space in the transmit ring.
    pub fn write_room(&self) -> Result<usize, SerialError> {
        self.with_open(|_, info, _| info.xmit.free())
    }

    /// Bytes waiting in the transmit ring.
    pub fn chars_in_buffer(&self) -> Result<usize, SerialError> {
        self.with_open(|_, info, _| info.xmit.pending())
    }

    /// Discards everything waiting in the transmit ring.
    pub fn flush_buffer(&self) -> Result<(), SerialError> {
        self.with_open(|_, info, _| {
            info.xmit.clear();
            info.events |= Events::WRITE_WAKEUP;
        })
    }

    /// Sends a flow-control character ahead of queued data.
    pub fn send_xchar(&self, ch: u8) -> Result<(), SerialError> {
        self.with_open(|data, _, ops| ops.send_xchar(data, ch))
    }

    // -----------------------------------------------------------------------
    // Flow control
    // -----------------------------------------------------------------------

    /// Asks the far end to pause: XOFF with `IXOFF`, RTS low with
    /// `CRTSCTS`.
    pub fn throttle(&self) -> Result<(), SerialError> {
        self.with_open(|data, info, ops| {
            let t = data.termios;
            if t.iflag.contains(InputFlags::IXOFF) {
                ops.send_xchar(data, t.stop_char);
            }
            if t.crtscts() {
                uart::update_mctrl(data, ops, Mctrl::empty(), Mctrl::RTS);
            }
            info.flags.insert(InfoFlags::THROTTLED);
        })
    }

    /// Lets the far end resume.
    pub fn unthrottle(&self) -> Result<(), SerialError> {
        self.with_open(|data, info, ops| {
            let t = data.termios;
            if t.iflag.contains(InputFlags::IXOFF) {
                // An XOFF still waiting to go out simply cancels.
                if data.x_char.is_some() {
                    data.x_char = None;
                } else {
                    ops.send_xchar(data, t.start_char);
                }
            }
            if t.crtscts() {
                uart::update_mctrl(data, ops, Mctrl::RTS, Mctrl::empty());
            }
            info.flags.remove(InfoFlags::THROTTLED);
        })
    }

    /// Holds off transmission.
    pub fn stop(&self) -> Result<(), SerialError> {
        self.with_open(|data, info, ops| {
            info.flags.insert(InfoFlags::STOPPED);
            ops.stop_tx(data);
        })
    }

    /// Resumes transmission held off by [`stop`](Self::stop).
    pub fn start(&self) -> Result<(), SerialError> {
        self.with_inner(|inner, ops, _| {
            if let Some(info) = inner.info.as_mut() {
                info.flags.remove(InfoFlags::STOPPED);
            }
            uart::start_tx(inner, ops);
            Ok(())
        })
    }

    /// Asserts or clears a break on the line.
    pub fn break_ctl(&self, on: bool) -> Result<(), SerialError> {
        self.with_open(|data, _, ops| ops.break_control(data, on))
    }

    // -----------------------------------------------------------------------
    // Modem lines
    // -----------------------------------------------------------------------

    /// Current modem outputs and inputs.
    pub fn tiocmget(&self) -> Result<Mctrl, SerialError> {
        self.with_open(|data, _, ops| {
            (data.mctrl & Mctrl::OUTPUTS) | (ops.get_modem_control(data) & Mctrl::INPUTS)
        })
    }

    /// Sets and clears modem outputs. Input lines in the masks are ignored.
    pub fn tiocmset(&self, set: Mctrl, clear: Mctrl) -> Result<(), SerialError> {
        self.with_open(|data, _, ops| {
            uart::update_mctrl(data, ops, set & Mctrl::OUTPUTS, clear & Mctrl::OUTPUTS);
        })
    }

    /// Waits until any modem input selected by `mask` changes.
    ///
    /// Returns the counters at the time of the change.
    pub async fn wait_modem_change(&self, mask: Mctrl) -> Result<Icount, SerialError> {
        let start = self.with_open(|data, _, ops| {
            ops.enable_modem_status(data);
            data.icount
        })?;
        poll_fn(|cx| {
            let mut inner = self.port.inner.lock();
            if inner.info_for(self.generation).is_none() {
                return Poll::Ready(Err(SerialError::HungUp));
            }
            let now = inner.data.icount;
            if now.modem_changed(&start, mask) {
                return Poll::Ready(Ok(now));
            }
            self.port.delta_msr_wait.register_waker(cx.waker());
            Poll::Pending
        })
        .await
    }

    /// Event counters.
    pub fn icount(&self) -> Icount {
        self.port.icount()
    }

    // -----------------------------------------------------------------------
    // Line settings
    // -----------------------------------------------------------------------

    /// Current line settings.
    pub fn termios(&self) -> Termios {
        self.port.termios()
    }

    /// Applies new line settings to the live port.
    ///
    /// Settings are validated against the port clock first and rejected
    /// whole if invalid. Queued bytes are kept. Moving to B0 drops DTR and
    /// RTS; moving away from B0 raises them.
    pub fn set_termios(&self, new: Termios) -> Result<(), SerialError> {
        let name = self.port.name();
        let result = self.with_inner(|inner, ops, _| {
            new.validate(inner.data.uartclk, inner.data.flags, inner.custom_divisor)?;
            let old = inner.data.termios;
            inner.data.termios = new;
            if let Err(e) = uart::change_speed(inner, ops) {
                inner.data.termios = old;
                return Err(e);
            }

            let throttled = inner
                .info
                .as_ref()
                .is_some_and(|i| i.flags.contains(InfoFlags::THROTTLED));
            if old.baud != 0 && new.baud == 0 {
                uart::update_mctrl(&mut inner.data, ops, Mctrl::empty(), Mctrl::DTR | Mctrl::RTS);
            } else if old.baud == 0 && new.baud != 0 {
                let mut set = Mctrl::DTR;
                if !new.crtscts() || !throttled {
                    set |= Mctrl::RTS;
                }
                uart::update_mctrl(&mut inner.data, ops, set, Mctrl::empty());
            }

            if old.crtscts() && !new.crtscts() {
                if let Some(info) = inner.info.as_mut() {
                    info.flags.remove(InfoFlags::HW_STOPPED);
                }
                uart::start_tx(inner, ops);
            } else if !old.crtscts() && new.crtscts() {
                let cts = ops.get_modem_control(&inner.data).contains(Mctrl::CTS);
                if !cts {
                    if let Some(info) = inner.info.as_mut() {
                        info.flags.insert(InfoFlags::HW_STOPPED);
                    }
                    ops.stop_tx(&inner.data);
                }
            }
            Ok(())
        });
        match result {
            Ok(()) => udebug!("{name}: {} baud, {:?}", new.baud, LineConfig::from_termios(&new)),
            Err(e) => uwarn!("{name}: rejected line settings: {e}"),
        }
        result
    }

    /// Applies typed line settings, keeping the other termios flags.
    pub fn set_line_config(&self, config: &LineConfig) -> Result<(), SerialError> {
        self.set_termios(config.apply_to(self.termios()))
    }

    /// User-visible port configuration.
    pub fn get_serial(&self) -> Result<SerialInfo, SerialError> {
        if self.is_hung_up() {
            return Err(SerialError::HungUp);
        }
        Ok(self.port.serial_info())
    }

    /// Changes the port configuration.
    ///
    /// The candidate is checked by the hardware's `verify_config` first.
    /// Changing base address, IRQ, FIFO size or type fails with
    /// [`SerialError::Busy`] while anyone else has the port open; when
    /// allowed, the hardware is restarted on the new resources.
    pub fn set_serial(&self, new: &SerialInfo) -> Result<(), SerialError> {
        let name = self.port.name();
        let result = self.with_inner(|inner, ops, _| apply_serial(inner, ops, new));
        if let Err(e) = result {
            uwarn!("{name}: set_serial failed: {e}");
        }
        result
    }

    /// Device-specific request passed to the hardware.
    pub fn ioctl(&self, cmd: u32, arg: usize) -> Result<usize, SerialError> {
        self.with_open(|data, _, ops| ops.ioctl(data, cmd, arg))?
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Hangs up the session this handle belongs to.
    pub fn hangup(&self) {
        self.port.hangup_generation(self.generation);
    }

    /// Closes the handle.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for OpenPort {
    fn drop(&mut self) {
        self.port.close_generation(self.generation);
    }
}

impl core::fmt::Debug for OpenPort {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenPort")
            .field("port", &self.port.name())
            .field("generation", &self.generation)
            .finish()
    }
}

fn apply_serial(
    inner: &mut PortInner,
    ops: &dyn UartOps,
    new: &SerialInfo,
) -> Result<(), SerialError> {
    let data = &inner.data;
    let old_type = data.port_type;
    let change_irq = new.irq != data.irq;
    let change_port = new.port != data.iobase
        || new.iomem_base != data.membase
        || new.io_type != data.iotype
        || new.iomem_reg_shift != data.regshift;
    let change_type = new.port_type != old_type;
    let change_hw =
        change_irq || change_port || change_type || new.xmit_fifo_size != data.fifosize;

    ops.verify_config(data, new)?;
    if change_hw && inner.count > 1 {
        return Err(SerialError::Busy);
    }

    let uartclk = new
        .baud_base
        .checked_mul(16)
        .ok_or(SerialError::InvalidConfig)?;
    if u64::from(new.custom_divisor) > MAX_DIVISOR {
        return Err(SerialError::InvalidConfig);
    }
    let flags = (data.flags & !PortFlags::USR_MASK) | (new.flags & PortFlags::USR_MASK);
    data.termios.validate(uartclk, flags, new.custom_divisor)?;

    if change_port || change_irq || change_type {
        let initialized = inner
            .info
            .as_ref()
            .is_some_and(|i| i.flags.contains(InfoFlags::INITIALIZED));
        if initialized {
            ops.shutdown(&mut inner.data);
            if let Some(info) = inner.info.as_mut() {
                info.flags.remove(InfoFlags::INITIALIZED);
            }
        }

        // Only a known port holds its region.
        let released =
            old_type != PortType::Unknown && (change_port || new.port_type == PortType::Unknown);
        if released {
            ops.release_resources(&mut inner.data);
        }
        let old = inner.data.clone();
        if change_port {
            inner.data.iobase = new.port;
            inner.data.membase = new.iomem_base;
            inner.data.iotype = new.io_type;
            inner.data.regshift = new.iomem_reg_shift;
        }
        inner.data.port_type = new.port_type;
        let claim =
            new.port_type != PortType::Unknown && (change_port || old_type == PortType::Unknown);
        if claim {
            if let Err(e) = ops.request_resources(&mut inner.data) {
                inner.data.iobase = old.iobase;
                inner.data.membase = old.membase;
                inner.data.iotype = old.iotype;
                inner.data.regshift = old.regshift;
                inner.data.port_type = old_type;
                if released && ops.request_resources(&mut inner.data).is_err() {
                    inner.data.port_type = PortType::Unknown;
                } else if initialized && old_type != PortType::Unknown {
                    uart::startup(inner, ops)?;
                }
                return Err(e);
            }
        }

        inner.data.irq = new.irq;
        inner.data.uartclk = uartclk;
        inner.data.flags = flags;
        inner.custom_divisor = new.custom_divisor;
        if initialized && new.port_type != PortType::Unknown {
            uart::startup(inner, ops)?;
        }
    }

    let speed_changed = inner.data.uartclk != uartclk
        || inner.custom_divisor != new.custom_divisor
        || inner.data.flags != flags;
    inner.data.uartclk = uartclk;
    inner.data.flags = flags;
    inner.data.fifosize = new.xmit_fifo_size;
    inner.close_delay = new.close_delay;
    inner.closing_wait = new.closing_wait;
    inner.custom_divisor = new.custom_divisor;

    let initialized = inner
        .info
        .as_ref()
        .is_some_and(|i| i.flags.contains(InfoFlags::INITIALIZED));
    if speed_changed && initialized {
        uart::change_speed(inner, ops)?;
    }
    Ok(())
}
