//! Software-emulated UART.
//!
//! [`VirtUart`] implements [`UartOps`] over an in-memory 16550-style
//! register file instead of real I/O ports. The far end of the line is
//! driven through the "wire" methods ([`inject_rx`](VirtUart::inject_rx),
//! [`set_dcd`](VirtUart::set_dcd), [`take_transmitted`](VirtUart::take_transmitted)
//! and friends); the port's interrupt routine then sees those events exactly
//! as it would see a hardware interrupt.
//!
//! Resources (the IRQ and an optional FIFO window) are claimed from a
//! [`PlatformResources`] at startup, so conflicts and partial-failure
//! recovery behave like real hardware.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod regs;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use uart_base::sync::IrqSpinLock;
use uart_base::{udebug, utrace, uwarn};
use uart_core::{
    ConfigFlags, ControlFlags, InputFlags, IrqContext, Mctrl, PlatformResources, PortData,
    PortType, PowerState, RxStatus, SerialError, SerialInfo, UartOps,
};

use crate::regs::{Ier, Lcr, Lsr, Mcr, Msr};

/// Depth of the emulated receive and transmit FIFOs.
pub const FIFO_DEPTH: usize = 16;

/// Size of the register window reserved by `request_resources`.
pub const REGISTER_SPAN: u64 = 8;

/// `ioctl` command: enable (`arg != 0`) or disable loopback.
pub const IOCTL_SET_LOOPBACK: u32 = 0x5601;

/// `ioctl` command: read back the programmed divisor.
pub const IOCTL_GET_DIVISOR: u32 = 0x5602;

/// One character as it left the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// The character.
    pub byte: u8,
    /// Divisor in effect when it was sent.
    pub divisor: u16,
    /// Framing in effect when it was sent.
    pub lcr: Lcr,
}

#[derive(Default)]
struct VirtRegs {
    ier: Ier,
    lcr: Lcr,
    mcr: Mcr,
    /// External line states plus latched deltas.
    msr: Msr,
    divisor: u16,
    rx_fifo: VecDeque<(u8, Lsr)>,
    overrun_latched: bool,
    wire: Vec<Frame>,
    power: PowerState,
    wake: bool,
    /// Loopback forced on through `ioctl`, independent of `Mctrl::LOOP`.
    forced_loop: bool,
    irq_claimed: Option<u32>,
    window_claimed: Option<u64>,
    startups: usize,
    shutdowns: usize,
}

impl VirtRegs {
    /// Modem inputs as seen by the UART, honouring loopback.
    fn inputs(&self) -> Msr {
        if self.mcr.contains(Mcr::LOOPBACK) {
            self.mcr.looped_inputs()
        } else {
            self.msr & Msr::LINES
        }
    }

    fn set_lines(&mut self, lines: Msr) {
        let old = self.msr & Msr::LINES;
        let new = lines & Msr::LINES;
        self.msr = (self.msr & Msr::DELTAS) | self.msr_deltas(new, old) | new;
    }

    fn msr_deltas(&self, new: Msr, old: Msr) -> Msr {
        if self.mcr.contains(Mcr::LOOPBACK) {
            Msr::empty()
        } else {
            new.deltas_from(old)
        }
    }

    fn receive(&mut self, byte: u8, lsr: Lsr) {
        if self.rx_fifo.len() >= FIFO_DEPTH {
            self.overrun_latched = true;
            return;
        }
        let mut lsr = lsr | Lsr::DATA_READY;
        if core::mem::take(&mut self.overrun_latched) {
            lsr |= Lsr::OVERRUN_ERROR;
        }
        self.rx_fifo.push_back((byte, lsr));
    }

    fn transmit(&mut self, byte: u8) {
        let frame = Frame {
            byte,
            divisor: self.divisor,
            lcr: self.lcr,
        };
        if self.mcr.contains(Mcr::LOOPBACK) {
            self.receive(byte, Lsr::empty());
        } else {
            self.wire.push(frame);
        }
    }
}

/// A software-emulated UART.
pub struct VirtUart {
    owner: &'static str,
    resources: Arc<dyn PlatformResources>,
    fifo_window: Option<(u64, u64)>,
    detected_irq: Option<u32>,
    regs: IrqSpinLock<VirtRegs>,
}

impl VirtUart {
    /// Creates an emulated UART that claims its resources from `resources`.
    pub fn new(owner: &'static str, resources: Arc<dyn PlatformResources>) -> Self {
        Self {
            owner,
            resources,
            fifo_window: None,
            detected_irq: None,
            regs: IrqSpinLock::named("virt_uart", VirtRegs::default()),
        }
    }

    /// Also claim a FIFO window of `len` bytes at `base` during startup.
    #[must_use]
    pub fn with_fifo_window(mut self, base: u64, len: u64) -> Self {
        self.fifo_window = Some((base, len));
        self
    }

    /// IRQ reported by autoconfiguration.
    #[must_use]
    pub fn with_detected_irq(mut self, irq: u32) -> Self {
        self.detected_irq = Some(irq);
        self
    }

    /// A port descriptor for this device on `line`.
    pub fn port_data(line: usize, iobase: u64, irq: u32) -> PortData {
        PortData {
            port_type: PortType::Virtual,
            fifosize: 16,
            ..PortData::new(line, iobase, irq)
        }
    }

    // -----------------------------------------------------------------------
    // Far end of the wire
    // -----------------------------------------------------------------------

    /// Delivers a character from the far end.
    ///
    /// Characters arriving while the FIFO is full are lost, and the next
    /// one that fits is flagged as an overrun.
    pub fn inject_rx(&self, data: &[u8]) {
        let mut regs = self.regs.lock();
        for &b in data {
            regs.receive(b, Lsr::empty());
        }
    }

    /// Delivers one character with a line error.
    pub fn inject_rx_error(&self, byte: u8, status: RxStatus) {
        self.regs.lock().receive(byte, Lsr::from_rx_status(status));
    }

    /// Far-end carrier detect.
    pub fn set_dcd(&self, on: bool) {
        self.update_line(Msr::DCD, on);
    }

    /// Far-end clear-to-send.
    pub fn set_cts(&self, on: bool) {
        self.update_line(Msr::CTS, on);
    }

    /// Far-end data-set-ready.
    pub fn set_dsr(&self, on: bool) {
        self.update_line(Msr::DSR, on);
    }

    /// Rings once: raises and drops the ring indicator.
    pub fn pulse_ri(&self) {
        self.update_line(Msr::RI, true);
        self.update_line(Msr::RI, false);
    }

    fn update_line(&self, line: Msr, on: bool) {
        let mut regs = self.regs.lock();
        let mut lines = regs.msr & Msr::LINES;
        lines.set(line, on);
        regs.set_lines(lines);
    }

    /// Takes every character sent so far.
    pub fn take_transmitted(&self) -> Vec<u8> {
        self.take_frames().into_iter().map(|f| f.byte).collect()
    }

    /// Takes every character sent so far, with the framing it was sent in.
    pub fn take_frames(&self) -> Vec<Frame> {
        core::mem::take(&mut self.regs.lock().wire)
    }

    /// Returns `true` if an enabled interrupt source is asserted.
    pub fn irq_pending(&self) -> bool {
        let regs = self.regs.lock();
        regs.ier.contains(Ier::THR_EMPTY)
            || (regs.ier.contains(Ier::DATA_AVAILABLE) && !regs.rx_fifo.is_empty())
            || (regs.ier.contains(Ier::MODEM_STATUS) && regs.msr.intersects(Msr::DELTAS))
    }

    // -----------------------------------------------------------------------
    // Register inspection
    // -----------------------------------------------------------------------

    /// Interrupt enable register.
    pub fn ier(&self) -> Ier {
        self.regs.lock().ier
    }

    /// Modem control register.
    pub fn mcr(&self) -> Mcr {
        self.regs.lock().mcr
    }

    /// Line control register.
    pub fn lcr(&self) -> Lcr {
        self.regs.lock().lcr
    }

    /// Programmed divisor.
    pub fn divisor(&self) -> u16 {
        self.regs.lock().divisor
    }

    /// Current power state.
    pub fn power(&self) -> PowerState {
        self.regs.lock().power
    }

    /// Wake-on-activity setting.
    pub fn wake_enabled(&self) -> bool {
        self.regs.lock().wake
    }

    /// Times `startup` ran.
    pub fn startups(&self) -> usize {
        self.regs.lock().startups
    }

    /// Times `shutdown` ran.
    pub fn shutdowns(&self) -> usize {
        self.regs.lock().shutdowns
    }

    fn release_startup_claims(&self, regs: &mut VirtRegs) {
        if let Some(irq) = regs.irq_claimed.take() {
            self.resources.free_irq(irq);
        }
        if let Some(base) = regs.window_claimed.take() {
            self.resources.release_region(base);
        }
    }
}

impl fmt::Debug for VirtUart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtUart")
            .field("owner", &self.owner)
            .field("fifo_window", &self.fifo_window)
            .finish_non_exhaustive()
    }
}

impl UartOps for VirtUart {
    fn tx_empty(&self, _port: &PortData) -> bool {
        // Characters leave the transmitter as soon as they are written.
        true
    }

    fn set_modem_control(&self, _port: &PortData, mctrl: Mctrl) {
        let mut regs = self.regs.lock();
        let forced = regs.forced_loop;
        regs.mcr = Mcr::from_mctrl(mctrl);
        if forced {
            regs.mcr.insert(Mcr::LOOPBACK);
        }
    }

    fn get_modem_control(&self, _port: &PortData) -> Mctrl {
        self.regs.lock().inputs().to_mctrl()
    }

    fn stop_tx(&self, _port: &PortData) {
        self.regs.lock().ier.remove(Ier::THR_EMPTY);
    }

    fn start_tx(&self, _port: &PortData) {
        self.regs.lock().ier.insert(Ier::THR_EMPTY);
    }

    fn stop_rx(&self, _port: &PortData) {
        self.regs
            .lock()
            .ier
            .remove(Ier::DATA_AVAILABLE | Ier::LINE_STATUS);
    }

    fn enable_modem_status(&self, _port: &PortData) {
        self.regs.lock().ier.insert(Ier::MODEM_STATUS);
    }

    fn break_control(&self, _port: &PortData, on: bool) {
        self.regs.lock().lcr.set(Lcr::BREAK, on);
    }

    fn startup(&self, port: &mut PortData) -> Result<(), SerialError> {
        let mut regs = self.regs.lock();
        regs.startups += 1;
        self.resources.request_irq(port.irq, self.owner)?;
        regs.irq_claimed = Some(port.irq);
        if let Some((base, len)) = self.fifo_window {
            self.resources.request_region(base, len, self.owner)?;
            regs.window_claimed = Some(base);
        }
        regs.rx_fifo.clear();
        regs.overrun_latched = false;
        regs.ier = Ier::DATA_AVAILABLE | Ier::LINE_STATUS;
        udebug!("{}: started on irq {}", self.owner, port.irq);
        Ok(())
    }

    fn shutdown(&self, _port: &mut PortData) {
        let mut regs = self.regs.lock();
        regs.shutdowns += 1;
        regs.ier = Ier::empty();
        regs.lcr.remove(Lcr::BREAK);
        self.release_startup_claims(&mut regs);
    }

    fn reconfigure(
        &self,
        _port: &mut PortData,
        cflag: ControlFlags,
        _iflag: InputFlags,
        divisor: u32,
    ) {
        let mut regs = self.regs.lock();
        let brk = regs.lcr & Lcr::BREAK;
        regs.lcr = Lcr::from_cflag(cflag) | brk;
        match u16::try_from(divisor) {
            Ok(d) => regs.divisor = d,
            Err(_) => uwarn!("{}: divisor {divisor} does not fit the latch", self.owner),
        }
        if cflag.contains(ControlFlags::CREAD) {
            if regs.ier.contains(Ier::LINE_STATUS) {
                regs.ier.insert(Ier::DATA_AVAILABLE);
            }
        } else {
            regs.ier.remove(Ier::DATA_AVAILABLE);
        }
    }

    fn pm(&self, _port: &PortData, state: PowerState, _old: PowerState) {
        self.regs.lock().power = state;
    }

    fn set_wake(&self, _port: &PortData, on: bool) -> Result<(), SerialError> {
        self.regs.lock().wake = on;
        Ok(())
    }

    fn request_resources(&self, port: &mut PortData) -> Result<(), SerialError> {
        let base = if port.membase.is_some() || port.iobase == 0 {
            port.mapbase
        } else {
            port.iobase
        };
        if base == 0 {
            return Ok(());
        }
        self.resources.request_region(base, REGISTER_SPAN, self.owner)
    }

    fn release_resources(&self, port: &mut PortData) {
        let base = if port.membase.is_some() || port.iobase == 0 {
            port.mapbase
        } else {
            port.iobase
        };
        if base != 0 {
            self.resources.release_region(base);
        }
    }

    fn config_port(&self, port: &mut PortData, flags: ConfigFlags) {
        if flags.contains(ConfigFlags::TYPE) {
            port.port_type = PortType::Virtual;
            port.fifosize = 16;
        }
        if flags.contains(ConfigFlags::IRQ) {
            if let Some(irq) = self.detected_irq {
                port.irq = irq;
            }
        }
    }

    fn verify_config(&self, _port: &PortData, candidate: &SerialInfo) -> Result<(), SerialError> {
        if !matches!(candidate.port_type, PortType::Virtual | PortType::Unknown) {
            return Err(SerialError::InvalidConfig);
        }
        if candidate.irq >= 256 || candidate.baud_base < 9600 {
            return Err(SerialError::InvalidConfig);
        }
        if usize::from(candidate.xmit_fifo_size) > FIFO_DEPTH {
            return Err(SerialError::InvalidConfig);
        }
        Ok(())
    }

    fn ioctl(&self, _port: &mut PortData, cmd: u32, arg: usize) -> Result<usize, SerialError> {
        let mut regs = self.regs.lock();
        match cmd {
            IOCTL_SET_LOOPBACK => {
                regs.forced_loop = arg != 0;
                regs.mcr.set(Mcr::LOOPBACK, arg != 0);
                Ok(0)
            }
            IOCTL_GET_DIVISOR => Ok(usize::from(regs.divisor)),
            _ => Err(SerialError::Unsupported),
        }
    }

    fn poll_put_char(&self, _port: &PortData, ch: u8) -> Result<(), SerialError> {
        let mut regs = self.regs.lock();
        if regs.power == PowerState::Off {
            return Err(SerialError::Busy);
        }
        regs.transmit(ch);
        Ok(())
    }

    fn interrupt(&self, cx: &mut IrqContext<'_>) {
        // Snapshot and acknowledge under the register lock, then dispatch
        // without it: the handlers may call back into start_tx/stop_tx.
        let (rx, deltas, lines) = {
            let mut regs = self.regs.lock();
            let rx: Vec<_> = if regs.ier.contains(Ier::DATA_AVAILABLE) {
                regs.rx_fifo.drain(..).collect()
            } else {
                Vec::new()
            };
            let mut deltas = Msr::empty();
            if regs.ier.contains(Ier::MODEM_STATUS) {
                deltas = regs.msr & Msr::DELTAS;
                regs.msr.remove(Msr::DELTAS);
            }
            (rx, deltas, regs.inputs())
        };

        for (byte, lsr) in rx {
            cx.insert_char(lsr.rx_status(), byte);
        }
        if deltas.contains(Msr::TRAILING_RI) {
            cx.handle_ri_change();
        }
        if deltas.contains(Msr::DELTA_DSR) {
            cx.handle_dsr_change();
        }
        if deltas.contains(Msr::DELTA_DCD) {
            cx.handle_dcd_change(lines.contains(Msr::DCD));
        }
        if deltas.contains(Msr::DELTA_CTS) {
            cx.handle_cts_change(lines.contains(Msr::CTS));
        }

        self.transmit_chars(cx);
    }
}

impl VirtUart {
    /// Transmit half of the interrupt: one FIFO's worth per call.
    fn transmit_chars(&self, cx: &mut IrqContext<'_>) {
        if !self.regs.lock().ier.contains(Ier::THR_EMPTY) {
            return;
        }
        if let Some(ch) = cx.take_x_char() {
            self.regs.lock().transmit(ch);
            return;
        }
        if cx.tx_stopped() || cx.tx_pending() == 0 {
            self.stop_tx(cx.port());
            return;
        }
        let mut sent = 0;
        while sent < FIFO_DEPTH {
            let Some(b) = cx.tx_pop() else {
                break;
            };
            self.regs.lock().transmit(b);
            sent += 1;
        }
        utrace!("{}: sent {sent}", self.owner);
        if cx.tx_pending() == 0 {
            self.stop_tx(cx.port());
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use uart_core::ResourceTable;

    fn virt(table: &Arc<ResourceTable>) -> VirtUart {
        let resources: Arc<dyn PlatformResources> = table.clone();
        VirtUart::new("virt-uart", resources)
    }

    #[test]
    fn startup_claims_and_shutdown_releases() {
        let table = Arc::new(ResourceTable::new());
        let uart = virt(&table).with_fifo_window(0x9000, 0x100);
        let mut port = VirtUart::port_data(0, 0x3f8, 4);

        uart.startup(&mut port).unwrap();
        assert_eq!(table.irq_owner(4), Some("virt-uart"));
        assert_eq!(table.region_owner(0x9000), Some("virt-uart"));
        assert!(uart.ier().contains(Ier::DATA_AVAILABLE));

        uart.shutdown(&mut port);
        assert!(table.is_empty());
        assert_eq!(uart.ier(), Ier::empty());
    }

    #[test]
    fn partial_startup_is_undone_by_shutdown() {
        let table = Arc::new(ResourceTable::new());
        table.request_region(0x9080, 0x10, "other").unwrap();
        let uart = virt(&table).with_fifo_window(0x9000, 0x100);
        let mut port = VirtUart::port_data(0, 0x3f8, 4);

        assert_eq!(
            uart.startup(&mut port),
            Err(SerialError::ResourceConflict)
        );
        assert_eq!(table.irq_owner(4), Some("virt-uart"));
        uart.shutdown(&mut port);
        assert_eq!(table.irq_owner(4), None);
        assert_eq!(table.region_owner(0x9080), Some("other"));
    }

    #[test]
    fn register_window_follows_io_type() {
        let table = Arc::new(ResourceTable::new());
        let uart = virt(&table);

        let mut pio = VirtUart::port_data(0, 0x2f8, 3);
        uart.request_resources(&mut pio).unwrap();
        assert_eq!(table.region_owner(0x2ff), Some("virt-uart"));

        let mut mmio = VirtUart::port_data(1, 0, 5);
        mmio.mapbase = 0xfe00_1000;
        mmio.membase = Some(0x1000);
        uart.request_resources(&mut mmio).unwrap();
        assert_eq!(table.region_owner(0xfe00_1004), Some("virt-uart"));

        uart.release_resources(&mut pio);
        uart.release_resources(&mut mmio);
        assert!(table.is_empty());
    }

    #[test]
    fn full_fifo_latches_overrun_on_next_char() {
        let table = Arc::new(ResourceTable::new());
        let uart = virt(&table);
        let data: Vec<u8> = (0..=16).collect();
        uart.inject_rx(&data);

        let mut regs = uart.regs.lock();
        assert_eq!(regs.rx_fifo.len(), FIFO_DEPTH);
        assert!(regs.overrun_latched);
        regs.rx_fifo.clear();
        regs.receive(b'x', Lsr::empty());
        let (ch, lsr) = regs.rx_fifo[0];
        assert_eq!(ch, b'x');
        assert_eq!(lsr.rx_status(), RxStatus::OVERRUN);
        assert!(!regs.overrun_latched);
    }

    #[test]
    fn loopback_feeds_outputs_back() {
        let table = Arc::new(ResourceTable::new());
        let uart = virt(&table);
        let mut port = VirtUart::port_data(0, 0x3f8, 4);

        uart.set_dcd(true);
        assert_eq!(uart.get_modem_control(&port), Mctrl::CAR);

        uart.ioctl(&mut port, IOCTL_SET_LOOPBACK, 1).unwrap();
        uart.set_modem_control(&port, Mctrl::RTS | Mctrl::OUT2);
        assert!(uart.mcr().contains(Mcr::LOOPBACK));
        assert_eq!(uart.get_modem_control(&port), Mctrl::CTS | Mctrl::CAR);

        uart.pm(&port, PowerState::On, PowerState::Off);
        uart.poll_put_char(&port, b'z').unwrap();
        assert!(uart.take_transmitted().is_empty());
        assert_eq!(uart.regs.lock().rx_fifo.front().map(|r| r.0), Some(b'z'));
    }

    #[test]
    fn modem_deltas_accumulate_until_read() {
        let table = Arc::new(ResourceTable::new());
        let uart = virt(&table);
        uart.set_cts(true);
        uart.pulse_ri();
        let msr = uart.regs.lock().msr;
        assert_eq!(
            msr & Msr::DELTAS,
            Msr::DELTA_CTS | Msr::TRAILING_RI
        );
        assert_eq!(msr & Msr::LINES, Msr::CTS);
        // Not reported until modem-status interrupts are enabled.
        assert!(!uart.irq_pending());
        uart.enable_modem_status(&VirtUart::port_data(0, 0x3f8, 4));
        assert!(uart.irq_pending());
    }

    #[test]
    fn verify_rejects_foreign_hardware() {
        let table = Arc::new(ResourceTable::new());
        let uart = virt(&table);
        let port = VirtUart::port_data(0, 0x3f8, 4);
        let mut info = SerialInfo {
            port_type: PortType::Virtual,
            line: 0,
            port: 0x3f8,
            irq: 4,
            flags: port.flags,
            xmit_fifo_size: 16,
            baud_base: 115_200,
            close_delay: 50,
            closing_wait: 3000,
            custom_divisor: 0,
            io_type: port.iotype,
            iomem_base: None,
            iomem_reg_shift: 0,
        };
        assert_eq!(uart.verify_config(&port, &info), Ok(()));

        info.port_type = PortType::P16550A;
        assert_eq!(
            uart.verify_config(&port, &info),
            Err(SerialError::InvalidConfig)
        );
        info.port_type = PortType::Virtual;
        info.xmit_fifo_size = 64;
        assert_eq!(
            uart.verify_config(&port, &info),
            Err(SerialError::InvalidConfig)
        );
    }

    #[test]
    fn reconfigure_keeps_break_and_records_divisor() {
        let table = Arc::new(ResourceTable::new());
        let uart = virt(&table);
        let mut port = VirtUart::port_data(0, 0x3f8, 4);
        uart.break_control(&port, true);
        uart.reconfigure(
            &mut port,
            ControlFlags::CS7 | ControlFlags::PARENB | ControlFlags::CREAD,
            InputFlags::empty(),
            12,
        );
        assert_eq!(uart.divisor(), 12);
        assert_eq!(
            uart.lcr(),
            Lcr::WORD_LEN_1 | Lcr::PARITY_ENABLE | Lcr::EVEN_PARITY | Lcr::BREAK
        );
        assert_eq!(uart.ioctl(&mut port, IOCTL_GET_DIVISOR, 0), Ok(12));

        uart.reconfigure(&mut port, ControlFlags::CS8, InputFlags::empty(), 0x1_0000);
        assert_eq!(uart.divisor(), 12);
        assert_eq!(uart.ioctl(&mut port, 0x1234, 0), Err(SerialError::Unsupported));
    }
}
