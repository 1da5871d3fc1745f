//! Driver registry: named UART drivers and the ports bound to their lines.
//!
//! A [`Registry`] is created at subsystem init and owned explicitly by
//! whoever brings the serial subsystem up; [`Registry::shutdown_all`] tears
//! it down again. Each [`UartDriver`] governs a fixed range of line
//! numbers, the ports currently bound to them, and at most one console.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use uart_base::sync::IrqSpinLock;
use uart_base::{udebug, uinfo, uwarn};

use crate::console::{self, ConsoleOptions, UartConsole};
use crate::error::SerialError;
use crate::flags::{ConfigFlags, Mctrl, PortFlags};
use crate::ldisc::{NoSignals, SignalSink};
use crate::ops::{PowerState, UartOps};
use crate::port::{IoType, PortData, PortType};
use crate::uart::{self, UartPort};

/// Identity and limits of a UART driver.
#[derive(Clone)]
pub struct DriverConfig {
    /// Unique driver name, e.g. `"serial"`.
    pub driver_name: &'static str,
    /// Device name prefix, e.g. `"ttyS"`.
    pub dev_name: &'static str,
    /// Character-device major number.
    pub major: u32,
    /// First minor number.
    pub minor: u32,
    /// Number of lines.
    pub nr: usize,
    /// Where hangups of this driver's ports are delivered.
    pub signals: Arc<dyn SignalSink>,
}

impl DriverConfig {
    /// A driver with `nr` lines and no signal delivery.
    pub fn new(driver_name: &'static str, dev_name: &'static str, nr: usize) -> Self {
        Self {
            driver_name,
            dev_name,
            major: 4,
            minor: 64,
            nr,
            signals: Arc::new(NoSignals),
        }
    }

    /// Sets the device numbers.
    #[must_use]
    pub fn numbers(mut self, major: u32, minor: u32) -> Self {
        self.major = major;
        self.minor = minor;
        self
    }

    /// Sets the signal sink.
    #[must_use]
    pub fn signals(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = signals;
        self
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("driver_name", &self.driver_name)
            .field("dev_name", &self.dev_name)
            .field("major", &self.major)
            .field("minor", &self.minor)
            .field("nr", &self.nr)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The set of registered UART drivers.
#[derive(Default)]
pub struct Registry {
    drivers: IrqSpinLock<Vec<Arc<UartDriver>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver.
    ///
    /// Fails with [`SerialError::DuplicateDriver`] if the name is taken.
    pub fn register_driver(&self, config: DriverConfig) -> Result<Arc<UartDriver>, SerialError> {
        let mut drivers = self.drivers.lock();
        if drivers
            .iter()
            .any(|d| d.config.driver_name == config.driver_name)
        {
            uwarn!("{}: driver already registered", config.driver_name);
            return Err(SerialError::DuplicateDriver);
        }
        uinfo!(
            "{}: registered {} lines as {}",
            config.driver_name,
            config.nr,
            config.dev_name
        );
        let driver = Arc::new(UartDriver {
            config,
            state: IrqSpinLock::named("uart_driver", DriverState::default()),
        });
        drivers.push(Arc::clone(&driver));
        Ok(driver)
    }

    /// Unregisters a driver and removes its ports.
    ///
    /// Fails with [`SerialError::Busy`] while any of its ports is open.
    pub fn unregister_driver(&self, name: &str) -> Result<(), SerialError> {
        let mut drivers = self.drivers.lock();
        let idx = drivers
            .iter()
            .position(|d| d.config.driver_name == name)
            .ok_or(SerialError::NotFound)?;
        let driver = &drivers[idx];
        if driver.ports().iter().any(|p| p.is_open()) {
            return Err(SerialError::Busy);
        }
        for line in driver.lines().into_iter().rev() {
            driver.remove_port(line)?;
        }
        drivers.remove(idx);
        uinfo!("{name}: unregistered");
        Ok(())
    }

    /// Looks up a driver by name.
    pub fn driver(&self, name: &str) -> Option<Arc<UartDriver>> {
        self.drivers
            .lock()
            .iter()
            .find(|d| d.config.driver_name == name)
            .cloned()
    }

    /// All registered drivers, in registration order.
    pub fn drivers(&self) -> Vec<Arc<UartDriver>> {
        self.drivers.lock().clone()
    }

    /// Hangs up and removes every port, then drops every driver, newest
    /// first.
    pub fn shutdown_all(&self) {
        let drivers = core::mem::take(&mut *self.drivers.lock());
        for driver in drivers.iter().rev() {
            for line in driver.lines().into_iter().rev() {
                if let Some(port) = driver.port(line) {
                    port.hangup();
                }
                if let Err(e) = driver.remove_port(line) {
                    uwarn!("{}{line}: not removed: {e}", driver.config.dev_name);
                }
            }
            udebug!("{}: shut down", driver.config.driver_name);
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self
            .drivers
            .lock()
            .iter()
            .map(|d| d.config.driver_name)
            .collect();
        f.debug_struct("Registry").field("drivers", &names).finish()
    }
}

// ---------------------------------------------------------------------------
// UartDriver
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DriverState {
    ports: BTreeMap<usize, Arc<UartPort>>,
    console: Option<usize>,
}

/// A registered driver and the ports bound to its lines.
pub struct UartDriver {
    config: DriverConfig,
    state: IrqSpinLock<DriverState>,
}

impl UartDriver {
    /// The driver's configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Number of lines.
    pub fn nr(&self) -> usize {
        self.config.nr
    }

    /// Binds a configured port to its line.
    ///
    /// Runs hardware autoconfiguration if the port asks for it, reserves
    /// its I/O region and parks the modem outputs. A port whose region is
    /// already claimed is still bound, but as [`PortType::Unknown`], and
    /// cannot be opened.
    ///
    /// Fails with [`SerialError::LineOccupied`] if the line is taken, or
    /// [`SerialError::InvalidConfig`] if it is out of range.
    pub fn add_port(
        &self,
        mut data: PortData,
        ops: Arc<dyn UartOps>,
    ) -> Result<Arc<UartPort>, SerialError> {
        let line = data.line;
        let mut state = self.state.lock();
        if line >= self.config.nr {
            return Err(SerialError::InvalidConfig);
        }
        if state.ports.contains_key(&line) {
            return Err(SerialError::LineOccupied);
        }

        if data.flags.contains(PortFlags::BOOT_AUTOCONF) {
            let mut flags = ConfigFlags::TYPE;
            if data.flags.contains(PortFlags::AUTO_IRQ) {
                flags |= ConfigFlags::IRQ;
            }
            ops.config_port(&mut data, flags);
        }
        if data.port_type != PortType::Unknown {
            if let Err(e) = ops.request_resources(&mut data) {
                uwarn!("{}{line}: {e}, port disabled", self.config.dev_name);
                data.port_type = PortType::Unknown;
            }
        }

        let port = Arc::new(UartPort::new(
            self.config.dev_name,
            data,
            ops,
            Arc::clone(&self.config.signals),
        ));
        port.with_lock(|inner, ops, _| {
            if inner.data.port_type == PortType::Unknown {
                return;
            }
            report_port(&port, &inner.data, ops);
            // Park the modem outputs until the first open.
            uart::set_power(inner, ops, PowerState::On);
            inner.data.mctrl = Mctrl::empty();
            ops.set_modem_control(&inner.data, Mctrl::empty());
            uart::set_power(inner, ops, PowerState::Off);
        });
        state.ports.insert(line, Arc::clone(&port));
        Ok(port)
    }

    /// Detaches the port on `line` and releases its I/O region.
    ///
    /// Fails with [`SerialError::Busy`] while the port is open.
    pub fn remove_port(&self, line: usize) -> Result<Arc<UartPort>, SerialError> {
        let mut state = self.state.lock();
        let port = state
            .ports
            .get(&line)
            .cloned()
            .ok_or(SerialError::NotFound)?;
        port.with_lock(|inner, ops, _| {
            if inner.info.is_some() || inner.count > 0 {
                return Err(SerialError::Busy);
            }
            if inner.data.port_type != PortType::Unknown {
                ops.release_resources(&mut inner.data);
                // Handles still pointing here must not reopen it.
                inner.data.port_type = PortType::Unknown;
            }
            Ok(())
        })?;
        if state.console == Some(line) {
            state.console = None;
            UartConsole::detach(&port);
        }
        state.ports.remove(&line);
        udebug!("{}: removed", port.name());
        Ok(port)
    }

    /// The port on `line`.
    pub fn port(&self, line: usize) -> Option<Arc<UartPort>> {
        self.state.lock().ports.get(&line).cloned()
    }

    /// All bound ports, by line.
    pub fn ports(&self) -> Vec<Arc<UartPort>> {
        self.state.lock().ports.values().cloned().collect()
    }

    fn lines(&self) -> Vec<usize> {
        self.state.lock().ports.keys().copied().collect()
    }

    /// Makes the port on `line` the console.
    ///
    /// `options` (e.g. `"115200n8"`) are applied first; invalid options
    /// leave the binding undone.
    pub fn bind_console(
        &self,
        line: usize,
        options: Option<&str>,
    ) -> Result<UartConsole, SerialError> {
        let port = self.port(line).ok_or(SerialError::NotFound)?;
        if port.port_type() == PortType::Unknown {
            return Err(SerialError::NotFound);
        }
        if let Some(options) = options {
            let opts = ConsoleOptions::parse(options)?;
            console::set_options(&port, &opts)?;
        }
        let mut state = self.state.lock();
        if let Some(old) = state.console.replace(line) {
            if old != line {
                if let Some(prev) = state.ports.get(&old) {
                    UartConsole::detach(prev);
                }
            }
        }
        drop(state);
        uinfo!("console [{}] enabled", port.name());
        Ok(UartConsole::attach(port))
    }

    /// The line bound as console, if any.
    pub fn console_line(&self) -> Option<usize> {
        self.state.lock().console
    }

    /// Picks the port for console `index`, falling back to the first port
    /// when the index is out of range or names a port with no hardware
    /// address.
    pub fn get_console(&self, index: Option<usize>) -> Option<Arc<UartPort>> {
        let state = self.state.lock();
        let chosen = index
            .filter(|i| *i < self.config.nr)
            .and_then(|i| state.ports.get(&i))
            .filter(|p| p.snapshot().has_address());
        chosen
            .or_else(|| state.ports.values().next())
            .cloned()
    }
}

impl fmt::Debug for UartDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UartDriver")
            .field("config", &self.config)
            .field("lines", &self.lines())
            .finish()
    }
}

fn report_port(port: &UartPort, data: &PortData, ops: &dyn UartOps) {
    let kind = ops.type_name(data).unwrap_or("unknown");
    match data.iotype {
        IoType::Mem => uinfo!(
            "{} at MMIO {:#x} (irq = {}) is a {kind}",
            port.name(),
            data.mapbase,
            data.irq
        ),
        IoType::Port | IoType::Hub6 => uinfo!(
            "{} at I/O {:#x} (irq = {}) is a {kind}",
            port.name(),
            data.iobase,
            data.irq
        ),
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::testing::{MockOps, Recorder, mock};
    use crate::ldisc::OpenRequest;
    use crate::flags::OpenFlags;
    use uart_base::test_util::{LogCapture, block_on};

    fn serial() -> (Registry, Arc<UartDriver>) {
        let registry = Registry::new();
        let driver = registry
            .register_driver(DriverConfig::new("serial", "ttyS", 4))
            .unwrap();
        (registry, driver)
    }

    fn uart(line: usize) -> PortData {
        PortData {
            port_type: PortType::P16550A,
            ..PortData::new(line, 0x3f8 + 0x100 * line as u64, 4)
        }
    }

    #[test]
    fn duplicate_driver_is_rejected() {
        let (registry, _driver) = serial();
        let err = registry
            .register_driver(DriverConfig::new("serial", "ttyX", 1))
            .unwrap_err();
        assert_eq!(err, SerialError::DuplicateDriver);
        assert!(registry.driver("serial").is_some());
    }

    #[test]
    fn occupied_line_leaves_registry_unchanged() {
        let (_registry, driver) = serial();
        let (_m0, ops) = mock();
        driver.add_port(uart(0), Arc::clone(&ops)).unwrap();
        let first = driver.add_port(uart(1), Arc::clone(&ops)).unwrap();
        assert_eq!(
            driver.add_port(uart(1), ops).unwrap_err(),
            SerialError::LineOccupied
        );
        assert_eq!(driver.ports().len(), 2);
        assert!(Arc::ptr_eq(&driver.port(1).unwrap(), &first));
    }

    #[test]
    fn line_out_of_range() {
        let (_registry, driver) = serial();
        let (_m, ops) = mock();
        assert_eq!(
            driver.add_port(uart(4), ops).unwrap_err(),
            SerialError::InvalidConfig
        );
    }

    #[test]
    fn add_port_reports_and_parks_outputs() {
        let capture = LogCapture::install();
        let (_registry, driver) = serial();
        let (mock, ops) = mock();
        let port = driver.add_port(uart(0), ops).unwrap();
        assert_eq!(mock.calls("request_resources"), 1);
        assert_eq!(mock.calls("set_modem_control"), 1);
        assert_eq!(port.power_state(), PowerState::Off);
        let lines = capture.take();
        assert!(
            lines
                .iter()
                .any(|l| l.contains("ttyS0 at I/O 0x3f8 (irq = 4) is a 16550A")),
            "{lines:?}"
        );
    }

    #[test]
    fn autoconfig_detects_type() {
        let (_registry, driver) = serial();
        let mock = Arc::new(MockOps::default());
        mock.detect_as(PortType::P16750);
        let data = PortData {
            flags: PortFlags::BOOT_AUTOCONF,
            ..PortData::new(2, 0x3e8, 4)
        };
        let port = driver.add_port(data, mock.clone()).unwrap();
        assert_eq!(port.port_type(), PortType::P16750);
        assert_eq!(mock.calls("config_port"), 1);
    }

    #[test]
    fn open_port_cannot_be_removed() {
        let (_registry, driver) = serial();
        let (mock, ops) = mock();
        let port = driver.add_port(uart(0), ops).unwrap();
        let handle = block_on(port.open(OpenRequest::new(Arc::new(Recorder::default()))))
            .unwrap();
        assert_eq!(driver.remove_port(0).unwrap_err(), SerialError::Busy);
        drop(handle);
        driver.remove_port(0).unwrap();
        assert_eq!(mock.calls("release_resources"), 1);
        assert!(driver.port(0).is_none());
        assert_eq!(driver.remove_port(0).unwrap_err(), SerialError::NotFound);
    }

    #[test]
    fn removed_port_cannot_reopen() {
        let (_registry, driver) = serial();
        let (_mock, ops) = mock();
        let port = driver.add_port(uart(0), ops).unwrap();
        driver.remove_port(0).unwrap();
        let req = OpenRequest::new(Arc::new(Recorder::default())).flags(OpenFlags::NONBLOCK);
        assert_eq!(block_on(port.open(req)).unwrap_err(), SerialError::NotFound);
    }

    #[test]
    fn unregister_refuses_while_open() {
        let (registry, driver) = serial();
        let (_mock, ops) = mock();
        let port = driver.add_port(uart(0), ops).unwrap();
        let handle = block_on(port.open(OpenRequest::new(Arc::new(Recorder::default()))))
            .unwrap();
        assert_eq!(registry.unregister_driver("serial"), Err(SerialError::Busy));
        drop(handle);
        registry.unregister_driver("serial").unwrap();
        assert!(registry.driver("serial").is_none());
        assert_eq!(registry.unregister_driver("serial"), Err(SerialError::NotFound));
    }

    #[test]
    fn shutdown_all_hangs_up_open_ports() {
        let (registry, driver) = serial();
        let (_mock, ops) = mock();
        let port = driver.add_port(uart(0), ops).unwrap();
        let ldisc = Arc::new(Recorder::default());
        let handle = block_on(port.open(OpenRequest::new(ldisc.clone()))).unwrap();
        registry.shutdown_all();
        assert!(handle.is_hung_up());
        assert_eq!(ldisc.hangups(), 1);
        assert!(registry.drivers().is_empty());
        assert!(driver.ports().is_empty());
    }

    #[test]
    fn console_falls_back_to_first_port() {
        let (_registry, driver) = serial();
        let (_mock, ops) = mock();
        driver.add_port(uart(1), Arc::clone(&ops)).unwrap();
        let no_addr = PortData {
            port_type: PortType::P16550A,
            ..PortData::new(2, 0, 0)
        };
        driver.add_port(no_addr, ops).unwrap();
        assert_eq!(driver.get_console(Some(1)).unwrap().line(), 1);
        assert_eq!(driver.get_console(Some(2)).unwrap().line(), 1);
        assert_eq!(driver.get_console(Some(9)).unwrap().line(), 1);
        assert_eq!(driver.get_console(None).unwrap().line(), 1);
    }

    #[test]
    fn console_binding_follows_port_removal() {
        let (_registry, driver) = serial();
        let (mock, ops) = mock();
        driver.add_port(uart(0), ops).unwrap();
        let console = driver.bind_console(0, Some("115200n8")).unwrap();
        assert_eq!(driver.console_line(), Some(0));
        assert_eq!(mock.last_divisor(), Some(1));
        assert!(console.write("boot\n"));
        assert_eq!(mock.sent(), b"boot\r\n");
        driver.remove_port(0).unwrap();
        assert_eq!(driver.console_line(), None);
        assert_eq!(
            driver.bind_console(0, None).unwrap_err(),
            SerialError::NotFound
        );
    }
}
