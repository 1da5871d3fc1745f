//! Shared fixtures: a registered driver with one emulated port and a line
//! discipline that records what it is handed.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use uart_core::{
    ControlFlags, DriverConfig, LineDiscipline, OpenRequest, PlatformResources, PortData,
    Registry, ResourceTable, RxChar, UartDriver, UartOps, UartPort,
};
use uart_virt::VirtUart;

pub const OWNER: &str = "virt-uart";
pub const IOBASE: u64 = 0x3f8;
pub const IRQ: u32 = 4;

/// Line discipline that records everything.
#[derive(Default)]
pub struct Line {
    received: Mutex<Vec<RxChar>>,
    wakeups: Mutex<usize>,
    hangups: Mutex<usize>,
}

impl Line {
    pub fn received(&self) -> Vec<RxChar> {
        self.received.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        self.received().iter().map(|r| char::from(r.ch)).collect()
    }

    pub fn wakeups(&self) -> usize {
        *self.wakeups.lock().unwrap()
    }

    pub fn hangups(&self) -> usize {
        *self.hangups.lock().unwrap()
    }
}

impl LineDiscipline for Line {
    fn receive(&self, chars: &[RxChar]) {
        self.received.lock().unwrap().extend_from_slice(chars);
    }

    fn write_wakeup(&self) {
        *self.wakeups.lock().unwrap() += 1;
    }

    fn hangup(&self) {
        *self.hangups.lock().unwrap() += 1;
    }
}

pub struct Bench {
    pub registry: Registry,
    pub table: Arc<ResourceTable>,
    pub driver: Arc<UartDriver>,
    pub uart: Arc<VirtUart>,
    pub port: Arc<UartPort>,
}

impl Bench {
    pub fn open_request(&self, line: &Arc<Line>) -> OpenRequest {
        OpenRequest::new(line.clone())
    }
}

/// A `ttyV` driver with an emulated port on line 0.
pub fn bench() -> Bench {
    bench_with(|uart| uart, |_| {})
}

/// Like [`bench`], but with carrier detect honoured on open.
pub fn modem_bench() -> Bench {
    bench_with(
        |uart| uart,
        |data| data.termios.cflag.remove(ControlFlags::CLOCAL),
    )
}

pub fn bench_with(
    build: impl FnOnce(VirtUart) -> VirtUart,
    tweak: impl FnOnce(&mut PortData),
) -> Bench {
    let table = Arc::new(ResourceTable::new());
    let resources: Arc<dyn PlatformResources> = table.clone();
    let uart = Arc::new(build(VirtUart::new(OWNER, resources)));
    let ops: Arc<dyn UartOps> = uart.clone();

    let registry = Registry::new();
    let driver = registry
        .register_driver(DriverConfig::new("virt", "ttyV", 4))
        .unwrap();
    let mut data = VirtUart::port_data(0, IOBASE, IRQ);
    tweak(&mut data);
    let port = driver.add_port(data, ops).unwrap();
    Bench {
        registry,
        table,
        driver,
        uart,
        port,
    }
}
