//! Flow control and live reconfiguration against the emulated UART.

#![cfg(not(loom))]

mod common;

use std::sync::Arc;
use std::task::Poll;

use common::{Line, bench};
use uart_base::test_util::{block_on, poll_once};
use uart_core::{ControlFlags, InputFlags, LineConfig, Mctrl};
use uart_virt::{FIFO_DEPTH, IOCTL_GET_DIVISOR, IOCTL_SET_LOOPBACK};

#[test]
fn cts_paces_transmission() {
    let b = bench();
    let line = Arc::new(Line::default());
    let handle = block_on(b.port.open(b.open_request(&line))).unwrap();

    let mut t = handle.termios();
    t.cflag.insert(ControlFlags::CRTSCTS);
    handle.set_termios(t).unwrap();

    handle.write(b"abc").unwrap();
    b.port.handle_interrupt();
    assert!(b.uart.take_transmitted().is_empty());

    b.uart.set_cts(true);
    b.port.handle_interrupt();
    assert_eq!(b.uart.take_transmitted(), b"abc");
    assert_eq!(line.wakeups(), 1);

    b.uart.set_cts(false);
    b.port.handle_interrupt();
    handle.write(b"de").unwrap();
    b.port.handle_interrupt();
    assert!(b.uart.take_transmitted().is_empty());

    b.uart.set_cts(true);
    b.port.handle_interrupt();
    assert_eq!(b.uart.take_transmitted(), b"de");
    assert_eq!(b.port.icount().cts, 3);
}

#[test]
fn reconfigure_mid_stream_loses_nothing() {
    let b = bench();
    let line = Arc::new(Line::default());
    let handle = block_on(b.port.open(b.open_request(&line))).unwrap();
    let data: Vec<u8> = (0..40).collect();
    handle.write(&data).unwrap();
    b.port.handle_interrupt();

    let fast = LineConfig {
        baud: 115_200,
        ..LineConfig::default()
    };
    handle.set_line_config(&fast).unwrap();
    assert_eq!(handle.ioctl(IOCTL_GET_DIVISOR, 0), Ok(1));
    assert_eq!(handle.chars_in_buffer(), Ok(40 - FIFO_DEPTH));

    b.port.handle_interrupt();
    b.port.handle_interrupt();
    let frames = b.uart.take_frames();
    assert_eq!(frames.iter().map(|f| f.byte).collect::<Vec<_>>(), data);
    assert!(frames[..FIFO_DEPTH].iter().all(|f| f.divisor == 12));
    assert!(frames[FIFO_DEPTH..].iter().all(|f| f.divisor == 1));
}

#[test]
fn rejected_settings_leave_the_line_alone() {
    let b = bench();
    let line = Arc::new(Line::default());
    let handle = block_on(b.port.open(b.open_request(&line))).unwrap();
    let before = handle.termios();

    let mut t = before;
    t.baud = 1;
    assert!(handle.set_termios(t).is_err());
    assert_eq!(handle.termios(), before);
    assert_eq!(b.uart.divisor(), 12);
}

#[test]
fn throttle_sends_xoff_then_xon() {
    let b = bench();
    let line = Arc::new(Line::default());
    let handle = block_on(b.port.open(b.open_request(&line))).unwrap();
    let mut t = handle.termios();
    t.iflag.insert(InputFlags::IXOFF);
    handle.set_termios(t).unwrap();

    handle.throttle().unwrap();
    b.port.handle_interrupt();
    assert_eq!(b.uart.take_transmitted(), [0x13]);

    handle.unthrottle().unwrap();
    b.port.handle_interrupt();
    assert_eq!(b.uart.take_transmitted(), [0x11]);
}

#[test]
fn baud_zero_drops_dtr_and_rts() {
    let b = bench();
    let line = Arc::new(Line::default());
    let handle = block_on(b.port.open(b.open_request(&line))).unwrap();
    let mut t = handle.termios();
    t.baud = 0;
    handle.set_termios(t).unwrap();
    assert!(!handle.tiocmget().unwrap().intersects(Mctrl::DTR | Mctrl::RTS));

    t.baud = 9600;
    handle.set_termios(t).unwrap();
    assert!(handle.tiocmget().unwrap().contains(Mctrl::DTR | Mctrl::RTS));
}

#[test]
fn loopback_echoes_through_receiver() {
    let b = bench();
    let line = Arc::new(Line::default());
    let handle = block_on(b.port.open(b.open_request(&line))).unwrap();
    handle.ioctl(IOCTL_SET_LOOPBACK, 1).unwrap();

    handle.tiocmset(Mctrl::OUT2, Mctrl::empty()).unwrap();
    assert!(handle.tiocmget().unwrap().contains(Mctrl::CAR | Mctrl::CTS));

    handle.write(b"ping").unwrap();
    b.port.handle_interrupt();
    b.port.handle_interrupt();
    assert_eq!(line.text(), "ping");
    assert!(b.uart.take_transmitted().is_empty());
}

#[test]
fn modem_wait_wakes_on_ring() {
    let b = bench();
    let line = Arc::new(Line::default());
    let handle = block_on(b.port.open(b.open_request(&line))).unwrap();

    let mut waiting = Box::pin(handle.wait_modem_change(Mctrl::RNG));
    assert!(poll_once(&mut waiting).is_pending());
    b.uart.pulse_ri();
    b.port.handle_interrupt();
    match poll_once(&mut waiting) {
        Poll::Ready(Ok(icount)) => assert_eq!(icount.rng, 1),
        other => panic!("unexpected {other:?}"),
    }
}
