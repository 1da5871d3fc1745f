//! In-crate test doubles: a scriptable [`UartOps`], a recording line
//! discipline and a recording signal sink.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::SerialError;
use crate::flags::{ConfigFlags, Mctrl, RxStatus};
use crate::irq::IrqContext;
use crate::ldisc::{LineDiscipline, Pgrp, RxChar, SessionId, SignalSink};
use crate::ops::{PowerState, UartOps};
use crate::port::{PortData, PortType, SerialInfo};
use crate::termios::{ControlFlags, InputFlags};

/// Something the mock hardware reports on its next interrupt.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MockEvent {
    Rx(RxStatus, u8),
    Dcd(bool),
    Cts(bool),
}

#[derive(Default)]
struct MockState {
    calls: Vec<&'static str>,
    inputs: Mctrl,
    fail_startup: Option<SerialError>,
    events: VecDeque<MockEvent>,
    tx_enabled: bool,
    sent: Vec<u8>,
    last_divisor: Option<u32>,
    detected: Option<PortType>,
}

/// Scriptable hardware.
///
/// Records every operation by name. The interrupt routine first replays
/// queued [`MockEvent`]s, then drains the x-char and the whole transmit
/// ring if the transmitter is enabled.
#[derive(Default)]
pub(crate) struct MockOps {
    state: Mutex<MockState>,
}

impl MockOps {
    pub(crate) fn with_inputs(inputs: Mctrl) -> Self {
        let ops = Self::default();
        ops.set_inputs(inputs);
        ops
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn record(&self, name: &'static str) {
        self.locked().calls.push(name);
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == name)
            .count()
    }

    pub(crate) fn set_inputs(&self, inputs: Mctrl) {
        self.state.lock().unwrap().inputs = inputs & Mctrl::INPUTS;
    }

    pub(crate) fn fail_startup(&self, err: SerialError) {
        self.state.lock().unwrap().fail_startup = Some(err);
    }

    pub(crate) fn heal(&self) {
        self.state.lock().unwrap().fail_startup = None;
    }

    pub(crate) fn detect_as(&self, port_type: PortType) {
        self.state.lock().unwrap().detected = Some(port_type);
    }

    pub(crate) fn push_event(&self, event: MockEvent) {
        self.state.lock().unwrap().events.push_back(event);
    }

    pub(crate) fn sent(&self) -> Vec<u8> {
        core::mem::take(&mut self.state.lock().unwrap().sent)
    }

    pub(crate) fn tx_enabled(&self) -> bool {
        self.state.lock().unwrap().tx_enabled
    }

    pub(crate) fn last_divisor(&self) -> Option<u32> {
        self.state.lock().unwrap().last_divisor
    }
}

impl UartOps for MockOps {
    fn tx_empty(&self, _port: &PortData) -> bool {
        true
    }

    fn set_modem_control(&self, _port: &PortData, _mctrl: Mctrl) {
        self.record("set_modem_control");
    }

    fn get_modem_control(&self, _port: &PortData) -> Mctrl {
        self.state.lock().unwrap().inputs
    }

    fn stop_tx(&self, _port: &PortData) {
        self.record("stop_tx");
        self.locked().tx_enabled = false;
    }

    fn start_tx(&self, _port: &PortData) {
        self.record("start_tx");
        self.locked().tx_enabled = true;
    }

    fn stop_rx(&self, _port: &PortData) {
        self.record("stop_rx");
    }

    fn enable_modem_status(&self, _port: &PortData) {
        self.record("enable_modem_status");
    }

    fn break_control(&self, _port: &PortData, _on: bool) {
        self.record("break_control");
    }

    fn startup(&self, _port: &mut PortData) -> Result<(), SerialError> {
        self.record("startup");
        match self.locked().fail_startup {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn shutdown(&self, _port: &mut PortData) {
        self.record("shutdown");
        self.locked().tx_enabled = false;
    }

    fn reconfigure(
        &self,
        _port: &mut PortData,
        _cflag: ControlFlags,
        _iflag: InputFlags,
        divisor: u32,
    ) {
        self.record("reconfigure");
        self.locked().last_divisor = Some(divisor);
    }

    fn pm(&self, _port: &PortData, state: PowerState, _old: PowerState) {
        self.record(match state {
            PowerState::On => "pm_on",
            PowerState::Off => "pm_off",
        });
    }

    fn request_resources(&self, _port: &mut PortData) -> Result<(), SerialError> {
        self.record("request_resources");
        Ok(())
    }

    fn release_resources(&self, _port: &mut PortData) {
        self.record("release_resources");
    }

    fn config_port(&self, port: &mut PortData, flags: ConfigFlags) {
        self.record("config_port");
        if flags.contains(ConfigFlags::TYPE) {
            if let Some(t) = self.locked().detected {
                port.port_type = t;
            }
        }
    }

    fn verify_config(&self, _port: &PortData, candidate: &SerialInfo) -> Result<(), SerialError> {
        if candidate.baud_base == 0 {
            return Err(SerialError::InvalidConfig);
        }
        Ok(())
    }

    fn poll_put_char(&self, _port: &PortData, ch: u8) -> Result<(), SerialError> {
        self.state.lock().unwrap().sent.push(ch);
        Ok(())
    }

    fn interrupt(&self, cx: &mut IrqContext<'_>) {
        let events: Vec<_> = self.state.lock().unwrap().events.drain(..).collect();
        for event in events {
            match event {
                MockEvent::Rx(status, ch) => cx.insert_char(status, ch),
                MockEvent::Dcd(on) => cx.handle_dcd_change(on),
                MockEvent::Cts(on) => cx.handle_cts_change(on),
            }
        }

        if !self.tx_enabled() {
            return;
        }
        let mut out = Vec::new();
        if let Some(ch) = cx.take_x_char() {
            out.push(ch);
        }
        if !cx.tx_stopped() {
            while let Some(b) = cx.tx_pop() {
                out.push(b);
            }
        }
        self.state.lock().unwrap().sent.extend(out);
        if cx.tx_pending() == 0 {
            self.stop_tx(cx.port());
        }
    }
}

/// Line discipline that records everything it is handed.
#[derive(Default)]
pub(crate) struct Recorder {
    received: Mutex<Vec<RxChar>>,
    wakeups: Mutex<usize>,
    hangups: Mutex<usize>,
    saks: Mutex<usize>,
}

impl Recorder {
    pub(crate) fn received(&self) -> Vec<RxChar> {
        self.received.lock().unwrap().clone()
    }

    pub(crate) fn text(&self) -> String {
        self.received().iter().map(|r| char::from(r.ch)).collect()
    }

    pub(crate) fn wakeups(&self) -> usize {
        *self.wakeups.lock().unwrap()
    }

    pub(crate) fn hangups(&self) -> usize {
        *self.hangups.lock().unwrap()
    }

    pub(crate) fn saks(&self) -> usize {
        *self.saks.lock().unwrap()
    }
}

impl LineDiscipline for Recorder {
    fn receive(&self, chars: &[RxChar]) {
        self.received.lock().unwrap().extend_from_slice(chars);
    }

    fn write_wakeup(&self) {
        *self.wakeups.lock().unwrap() += 1;
    }

    fn hangup(&self) {
        *self.hangups.lock().unwrap() += 1;
    }

    fn secure_attention(&self) {
        *self.saks.lock().unwrap() += 1;
    }
}

/// Signal sink that records delivered hangups.
#[derive(Default)]
pub(crate) struct RecordingSignals {
    hangups: Mutex<Vec<(SessionId, Pgrp)>>,
}

impl RecordingSignals {
    pub(crate) fn hangups(&self) -> Vec<(SessionId, Pgrp)> {
        self.hangups.lock().unwrap().clone()
    }
}

impl SignalSink for RecordingSignals {
    fn hangup(&self, session: SessionId, pgrp: Pgrp) {
        self.hangups.lock().unwrap().push((session, pgrp));
    }
}

/// Shorthand for an `Arc<MockOps>` alongside its trait-object form.
pub(crate) fn mock() -> (Arc<MockOps>, Arc<dyn UartOps>) {
    let ops = Arc::new(MockOps::default());
    let dyn_ops: Arc<dyn UartOps> = ops.clone();
    (ops, dyn_ops)
}
