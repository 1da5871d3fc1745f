//! The hardware operations contract.
//!
//! Every UART family implements [`UartOps`] once; a port holds exactly one
//! implementation for its whole lifetime. The core calls every method with
//! the port lock held and interrupts masked, so implementations must not
//! block and must not call back into the port's top-half API.

use crate::error::SerialError;
use crate::flags::{ConfigFlags, Mctrl};
use crate::irq::IrqContext;
use crate::port::{PortData, SerialInfo};
use crate::termios::{ControlFlags, InputFlags};

/// Device power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerState {
    /// Fully powered.
    On,
    /// Powered down.
    #[default]
    Off,
}

/// Operations on the physical (or emulated) UART.
pub trait UartOps: Send + Sync {
    /// Returns `true` iff the hardware transmitter (not the software ring)
    /// is fully drained.
    fn tx_empty(&self, port: &PortData) -> bool;

    /// Drives the modem control outputs.
    fn set_modem_control(&self, port: &PortData, mctrl: Mctrl);

    /// Reads the modem status inputs.
    fn get_modem_control(&self, port: &PortData) -> Mctrl;

    /// Disables the transmit-ready interrupt. Idempotent.
    fn stop_tx(&self, port: &PortData);

    /// Enables the transmit-ready interrupt. Idempotent.
    fn start_tx(&self, port: &PortData);

    /// Queues a high-priority flow-control character ahead of the ring.
    ///
    /// The default stores it in [`PortData::x_char`] for the transmit
    /// interrupt to pick up.
    fn send_xchar(&self, port: &mut PortData, ch: u8) {
        port.x_char = Some(ch);
        self.start_tx(port);
    }

    /// Disables receive interrupts.
    fn stop_rx(&self, port: &PortData);

    /// Arms carrier/CTS/DSR/RI change interrupts.
    fn enable_modem_status(&self, _port: &PortData) {}

    /// Asserts or clears a break condition on the line.
    fn break_control(&self, port: &PortData, on: bool);

    /// Claims the IRQ and anything else the running port needs.
    ///
    /// Fails with [`SerialError::ResourceConflict`] if something is already
    /// owned elsewhere.
    fn startup(&self, port: &mut PortData) -> Result<(), SerialError>;

    /// Releases everything `startup` acquired.
    ///
    /// Must be safe after a partially failed `startup`.
    fn shutdown(&self, port: &mut PortData);

    /// Applies new framing and baud settings.
    ///
    /// Called on live, transmitting ports; must not discard accepted data.
    fn reconfigure(
        &self,
        port: &mut PortData,
        cflag: ControlFlags,
        iflag: InputFlags,
        divisor: u32,
    );

    /// Power-state transition.
    fn pm(&self, _port: &PortData, _state: PowerState, _old: PowerState) {}

    /// Enables or disables wake-on-activity.
    fn set_wake(&self, _port: &PortData, _on: bool) -> Result<(), SerialError> {
        Err(SerialError::Unsupported)
    }

    /// Describes the hardware, or `None` if it is not recognized.
    fn type_name(&self, port: &PortData) -> Option<&'static str> {
        match port.port_type {
            crate::PortType::Unknown => None,
            other => Some(other.name()),
        }
    }

    /// Reserves the I/O or memory region.
    fn request_resources(&self, port: &mut PortData) -> Result<(), SerialError>;

    /// Releases the region reserved by `request_resources`.
    fn release_resources(&self, port: &mut PortData);

    /// Detects the hardware and fills in what `flags` asks for.
    fn config_port(&self, _port: &mut PortData, _flags: ConfigFlags) {}

    /// Checks a caller-proposed configuration against this hardware.
    fn verify_config(&self, port: &PortData, candidate: &SerialInfo) -> Result<(), SerialError>;

    /// Device-specific request.
    fn ioctl(&self, _port: &mut PortData, _cmd: u32, _arg: usize) -> Result<usize, SerialError> {
        Err(SerialError::Unsupported)
    }

    /// Writes one character synchronously, bypassing the ring.
    ///
    /// Used by the console; must not block beyond a bounded spin.
    fn poll_put_char(&self, _port: &PortData, _ch: u8) -> Result<(), SerialError> {
        Err(SerialError::Unsupported)
    }

    /// Interrupt service routine.
    ///
    /// Reads the hardware status and dispatches through `cx`: received
    /// characters, modem-line changes, and the transmit ring.
    fn interrupt(&self, cx: &mut IrqContext<'_>);
}
