//! Collaborators above the serial core: the line discipline that consumes
//! the byte stream, and the signal mechanism that delivers hangups.

use alloc::sync::Arc;
use core::task::Waker;

use uart_base::sync::IrqSpinLock;

use crate::flags::OpenFlags;

/// Session identifier of the process group leader owning the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(pub u32);

/// Foreground process group of the owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pgrp(pub u32);

/// Receive annotation for one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RxFlag {
    /// Received cleanly.
    #[default]
    Normal,
    /// Break condition (the character is zero).
    Break,
    /// Parity error.
    Parity,
    /// Framing error.
    Frame,
    /// Receiver overrun; characters were lost before this marker.
    Overrun,
}

/// A received character with its annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RxChar {
    /// The character.
    pub ch: u8,
    /// How it was received.
    pub flag: RxFlag,
}

/// Consumer of the port's byte stream.
///
/// Called outside the port lock, so implementations may call back into the
/// port (for example to write an echo).
pub trait LineDiscipline: Send + Sync {
    /// Delivers a batch of received characters in arrival order.
    fn receive(&self, chars: &[RxChar]);

    /// Transmit ring drained below the wakeup threshold.
    fn write_wakeup(&self) {}

    /// The line was hung up.
    fn hangup(&self) {}

    /// A break arrived on a port with secure-attention enabled.
    fn secure_attention(&self) {}
}

/// Signal delivery keyed by session and process group.
pub trait SignalSink: Send + Sync {
    /// Delivers a hangup to the session that owns the line.
    fn hangup(&self, session: SessionId, pgrp: Pgrp);
}

/// Signal sink that drops every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignals;

impl SignalSink for NoSignals {
    fn hangup(&self, _session: SessionId, _pgrp: Pgrp) {}
}

// ---------------------------------------------------------------------------
// Pending-signal flag
// ---------------------------------------------------------------------------

struct SignalState {
    raised: bool,
    waker: Option<Waker>,
}

/// A "signal pending" flag for an opening task.
///
/// Raising it aborts a blocked open with
/// [`SerialError::Interrupted`](crate::SerialError::Interrupted) and wakes
/// the opener.
#[derive(Clone)]
pub struct SignalFlag {
    inner: Arc<IrqSpinLock<SignalState>>,
}

impl SignalFlag {
    /// Creates a flag that is not raised.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(IrqSpinLock::named(
                "signal",
                SignalState {
                    raised: false,
                    waker: None,
                },
            )),
        }
    }

    /// Raises the flag and wakes the registered task.
    pub fn raise(&self) {
        let waker = {
            let mut state = self.inner.lock();
            state.raised = true;
            state.waker.take()
        };
        if let Some(w) = waker {
            w.wake();
        }
    }

    /// Returns `true` if the flag is raised.
    pub fn is_raised(&self) -> bool {
        self.inner.lock().raised
    }

    /// Clears the flag.
    pub fn clear(&self) {
        self.inner.lock().raised = false;
    }

    pub(crate) fn register(&self, waker: &Waker) {
        let mut state = self.inner.lock();
        match &state.waker {
            Some(w) if w.will_wake(waker) => {}
            _ => state.waker = Some(waker.clone()),
        }
    }
}

impl Default for SignalFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SignalFlag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SignalFlag")
            .field("raised", &self.is_raised())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Open request
// ---------------------------------------------------------------------------

/// Everything an `open()` call carries besides the port itself.
#[derive(Clone)]
pub struct OpenRequest {
    /// Open mode.
    pub flags: OpenFlags,
    /// Session that becomes the owner on first open.
    pub session: SessionId,
    /// Process group that becomes the owner on first open.
    pub pgrp: Pgrp,
    /// Consumer of received data and notifications.
    pub ldisc: Arc<dyn LineDiscipline>,
    /// Pending-signal flag of the opening task.
    pub signal: Option<SignalFlag>,
}

impl OpenRequest {
    /// Creates a blocking, normal-mode request with no session.
    pub fn new(ldisc: Arc<dyn LineDiscipline>) -> Self {
        Self {
            flags: OpenFlags::empty(),
            session: SessionId::default(),
            pgrp: Pgrp::default(),
            ldisc,
            signal: None,
        }
    }

    /// Sets the open flags.
    #[must_use]
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the owning session and process group.
    #[must_use]
    pub fn session(mut self, session: SessionId, pgrp: Pgrp) -> Self {
        self.session = session;
        self.pgrp = pgrp;
        self
    }

    /// Attaches a pending-signal flag.
    #[must_use]
    pub fn signal(mut self, signal: SignalFlag) -> Self {
        self.signal = Some(signal);
        self
    }
}

impl core::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("flags", &self.flags)
            .field("session", &self.session)
            .field("pgrp", &self.pgrp)
            .finish_non_exhaustive()
    }
}
