//! Hand-off between the IRQ6 handler and the code waiting on the controller

use core::sync::atomic::{AtomicBool, Ordering};

use super::error::{FloppyError, FloppyResult};
use crate::{time::Delay, util::cancel::CancelToken};

/// The signal raised by the primary floppy controller's interrupt handler
pub static FLOPPY_IRQ: IrqSignal = IrqSignal::new();

/// One pending-interrupt flag plus the bookkeeping needed to tell whether
/// anybody is entitled to wait on it.
///
/// The controller issues at most one interrupt-generating command at a time,
/// so the protocol is: [`arm`](IrqSignal::arm) before the command,
/// [`wait`](IrqSignal::wait) after it. Each wait consumes exactly one
/// interrupt.
#[derive(Debug)]
pub struct IrqSignal {
    pending: AtomicBool,
    armed: AtomicBool,
}

impl IrqSignal {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            armed: AtomicBool::new(false),
        }
    }

    /// Called from the interrupt handler. Does nothing but set the flag
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Declares that an interrupt is expected. Any stale interrupt left over
    /// from before is dropped
    pub fn arm(&self) {
        self.pending.store(false, Ordering::Release);
        self.armed.store(true, Ordering::Release);
    }

    /// Forgets an expected interrupt, e.g. after the command that would have
    /// produced it could not be sent
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Blocks until the interrupt arrives, polling once per millisecond, then
    /// clears it. Gives up after `timeout_ms` or as soon as `cancel` is set.
    pub fn wait(
        &self,
        delay: &mut impl Delay,
        timeout_ms: u32,
        cancel: &CancelToken,
    ) -> FloppyResult<()> {
        if !self.is_armed() {
            return Err(FloppyError::UnexpectedWait);
        }

        let mut waited = 0;

        loop {
            if self.pending.swap(false, Ordering::AcqRel) {
                self.disarm();
                return Ok(());
            }

            if cancel.is_canceled() {
                self.disarm();
                return Err(FloppyError::Cancelled);
            }

            if waited >= timeout_ms {
                self.disarm();
                return Err(FloppyError::InterruptTimeout { timeout_ms });
            }

            delay.delay_ms(1);
            waited += 1;
        }
    }
}

impl Default for IrqSignal {
    fn default() -> Self {
        Self::new()
    }
}
