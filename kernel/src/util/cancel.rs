use core::sync::atomic::{AtomicBool, Ordering};

/// A flag which another execution context can set to abort a blocking wait.
/// Waiters poll it; setting it never interrupts anything on its own.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears a previous cancellation so the token can guard the next wait
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}
