//! Millisecond delays for drivers which have to wait on mechanical hardware

pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Busy-waits by spinning the CPU. The number of spins per millisecond has to
/// be calibrated by the caller (e.g. against the PIT) since it depends on the
/// clock speed of the machine.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    spins_per_ms: u32,
}

impl SpinDelay {
    pub const fn new(spins_per_ms: u32) -> Self {
        Self { spins_per_ms }
    }
}

impl Default for SpinDelay {
    fn default() -> Self {
        // Roughly right for QEMU on a modern host
        Self::new(10_000)
    }
}

impl Delay for SpinDelay {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..(ms as u64 * self.spins_per_ms as u64) {
            core::hint::spin_loop();
        }
    }
}

impl<T: Delay + ?Sized> Delay for &mut T {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}
