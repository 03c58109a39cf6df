//! Spinning the drive motor up and down

use super::context::ControllerContext;
use crate::{port::PortIo, time::Delay};

/// Whether a motor toggle blocks until the drive has physically caught up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorWait {
    WaitForSpin,
    NoWait,
}

impl ControllerContext {
    /// Sets the active drive's motor bit. With [`MotorWait::WaitForSpin`] this
    /// blocks for `spin_up_ms` so the disk is up to speed before any I/O
    pub fn motor_on(
        &mut self,
        ports: &mut impl PortIo,
        delay: &mut impl Delay,
        wait: MotorWait,
        spin_up_ms: u32,
    ) {
        let value = self.dor() | self.motor_bit();
        self.write_dor(ports, value);

        if wait == MotorWait::WaitForSpin {
            delay.delay_ms(spin_up_ms);
        }
    }

    /// Clears the active drive's motor bit, optionally blocking for
    /// `spin_down_ms` while the disk comes to a stop
    pub fn motor_off(
        &mut self,
        ports: &mut impl PortIo,
        delay: &mut impl Delay,
        wait: MotorWait,
        spin_down_ms: u32,
    ) {
        let value = self.dor() - self.motor_bit();
        self.write_dor(ports, value);

        if wait == MotorWait::WaitForSpin {
            delay.delay_ms(spin_down_ms);
        }
    }
}
