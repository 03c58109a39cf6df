use super::{geometry::Geometry, registers::DataRate};

/// Tunables of the floppy driver. The defaults suit a 3.5" 1.44 MB drive on a
/// PC-compatible controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloppyConfig {
    pub geometry: Geometry,
    /// How many times the main status register is polled for "ready" before a
    /// FIFO byte is given up on
    pub poll_budget: u32,
    /// Seek attempts (each followed by a recalibrate on a miss) before the
    /// request fails
    pub recalibrate_retries: u32,
    /// Attempts of one data transfer when the controller reports a CRC error,
    /// overrun or missing sector
    pub transfer_retries: u32,
    /// How long the motor needs after being switched on before it reaches
    /// speed
    pub motor_spin_up_ms: u32,
    pub motor_spin_down_ms: u32,
    /// Upper bound on the wait for an IRQ6 after a command
    pub irq_timeout_ms: u32,
    pub data_rate: DataRate,
    /// SPECIFY step rate time, in units of (16 - value) ms at 500 kbps
    pub step_rate: u8,
    /// SPECIFY head unload time
    pub head_unload_time: u8,
    /// SPECIFY head load time
    pub head_load_time: u8,
    /// CONFIGURE FIFO threshold, 1..=16 bytes
    pub fifo_threshold: u8,
}

impl FloppyConfig {
    pub const fn new() -> Self {
        Self {
            geometry: Geometry::FLOPPY_144,
            poll_budget: 1000,
            recalibrate_retries: 80,
            transfer_retries: 3,
            motor_spin_up_ms: 300,
            motor_spin_down_ms: 2000,
            irq_timeout_ms: 3000,
            data_rate: DataRate::Kbps500,
            step_rate: 0x0D,
            head_unload_time: 0x0F,
            head_load_time: 0x01,
            fifo_threshold: 8,
        }
    }
}

impl Default for FloppyConfig {
    fn default() -> Self {
        Self::new()
    }
}
