//! Software state mirroring the controller hardware

use super::{
    irq::IrqSignal,
    registers::{DIGITAL_OUTPUT_REG, DigitalOutput, FLOPPY_DMA_CHANNEL, motor_bit},
};
use crate::{dma::DmaDirection, port::PortIo};

/// A DMA transfer that is currently armed on behalf of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBinding {
    pub channel: u8,
    pub len: usize,
    pub direction: DmaDirection,
}

/// Everything the driver has to remember about one controller between port
/// accesses.
///
/// The DOR is treated as write-only. `dor` always holds the last byte actually
/// written to it: the only way to change the shadow is [`write_dor`], which
/// writes the hardware in the same step.
///
/// [`write_dor`]: ControllerContext::write_dor
#[derive(Debug)]
pub struct ControllerContext {
    irq: &'static IrqSignal,
    dma: Option<DmaBinding>,
    drive: u8,
    dor: DigitalOutput,
    needs_reset: bool,
}

impl ControllerContext {
    pub fn new(irq: &'static IrqSignal, drive: u8) -> Self {
        Self {
            irq,
            dma: None,
            drive: drive & 0b11,
            dor: DigitalOutput::empty(),
            // nothing is known about the controller until it has been reset
            needs_reset: true,
        }
    }

    pub fn irq(&self) -> &'static IrqSignal {
        self.irq
    }

    pub fn drive(&self) -> u8 {
        self.drive
    }

    /// Makes `drive` the target of the following commands. The DOR is only
    /// rewritten on the next [`select`](Self::select) or
    /// [`enable`](Self::enable)
    pub fn set_drive(&mut self, drive: u8) {
        self.drive = drive & 0b11;
    }

    /// DOR select bits of the active drive
    pub fn select_bits(&self) -> DigitalOutput {
        DigitalOutput::from_bits_truncate(self.drive) & DigitalOutput::SELECT_MASK
    }

    /// DOR motor bit of the active drive
    pub fn motor_bit(&self) -> DigitalOutput {
        motor_bit(self.drive)
    }

    pub fn dor(&self) -> DigitalOutput {
        self.dor
    }

    pub fn motor_running(&self) -> bool {
        self.dor.contains(self.motor_bit())
    }

    pub fn write_dor(&mut self, ports: &mut impl PortIo, value: DigitalOutput) {
        ports.write_port(DIGITAL_OUTPUT_REG, value.bits());
        self.dor = value;
    }

    /// Holds the controller in reset. Motors stop too
    pub fn disable(&mut self, ports: &mut impl PortIo) {
        self.write_dor(ports, DigitalOutput::empty());
    }

    /// Takes the controller out of reset with DMA enabled and the active drive
    /// selected. Coming out of reset makes the controller interrupt, so the
    /// IRQ is armed before the write
    pub fn enable(&mut self, ports: &mut impl PortIo) {
        let value = (self.dor & DigitalOutput::MOTOR_MASK)
            | self.select_bits()
            | DigitalOutput::RESET
            | DigitalOutput::DMA_GATE;

        self.irq.arm();
        self.write_dor(ports, value);
    }

    /// Points the select bits at the active drive without touching reset,
    /// DMA or motor bits
    pub fn select(&mut self, ports: &mut impl PortIo) {
        let value = (self.dor - DigitalOutput::SELECT_MASK) | self.select_bits();
        self.write_dor(ports, value);
    }

    pub fn needs_reset(&self) -> bool {
        self.needs_reset
    }

    pub fn set_needs_reset(&mut self, needs_reset: bool) {
        self.needs_reset = needs_reset;
    }

    pub fn dma_binding(&self) -> Option<DmaBinding> {
        self.dma
    }

    pub fn bind_dma(&mut self, len: usize, direction: DmaDirection) {
        self.dma = Some(DmaBinding {
            channel: FLOPPY_DMA_CHANNEL,
            len,
            direction,
        });
    }

    pub fn release_dma(&mut self) {
        self.dma = None;
    }
}
