pub mod floppy;

use alloc::sync::Arc;

use spin::Mutex;
use thiserror::Error;

use crate::{
    cmos::{self, DriveType},
    device::block::{BlockDeviceRegistrationError, register_block_device},
    dma::{DmaChannel, DmaError, IsaDma},
    port::{PortIo, X86Ports},
    time::{Delay, SpinDelay},
};
use floppy::{
    FloppyConfig, FloppyController, FloppyDisk, FloppyError,
    irq::{FLOPPY_IRQ, IrqSignal},
    registers::FLOPPY_DMA_CHANNEL,
};

const FLOPPY_NAMES: [&str; 2] = ["fd0", "fd1"];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloppyInitError {
    #[error("no 1.44 MB floppy drive installed")]
    NoDrives,
    #[error("floppy controller failed to come up: {0}")]
    Controller(#[from] FloppyError),
    #[error("unusable DMA bounce buffer: {0}")]
    Dma(#[from] DmaError),
    #[error(transparent)]
    Registration(#[from] BlockDeviceRegistrationError),
}

/// Detects the floppy drives recorded in CMOS, brings up the controller and
/// registers every 1.44 MB drive as `fd0` / `fd1`, each recalibrated to track
/// 0. Returns how many drives were registered
pub fn init_floppy<P, D, M>(
    mut ports: P,
    delay: D,
    dma: M,
    irq: &'static IrqSignal,
    config: FloppyConfig,
) -> Result<usize, FloppyInitError>
where
    P: PortIo + Send + 'static,
    D: Delay + Send + 'static,
    M: DmaChannel + Send + 'static,
{
    let drives = cmos::detect_drives(&mut ports);

    for (name, drive_type) in FLOPPY_NAMES.iter().zip(drives) {
        log::info!("{name}: {drive_type}");
    }

    let usable = |drive_type: &DriveType| drive_type.supports_144();

    let Some(first) = drives.iter().position(usable) else {
        return Err(FloppyInitError::NoDrives);
    };

    let mut controller = FloppyController::new(ports, delay, dma, irq, first as u8, config);
    controller.init()?;

    let controller = Arc::new(Mutex::new(controller));
    let mut registered = 0;

    for (drive, drive_type) in drives.iter().enumerate() {
        if !usable(drive_type) {
            if drive_type.is_present() {
                log::warn!("{}: {} drives are not supported", FLOPPY_NAMES[drive], drive_type);
            }
            continue;
        }

        // init already brought the first drive to track 0
        if drive != first {
            let mut controller = controller.lock();
            controller.set_drive(drive as u8);
            controller.recalibrate()?;
        }

        let disk = FloppyDisk::new(FLOPPY_NAMES[drive], drive as u8, controller.clone());
        register_block_device(Arc::new(disk))?;
        registered += 1;
    }

    Ok(registered)
}

/// [`init_floppy`] on the real hardware, with `bounce_buffer` as the DMA
/// staging area.
///
/// # Safety
///
/// Must be called at most once. `bounce_buffer` must map the physical memory
/// at `physical_address`, and IRQ6 must be routed to
/// [`FLOPPY_IRQ`](floppy::irq::FLOPPY_IRQ) before any drive is used.
pub unsafe fn init(bounce_buffer: &'static mut [u8], physical_address: u32) -> Result<usize, FloppyInitError> {
    let (ports, dma_ports) = unsafe { (X86Ports::new(), X86Ports::new()) };

    let dma = IsaDma::new(dma_ports, FLOPPY_DMA_CHANNEL, bounce_buffer, physical_address)?;

    init_floppy(ports, SpinDelay::default(), dma, &FLOPPY_IRQ, FloppyConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::block::get_block_device;
    use super::floppy::sim::SimulatedFloppy;

    fn init_sim(sim: &SimulatedFloppy) -> Result<usize, FloppyInitError> {
        init_floppy(sim.ports(), sim.delay(), sim.dma(), sim.irq(), FloppyConfig::default())
    }

    #[test]
    fn registers_both_drives_once() {
        let sim = SimulatedFloppy::new();
        sim.set_cmos(0x10, 0x44);
        sim.fill_disk(|lba| [lba as u8; 512]);

        assert_eq!(init_sim(&sim), Ok(2));

        let fd1 = get_block_device("fd1").unwrap();
        let mut buf = [0u8; 512];
        fd1.read_block(3, &mut buf).unwrap();
        assert_eq!(buf, [3; 512]);

        // the controller came up through init: VERSION and CONFIGURE went out
        assert!(sim.commands().iter().any(|c| c[0] == 0x10));
        assert!(sim.commands().iter().any(|c| c[0] == 0x13));

        // and both heads were brought to track 0 before use
        assert!(sim.commands().contains(&vec![0x07, 0x00]));
        assert!(sim.commands().contains(&vec![0x07, 0x01]));

        let again = SimulatedFloppy::new();
        assert_eq!(
            init_sim(&again),
            Err(FloppyInitError::Registration(BlockDeviceRegistrationError::NameConflict))
        );
    }

    #[test]
    fn no_usable_drive_leaves_the_controller_alone() {
        let sim = SimulatedFloppy::new();
        sim.set_cmos(0x10, 0x20);

        assert_eq!(init_sim(&sim), Err(FloppyInitError::NoDrives));
        assert!(sim.dor_writes().is_empty());
    }
}
