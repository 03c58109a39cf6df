//! Floppy Disk Driver
//!
//! Drives 3.5" 1.44 MB disks attached to the primary NEC 765 / Intel 82077AA
//! compatible controller, using ISA DMA channel 2 for data and IRQ6 for
//! completion.
//!
//! [`FloppyController`] is the single-request state machine. It owns the
//! hardware seams ([`PortIo`], [`Delay`], [`DmaChannel`]) and takes `&mut self`
//! everywhere, so serialization is the caller's business. [`FloppyDisk`] is that
//! caller for the block layer: it shares one controller between the drives on
//! it behind a [`spin::Mutex`].

pub mod command;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod geometry;
pub mod irq;
pub mod motor;
pub mod registers;

#[cfg(test)]
pub(crate) mod sim;

use alloc::sync::Arc;

use spin::Mutex;

pub use config::FloppyConfig;
pub use controller::{FloppyController, TransferBuffer, TransferRequest, TransferState};
pub use error::{FloppyError, FloppyResult};
pub use geometry::{Chs, Geometry};

use crate::{
    device::block::{BlockDevice, BlockDeviceIoError, BlockDeviceMetadata},
    dma::DmaChannel,
    port::PortIo,
    time::Delay,
};

pub type SharedController<P, D, M> = Arc<Mutex<FloppyController<P, D, M>>>;

impl From<FloppyError> for BlockDeviceIoError {
    fn from(err: FloppyError) -> Self {
        match err {
            FloppyError::WriteProtected => BlockDeviceIoError::ReadOnly,
            FloppyError::OutOfRange { .. } => BlockDeviceIoError::OffsetOutOfBounds,
            FloppyError::InvalidBuffer { .. } => BlockDeviceIoError::MismatchedBlockSize,
            _ => BlockDeviceIoError::DeviceFault,
        }
    }
}

/// One drive as seen by the block layer
pub struct FloppyDisk<P: PortIo, D: Delay, M: DmaChannel> {
    name: &'static str,
    drive: u8,
    controller: SharedController<P, D, M>,
}

impl<P: PortIo, D: Delay, M: DmaChannel> FloppyDisk<P, D, M> {
    /// Callers must ensure that only one instance of this driver exists for
    /// each drive on `controller`
    pub fn new(name: &'static str, drive: u8, controller: SharedController<P, D, M>) -> Self {
        Self {
            name,
            drive,
            controller,
        }
    }

    pub fn drive(&self) -> u8 {
        self.drive
    }

    pub fn controller(&self) -> &SharedController<P, D, M> {
        &self.controller
    }

    fn geometry(&self) -> Geometry {
        self.controller.lock().config().geometry
    }

    /// Locks the controller, points it at this drive and runs `f`
    fn with_controller<T>(
        &self,
        f: impl FnOnce(&mut FloppyController<P, D, M>) -> FloppyResult<T>,
    ) -> FloppyResult<T> {
        let mut controller = self.controller.lock();
        controller.set_drive(self.drive);
        f(&mut controller)
    }

    pub fn format_track(&self, cylinder: u8, head: u8) -> FloppyResult<()> {
        self.with_controller(|controller| controller.format_track(cylinder, head))
    }

    pub fn is_write_protected(&self) -> FloppyResult<bool> {
        self.with_controller(|controller| controller.is_write_protected())
    }
}

impl<P, D, M> BlockDevice for FloppyDisk<P, D, M>
where
    P: PortIo + Send,
    D: Delay + Send,
    M: DmaChannel + Send,
{
    fn metadata(&self) -> BlockDeviceMetadata {
        let geometry = self.geometry();

        BlockDeviceMetadata {
            name: self.name,
            block_size: geometry.sector_size,
            total_blocks: geometry.total_sectors() as usize,
            read_only: false,
        }
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize, BlockDeviceIoError> {
        let metadata = self.metadata();
        metadata.check_range(offset, buf.len())?;

        let lba = (offset / metadata.block_size) as u32;
        self.with_controller(|controller| controller.read_sectors(lba, buf))?;

        Ok(buf.len())
    }

    fn write(&self, offset: usize, buf: &[u8]) -> Result<usize, BlockDeviceIoError> {
        let metadata = self.metadata();
        metadata.check_range(offset, buf.len())?;

        let lba = (offset / metadata.block_size) as u32;
        self.with_controller(|controller| controller.write_sectors(lba, buf))?;

        Ok(buf.len())
    }
}
