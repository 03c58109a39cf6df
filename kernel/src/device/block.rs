use alloc::{collections::btree_map::BTreeMap, sync::Arc, vec::Vec};

use spin::Mutex;
use thiserror::Error;

/// Represents an abstract device which can read and write data to/from a store
/// in fixed size blocks
pub trait BlockDevice: Send + Sync {
    fn metadata(&self) -> BlockDeviceMetadata;

    /// Reads whole blocks starting at the byte `offset`. Returns the number of
    /// bytes read
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize, BlockDeviceIoError> {
        let _ = (offset, buf);
        Err(BlockDeviceIoError::OperationNotSupported)
    }

    /// Writes whole blocks starting at the byte `offset`. Returns the number
    /// of bytes written
    fn write(&self, offset: usize, buf: &[u8]) -> Result<usize, BlockDeviceIoError> {
        let _ = (offset, buf);
        Err(BlockDeviceIoError::OperationNotSupported)
    }

    /// Reads the single block `block` into `buf`, which must be exactly one
    /// block long
    fn read_block(&self, block: usize, buf: &mut [u8]) -> Result<(), BlockDeviceIoError> {
        let metadata = self.metadata();
        metadata.check_block(block, buf.len())?;

        self.read(block * metadata.block_size, buf).map(|_| ())
    }

    fn write_block(&self, block: usize, buf: &[u8]) -> Result<(), BlockDeviceIoError> {
        let metadata = self.metadata();
        metadata.check_block(block, buf.len())?;

        self.write(block * metadata.block_size, buf).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDeviceMetadata {
    pub name: &'static str,
    pub block_size: usize,
    pub total_blocks: usize,
    pub read_only: bool,
}

impl BlockDeviceMetadata {
    pub fn capacity(&self) -> usize {
        self.block_size * self.total_blocks
    }

    /// Checks that `offset..offset + len` is a whole number of blocks inside
    /// the device
    pub fn check_range(&self, offset: usize, len: usize) -> Result<(), BlockDeviceIoError> {
        if offset % self.block_size != 0 {
            return Err(BlockDeviceIoError::UnalignedOffset);
        }

        if len % self.block_size != 0 {
            return Err(BlockDeviceIoError::MismatchedBlockSize);
        }

        match offset.checked_add(len) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(BlockDeviceIoError::OffsetOutOfBounds),
        }
    }

    fn check_block(&self, block: usize, len: usize) -> Result<(), BlockDeviceIoError> {
        if len != self.block_size {
            return Err(BlockDeviceIoError::MismatchedBlockSize);
        }

        if block >= self.total_blocks {
            return Err(BlockDeviceIoError::OffsetOutOfBounds);
        }

        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDeviceIoError {
    /// Returned if this operation is not supported on this device
    #[error("operation not supported")]
    OperationNotSupported,
    /// The provided offset was not aligned to the block size
    #[error("offset is not aligned to the block size")]
    UnalignedOffset,
    /// The provided offset was out of range for the device
    #[error("offset out of bounds")]
    OffsetOutOfBounds,
    /// The provided buffer was not a multiple of the block size
    #[error("buffer is not a multiple of the block size")]
    MismatchedBlockSize,
    /// The medium refused a write
    #[error("device is read-only")]
    ReadOnly,
    /// The hardware failed to carry out the request
    #[error("device error")]
    DeviceFault,
}

lazy_static::lazy_static! {
    // Maps device names to drivers
    static ref BLOCK_DEVICE_REGISTRY: Mutex<BTreeMap<&'static str, Arc<dyn BlockDevice>>>
        = Default::default();
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDeviceRegistrationError {
    #[error("a block device with this name is already registered")]
    NameConflict,
}

pub fn register_block_device(b_dev: Arc<dyn BlockDevice>) -> Result<(), BlockDeviceRegistrationError> {
    let mut registry = BLOCK_DEVICE_REGISTRY.lock();

    let name = b_dev.metadata().name;

    // Make sure no other devices are registered under this name
    if registry.contains_key(name) {
        return Err(BlockDeviceRegistrationError::NameConflict);
    }

    registry.insert(name, b_dev);

    Ok(())
}

pub fn list_block_devices() -> Vec<Arc<dyn BlockDevice>> {
    BLOCK_DEVICE_REGISTRY.lock().values().cloned().collect()
}

pub fn get_block_device(name: &str) -> Option<Arc<dyn BlockDevice>> {
    BLOCK_DEVICE_REGISTRY.lock().get(name).cloned()
}
