//! ISA DMA (Intel 8237) support for the legacy devices which still need it.
//!
//! Channels on the ISA controller can only reach the first 16 MiB of physical
//! memory and cannot cross a 64 KiB boundary within one transfer, so drivers
//! don't hand out their callers' buffers. Instead each channel owns a bounce
//! buffer which the kernel reserved in low memory, and data is copied in or
//! out around the transfer.
//!
//! Reference: <https://wiki.osdev.org/ISA_DMA>

use thiserror::Error;

use crate::port::PortIo;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    #[error("transfer of {len} bytes exceeds the {capacity} byte DMA buffer")]
    TooLarge { len: usize, capacity: usize },
    #[error("DMA buffer at {address:#x} crosses a 64 KiB boundary")]
    CrossesBoundary { address: u32 },
    #[error("DMA buffer at {address:#x} lies above 16 MiB")]
    Unreachable { address: u32 },
    #[error("empty DMA transfer")]
    Empty,
}

/// Which way the bytes flow during a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Device to memory, i.e. a disk read
    DeviceToMemory,
    /// Memory to device, i.e. a disk write or format
    MemoryToDevice,
}

/// A DMA channel as seen by a device driver. Exactly one transfer may be armed
/// at a time
pub trait DmaChannel {
    /// Largest transfer the channel can take in one go
    fn capacity(&self) -> usize;

    /// Arms the channel to receive `len` bytes from the device
    fn arm_read(&mut self, len: usize) -> Result<(), DmaError>;

    /// Stages `data` and arms the channel to feed it to the device
    fn arm_write(&mut self, data: &[u8]) -> Result<(), DmaError>;

    /// Copies the bytes received by the last `arm_read` transfer into `out`
    fn collect(&mut self, out: &mut [u8]);

    /// Masks the channel. Called once the device signalled completion, or
    /// when the transfer is abandoned
    fn disarm(&mut self);
}

impl<T: DmaChannel + ?Sized> DmaChannel for &mut T {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn arm_read(&mut self, len: usize) -> Result<(), DmaError> {
        (**self).arm_read(len)
    }

    fn arm_write(&mut self, data: &[u8]) -> Result<(), DmaError> {
        (**self).arm_write(data)
    }

    fn collect(&mut self, out: &mut [u8]) {
        (**self).collect(out)
    }

    fn disarm(&mut self) {
        (**self).disarm()
    }
}

const DMA_MASK_REG: u16 = 0x0A;
const DMA_MODE_REG: u16 = 0x0B;
const DMA_FLIP_FLOP_RESET: u16 = 0x0C;

const MASK_ON: u8 = 0x04;

const MODE_SINGLE: u8 = 0x40;
/// Device to memory
const MODE_WRITE_MEMORY: u8 = 0x04;
/// Memory to device
const MODE_READ_MEMORY: u8 = 0x08;

const SIXTEEN_MIB: u32 = 16 * 1024 * 1024;

/// Ports of one of the four channels on the primary (8-bit) controller
#[derive(Debug, Clone, Copy)]
struct ChannelPorts {
    address: u16,
    count: u16,
    page: u16,
}

const fn channel_ports(channel: u8) -> ChannelPorts {
    match channel {
        0 => ChannelPorts { address: 0x00, count: 0x01, page: 0x87 },
        1 => ChannelPorts { address: 0x02, count: 0x03, page: 0x83 },
        2 => ChannelPorts { address: 0x04, count: 0x05, page: 0x81 },
        _ => ChannelPorts { address: 0x06, count: 0x07, page: 0x82 },
    }
}

/// One 8-bit channel of the 8237 together with its bounce buffer
pub struct IsaDma<P: PortIo> {
    ports: P,
    channel: u8,
    buffer: &'static mut [u8],
    physical_address: u32,
    armed_len: usize,
}

impl<P: PortIo> IsaDma<P> {
    /// `buffer` must be the virtual mapping of the physically contiguous
    /// region starting at `physical_address`, and must not be used by anything
    /// else while this channel exists
    pub fn new(
        ports: P,
        channel: u8,
        buffer: &'static mut [u8],
        physical_address: u32,
    ) -> Result<Self, DmaError> {
        let len = buffer.len() as u32;

        if len == 0 {
            return Err(DmaError::Empty);
        }

        let end = physical_address
            .checked_add(len - 1)
            .ok_or(DmaError::Unreachable { address: physical_address })?;

        if end >= SIXTEEN_MIB {
            return Err(DmaError::Unreachable { address: physical_address });
        }

        if physical_address >> 16 != end >> 16 {
            return Err(DmaError::CrossesBoundary { address: physical_address });
        }

        Ok(Self {
            ports,
            channel: channel & 0b11,
            buffer,
            physical_address,
            armed_len: 0,
        })
    }

    fn check_len(&self, len: usize) -> Result<(), DmaError> {
        if len == 0 {
            return Err(DmaError::Empty);
        }

        if len > self.buffer.len() {
            return Err(DmaError::TooLarge {
                len,
                capacity: self.buffer.len(),
            });
        }

        Ok(())
    }

    /// Programs address, count and mode of the channel and unmasks it
    fn program(&mut self, len: usize, direction: DmaDirection) {
        let ports = channel_ports(self.channel);
        let address = self.physical_address;
        // the controller transfers count + 1 bytes
        let count = (len - 1) as u16;

        let mode = MODE_SINGLE
            | self.channel
            | match direction {
                DmaDirection::DeviceToMemory => MODE_WRITE_MEMORY,
                DmaDirection::MemoryToDevice => MODE_READ_MEMORY,
            };

        self.ports.write_port(DMA_MASK_REG, MASK_ON | self.channel);

        self.ports.write_port(DMA_FLIP_FLOP_RESET, 0xFF);
        self.ports.write_port(ports.address, address as u8);
        self.ports.write_port(ports.address, (address >> 8) as u8);
        self.ports.write_port(ports.page, (address >> 16) as u8);

        self.ports.write_port(DMA_FLIP_FLOP_RESET, 0xFF);
        self.ports.write_port(ports.count, count as u8);
        self.ports.write_port(ports.count, (count >> 8) as u8);

        self.ports.write_port(DMA_MODE_REG, mode);

        self.ports.write_port(DMA_MASK_REG, self.channel);

        self.armed_len = len;
    }
}

impl<P: PortIo> DmaChannel for IsaDma<P> {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn arm_read(&mut self, len: usize) -> Result<(), DmaError> {
        self.check_len(len)?;
        self.program(len, DmaDirection::DeviceToMemory);
        Ok(())
    }

    fn arm_write(&mut self, data: &[u8]) -> Result<(), DmaError> {
        self.check_len(data.len())?;
        self.buffer[..data.len()].copy_from_slice(data);
        self.program(data.len(), DmaDirection::MemoryToDevice);
        Ok(())
    }

    fn collect(&mut self, out: &mut [u8]) {
        let len = out.len().min(self.armed_len);
        out[..len].copy_from_slice(&self.buffer[..len]);
    }

    fn disarm(&mut self) {
        self.ports.write_port(DMA_MASK_REG, MASK_ON | self.channel);
        self.armed_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingPorts {
        writes: Vec<(u16, u8)>,
    }

    impl PortIo for RecordingPorts {
        fn read_port(&mut self, _port: u16) -> u8 {
            0
        }

        fn write_port(&mut self, port: u16, value: u8) {
            self.writes.push((port, value));
        }
    }

    fn leak_buffer(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    #[test]
    fn programs_channel_two_for_a_read() {
        let mut dma = IsaDma::new(RecordingPorts::default(), 2, leak_buffer(0x4800), 0x1000).unwrap();

        dma.arm_read(512).unwrap();

        assert_eq!(
            dma.ports.writes,
            [
                (0x0A, 0x06),
                (0x0C, 0xFF),
                (0x04, 0x00),
                (0x04, 0x10),
                (0x81, 0x00),
                (0x0C, 0xFF),
                (0x05, 0xFF),
                (0x05, 0x01),
                (0x0B, 0x46),
                (0x0A, 0x02),
            ]
        );
    }

    #[test]
    fn write_stages_data_and_uses_read_memory_mode() {
        let mut dma = IsaDma::new(RecordingPorts::default(), 2, leak_buffer(1024), 0x2_0000).unwrap();

        dma.arm_write(&[0xAB; 512]).unwrap();

        assert!(dma.buffer[..512].iter().all(|&b| b == 0xAB));
        assert!(dma.ports.writes.contains(&(0x0B, 0x4A)));
        assert!(dma.ports.writes.contains(&(0x81, 0x02)));
    }

    #[test]
    fn collect_copies_received_bytes() {
        let mut dma = IsaDma::new(RecordingPorts::default(), 2, leak_buffer(1024), 0x1000).unwrap();

        dma.arm_read(4).unwrap();
        dma.buffer[..4].copy_from_slice(&[1, 2, 3, 4]);

        let mut out = [0u8; 4];
        dma.collect(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);

        dma.disarm();
        assert_eq!(dma.ports.writes.last(), Some(&(0x0A, 0x06)));
    }

    #[test]
    fn rejects_bad_buffers() {
        assert_eq!(
            IsaDma::new(RecordingPorts::default(), 2, leak_buffer(0x1000), 0xF800).err(),
            Some(DmaError::CrossesBoundary { address: 0xF800 })
        );
        assert_eq!(
            IsaDma::new(RecordingPorts::default(), 2, leak_buffer(512), 0x100_0000).err(),
            Some(DmaError::Unreachable { address: 0x100_0000 })
        );

        let mut dma = IsaDma::new(RecordingPorts::default(), 2, leak_buffer(512), 0x1000).unwrap();
        assert_eq!(dma.arm_read(0), Err(DmaError::Empty));
        assert_eq!(
            dma.arm_read(1024),
            Err(DmaError::TooLarge { len: 1024, capacity: 512 })
        );
        assert!(dma.ports.writes.is_empty());
    }
}
