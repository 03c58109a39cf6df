//! Byte-level FIFO protocol of the controller.
//!
//! Every command is a sequence of bytes written to the FIFO, optionally
//! followed (after an interrupt, for some commands) by result bytes read back
//! from it. Before each byte the main status register has to report RQM, and
//! its DIO bit tells which side is supposed to talk. The engine polls for RQM
//! a bounded number of times and never touches the FIFO if RQM doesn't show
//! up.

use heapless::Vec;

use super::{
    error::{FifoDirection, FloppyError, FloppyResult},
    geometry::{Chs, Geometry},
    registers::{Command, CommandMode, DATA_FIFO, MAIN_STATUS_REG, MainStatus},
};
use crate::port::PortIo;

/// Longest command: read/write data with 8 parameter bytes
pub const MAX_COMMAND_LEN: usize = 9;
/// Longest result phase: ST0, ST1, ST2, C, H, R, N
pub const MAX_RESULT_LEN: usize = 7;

pub type ResultBytes = Vec<u8, MAX_RESULT_LEN>;

/// One command ready to be sent: the opcode and its parameters, plus how many
/// result bytes the controller answers with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: Vec<u8, MAX_COMMAND_LEN>,
    result_len: usize,
    interrupts: bool,
}

impl CommandFrame {
    fn new(bytes: &[u8], result_len: usize, interrupts: bool) -> Self {
        let mut frame = Vec::new();
        // every frame built in this module fits
        let _ = frame.extend_from_slice(&bytes[..bytes.len().min(MAX_COMMAND_LEN)]);

        Self {
            bytes: frame,
            result_len,
            interrupts,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn opcode(&self) -> u8 {
        self.bytes.first().copied().unwrap_or_default()
    }

    pub fn result_len(&self) -> usize {
        self.result_len
    }

    /// Whether the controller raises IRQ6 once the command has executed
    pub fn interrupts(&self) -> bool {
        self.interrupts
    }

    pub fn specify(step_rate: u8, head_unload: u8, head_load: u8) -> Self {
        Self::new(
            &[
                Command::Specify.opcode(),
                (step_rate << 4) | (head_unload & 0x0F),
                // NDMA bit clear: data goes through DMA
                head_load << 1,
            ],
            0,
            false,
        )
    }

    /// Implied seek off, FIFO on, drive polling off, precompensation default
    pub fn configure(fifo_threshold: u8) -> Self {
        let threshold = fifo_threshold.clamp(1, 16) - 1;

        Self::new(
            &[Command::Configure.opcode(), 0x00, 0x10 | threshold, 0x00],
            0,
            false,
        )
    }

    pub fn version() -> Self {
        Self::new(&[Command::Version.opcode()], 1, false)
    }

    pub fn drive_status(drive: u8, head: u8) -> Self {
        Self::new(&[Command::DriveStatus.opcode(), head_drive(head, drive)], 1, false)
    }

    pub fn recalibrate(drive: u8) -> Self {
        Self::new(&[Command::Recalibrate.opcode(), drive & 0b11], 0, true)
    }

    pub fn seek(drive: u8, head: u8, cylinder: u8) -> Self {
        Self::new(&[Command::Seek.opcode(), head_drive(head, drive), cylinder], 0, true)
    }

    /// Answers with ST0 and the present cylinder number
    pub fn sense_interrupt() -> Self {
        Self::new(&[Command::SenseInterrupt.opcode()], 2, false)
    }

    /// READ DATA / WRITE DATA starting at `chs`. With
    /// [`CommandMode::MULTITRACK`] the controller continues onto head 1, so
    /// one command can cover the rest of the cylinder
    pub fn data_transfer(command: Command, mode: CommandMode, drive: u8, chs: Chs, geometry: &Geometry) -> Self {
        Self::new(
            &[
                command.with_mode(mode),
                head_drive(chs.head, drive),
                chs.cylinder,
                chs.head,
                chs.sector,
                geometry.size_code(),
                // end of track
                geometry.sectors_per_track,
                geometry.gap_length,
                // data length, unused when the size code is non-zero
                0xFF,
            ],
            MAX_RESULT_LEN,
            true,
        )
    }

    /// FORMAT TRACK on the head the drive is positioned over. The sector ID
    /// table is supplied through DMA
    pub fn format_track(drive: u8, head: u8, geometry: &Geometry, fill: u8) -> Self {
        Self::new(
            &[
                Command::FormatTrack.with_mode(CommandMode::MFM),
                head_drive(head, drive),
                geometry.size_code(),
                geometry.sectors_per_track,
                geometry.format_gap_length,
                fill,
            ],
            MAX_RESULT_LEN,
            true,
        )
    }
}

const fn head_drive(head: u8, drive: u8) -> u8 {
    ((head & 1) << 2) | (drive & 0b11)
}

/// Drives the FIFO handshake. Holds nothing but the poll budget: framing is up
/// to the caller
#[derive(Debug, Clone, Copy)]
pub struct CommandEngine {
    poll_budget: u32,
}

impl CommandEngine {
    pub const fn new(poll_budget: u32) -> Self {
        Self { poll_budget }
    }

    fn status(ports: &mut impl PortIo) -> MainStatus {
        MainStatus::from_bits_retain(ports.read_port(MAIN_STATUS_REG))
    }

    /// Writes one command or parameter byte to the FIFO
    pub fn send_byte(&self, ports: &mut impl PortIo, byte: u8) -> FloppyResult<()> {
        let msr = Self::status(ports);

        if msr.contains(MainStatus::DATA_INPUT) {
            return Err(FloppyError::ProtocolViolation {
                expected: FifoDirection::HostToController,
                msr: msr.bits(),
            });
        }

        for _ in 0..self.poll_budget {
            let msr = Self::status(ports);

            if msr.contains(MainStatus::REQUEST_FOR_MASTER) {
                if msr.contains(MainStatus::DATA_INPUT) {
                    return Err(FloppyError::ProtocolViolation {
                        expected: FifoDirection::HostToController,
                        msr: msr.bits(),
                    });
                }

                ports.write_port(DATA_FIFO, byte);
                return Ok(());
            }
        }

        Err(FloppyError::TransientBusy {
            direction: FifoDirection::HostToController,
            polls: self.poll_budget,
        })
    }

    /// Reads one result byte from the FIFO
    pub fn read_byte(&self, ports: &mut impl PortIo) -> FloppyResult<u8> {
        for _ in 0..self.poll_budget {
            let msr = Self::status(ports);

            if msr.contains(MainStatus::REQUEST_FOR_MASTER) {
                if !msr.contains(MainStatus::DATA_INPUT) {
                    return Err(FloppyError::ProtocolViolation {
                        expected: FifoDirection::ControllerToHost,
                        msr: msr.bits(),
                    });
                }

                return Ok(ports.read_port(DATA_FIFO));
            }
        }

        Err(FloppyError::TransientBusy {
            direction: FifoDirection::ControllerToHost,
            polls: self.poll_budget,
        })
    }

    /// Sends every byte of `frame`, stopping at the first failure
    pub fn send(&self, ports: &mut impl PortIo, frame: &CommandFrame) -> FloppyResult<()> {
        frame
            .bytes()
            .iter()
            .try_for_each(|&byte| self.send_byte(ports, byte))
    }

    /// Reads the result phase of `frame`
    pub fn read_result(&self, ports: &mut impl PortIo, frame: &CommandFrame) -> FloppyResult<ResultBytes> {
        let mut result = ResultBytes::new();

        for _ in 0..frame.result_len().min(MAX_RESULT_LEN) {
            let byte = self.read_byte(ports)?;
            // capacity is MAX_RESULT_LEN and the loop never exceeds it
            let _ = result.push(byte);
        }

        Ok(result)
    }
}
