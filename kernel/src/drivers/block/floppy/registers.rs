//! Port map, register bits and command opcodes of the primary NEC 765 /
//! Intel 82077AA compatible floppy controller.

use bitflags::bitflags;

/// Read-only
pub const STATUS_REG_A: u16 = 0x3F0;
/// Read-only
pub const STATUS_REG_B: u16 = 0x3F1;
/// Digital output register. Reads are unreliable on some chipsets, so the
/// driver keeps a shadow copy of everything it writes here
pub const DIGITAL_OUTPUT_REG: u16 = 0x3F2;
pub const TAPE_DRIVE_REG: u16 = 0x3F3;
/// Main status register on read
pub const MAIN_STATUS_REG: u16 = 0x3F4;
/// Data rate select register on write
pub const DATARATE_SELECT_REG: u16 = 0x3F4;
/// The command/parameter/result FIFO
pub const DATA_FIFO: u16 = 0x3F5;
/// Digital input register on read
pub const DIGITAL_INPUT_REG: u16 = 0x3F7;
/// Configuration control register on write
pub const CONFIG_CONTROL_REG: u16 = 0x3F7;

pub const FLOPPY_DMA_CHANNEL: u8 = 2;
pub const FLOPPY_IRQ_LINE: u8 = 6;

/// Read from the FIFO after an invalid command was written
pub const INVALID_COMMAND_RESULT: u8 = 0x80;

/// The value returned by VERSION on an 82077AA or later
pub const VERSION_82077AA: u8 = 0x90;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DigitalOutput: u8 {
        const SELECT_MASK = 0b0000_0011;
        /// Clear to hold the controller in reset, set to run it
        const RESET = 0b0000_0100;
        /// Routes the controller's DMA and IRQ lines to the bus
        const DMA_GATE = 0b0000_1000;
        const MOTOR_0 = 0b0001_0000;
        const MOTOR_1 = 0b0010_0000;
        const MOTOR_2 = 0b0100_0000;
        const MOTOR_3 = 0b1000_0000;
        const MOTOR_MASK = 0b1111_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MainStatus: u8 {
        /// Drive 0 is seeking or recalibrating
        const DRIVE_0_BUSY = 0x01;
        const DRIVE_1_BUSY = 0x02;
        const DRIVE_2_BUSY = 0x04;
        const DRIVE_3_BUSY = 0x08;
        /// A command is in progress
        const COMMAND_BUSY = 0x10;
        const NON_DMA = 0x20;
        /// Only meaningful with `REQUEST_FOR_MASTER`: set when the controller
        /// has a byte for the host, clear when it expects one
        const DATA_INPUT = 0x40;
        /// The FIFO is ready to exchange a byte with the host
        const REQUEST_FOR_MASTER = 0x80;
    }
}

/// Powers the chip down until the next reset
pub const DSR_POWER_DOWN: u8 = 0x40;
/// Self-clearing software reset
pub const DSR_RESET: u8 = 0x80;

/// Transfer rates accepted by the data rate select and configuration control
/// registers. 1.44 MB media runs at 500 kbps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataRate {
    Kbps500 = 0x00,
    Kbps300 = 0x01,
    Kbps250 = 0x02,
    Mbps1 = 0x03,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct St0: u8 {
        const DRIVE_MASK = 0b0000_0011;
        const HEAD = 0b0000_0100;
        const NOT_READY = 0b0000_1000;
        const EQUIPMENT_CHECK = 0b0001_0000;
        const SEEK_END = 0b0010_0000;
        const INTERRUPT_CODE_MASK = 0b1100_0000;
        const ABNORMAL_TERMINATION = 0b0100_0000;
        const INVALID_COMMAND = 0b1000_0000;
        /// Ready line changed, reported once per drive after a reset
        const READY_CHANGED = 0b1100_0000;
    }
}

impl St0 {
    pub fn interrupt_code(self) -> InterruptCode {
        match (self & St0::INTERRUPT_CODE_MASK).bits() {
            0x00 => InterruptCode::Normal,
            0x40 => InterruptCode::Abnormal,
            0x80 => InterruptCode::InvalidCommand,
            _ => InterruptCode::ReadyChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCode {
    Normal,
    Abnormal,
    InvalidCommand,
    ReadyChanged,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct St1: u8 {
        const MISSING_ADDRESS_MARK = 0x01;
        const NOT_WRITABLE = 0x02;
        const NO_DATA = 0x04;
        const OVERRUN = 0x10;
        /// CRC error in the ID or data field
        const DATA_ERROR = 0x20;
        const END_OF_CYLINDER = 0x80;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct St2: u8 {
        const MISSING_DATA_MARK = 0x01;
        const BAD_CYLINDER = 0x02;
        const WRONG_CYLINDER = 0x10;
        /// CRC error in the data field
        const DATA_ERROR_IN_FIELD = 0x20;
        const CONTROL_MARK = 0x40;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct St3: u8 {
        const DRIVE_MASK = 0b0000_0011;
        const HEAD = 0b0000_0100;
        const TWO_SIDED = 0b0000_1000;
        const TRACK_0 = 0b0001_0000;
        const READY = 0b0010_0000;
        const WRITE_PROTECTED = 0b0100_0000;
        const FAULT = 0b1000_0000;
    }
}

bitflags! {
    /// Modifier bits OR'd into the data transfer opcodes
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandMode: u8 {
        const SKIP_DELETED = 0x20;
        /// MFM encoding, required for anything denser than 360K
        const MFM = 0x40;
        /// Continue onto head 1 once the end of the track on head 0 is reached
        const MULTITRACK = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    ReadTrack = 0x02,
    Specify = 0x03,
    DriveStatus = 0x04,
    WriteData = 0x05,
    ReadData = 0x06,
    Recalibrate = 0x07,
    SenseInterrupt = 0x08,
    WriteDeletedData = 0x09,
    ReadId = 0x0A,
    ReadDeletedData = 0x0C,
    FormatTrack = 0x0D,
    Seek = 0x0F,
    Version = 0x10,
    PerpendicularMode = 0x12,
    Configure = 0x13,
    Lock = 0x14,
    Verify = 0x16,
}

impl Command {
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// Opcode with mode bits applied. Only the data transfer commands accept
    /// mode bits, the others ignore `mode`
    pub fn with_mode(self, mode: CommandMode) -> u8 {
        match self {
            Command::ReadTrack
            | Command::ReadData
            | Command::WriteData
            | Command::ReadDeletedData
            | Command::WriteDeletedData
            | Command::Verify => self.opcode() | mode.bits(),
            Command::FormatTrack | Command::ReadId => {
                self.opcode() | (mode & CommandMode::MFM).bits()
            }
            _ => self.opcode(),
        }
    }
}

/// Selects the motor bit in the DOR belonging to a drive
pub fn motor_bit(drive: u8) -> DigitalOutput {
    DigitalOutput::from_bits_truncate(DigitalOutput::MOTOR_0.bits() << (drive & 0b11))
}
