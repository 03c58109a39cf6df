//! Floppy drive detection through the CMOS configuration RAM

use core::fmt::{self, Display};

use crate::port::PortIo;

pub const CMOS_ADDRESS_PORT: u16 = 0x70;
pub const CMOS_DATA_PORT: u16 = 0x71;

/// Drive types of the primary (high nibble) and secondary (low nibble) drives
pub const CMOS_FLOPPY_TYPES: u8 = 0x10;

/// Keeps NMIs disabled while the address port is written
const NMI_DISABLE: u8 = 0x80;

/// Reads one register of the CMOS RAM
pub fn read_register(ports: &mut impl PortIo, register: u8) -> u8 {
    ports.write_port(CMOS_ADDRESS_PORT, NMI_DISABLE | (register & 0x7F));
    ports.read_port(CMOS_DATA_PORT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveType {
    None,
    Capacity360K,
    Capacity1200K,
    Capacity720K,
    Capacity1440K,
    Capacity2880K,
}

impl DriveType {
    pub fn from_cmos_value(value: u8) -> Self {
        match value {
            0 => DriveType::None,
            1 => DriveType::Capacity360K,
            2 => DriveType::Capacity1200K,
            3 => DriveType::Capacity720K,
            4 => DriveType::Capacity1440K,
            5 => DriveType::Capacity2880K,
            _ => {
                log::warn!("unknown floppy type {value} in CMOS");
                DriveType::None
            }
        }
    }

    pub fn is_present(self) -> bool {
        self != DriveType::None
    }

    /// Whether the driver's 1.44 MB format can be used with this drive
    pub fn supports_144(self) -> bool {
        matches!(self, DriveType::Capacity1440K | DriveType::Capacity2880K)
    }
}

impl Display for DriveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveType::None => f.write_str("not installed"),
            DriveType::Capacity360K => f.write_str("360 KB 5.25\""),
            DriveType::Capacity1200K => f.write_str("1.2 MB 5.25\""),
            DriveType::Capacity720K => f.write_str("720 KB 3.5\""),
            DriveType::Capacity1440K => f.write_str("1.44 MB 3.5\""),
            DriveType::Capacity2880K => f.write_str("2.88 MB 3.5\""),
        }
    }
}

/// Drive types of drives 0 and 1 as recorded by the firmware
pub fn detect_drives(ports: &mut impl PortIo) -> [DriveType; 2] {
    let value = read_register(ports, CMOS_FLOPPY_TYPES);

    [
        DriveType::from_cmos_value(value >> 4),
        DriveType::from_cmos_value(value & 0x0F),
    ]
}
