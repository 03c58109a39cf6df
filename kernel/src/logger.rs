//! `log` backend writing to the first serial port

use core::fmt::{self, Write};

use lazy_static::lazy_static;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;
use uart_16550::SerialPort;

const COM1_BASE: u16 = 0x3F8;

lazy_static! {
    static ref COM1: Mutex<SerialPort> = {
        let mut serial_port = unsafe { SerialPort::new(COM1_BASE) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // an interrupt handler must never find COM1 locked
        x86_64::instructions::interrupts::without_interrupts(|| {
            // nowhere to report a failing serial port
            let _ = write_record(&mut *COM1.lock(), record);
        });
    }

    fn flush(&self) {}
}

/// Formats one record as a `[LEVEL target] message` line
pub fn write_record(out: &mut impl Write, record: &Record) -> fmt::Result {
    writeln!(out, "[{:<5} {}] {}", record.level(), record.target(), record.args())
}

/// Installs the serial logger. Fails if a logger is already installed
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn record_lines() {
        let mut out = String::new();

        write_record(
            &mut out,
            &Record::builder()
                .args(format_args!("seek to cylinder {} missed", 5))
                .level(Level::Warn)
                .target("riptide_fdc::floppy")
                .build(),
        )
        .unwrap();

        assert_eq!(out, "[WARN  riptide_fdc::floppy] seek to cylinder 5 missed\n");
    }
}
