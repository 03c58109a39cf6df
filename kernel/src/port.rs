//! Byte-wide x86 port I/O. Every hardware access made by the drivers in this
//! crate goes through [`PortIo`], which is what lets the floppy controller be
//! driven by a simulated device in tests.

use x86_64::instructions::port::Port;

pub trait PortIo {
    /// Reads one byte from an I/O port
    fn read_port(&mut self, port: u16) -> u8;

    /// Writes one byte to an I/O port
    fn write_port(&mut self, port: u16, value: u8);
}

/// Real port I/O using the `in`/`out` instructions
#[derive(Debug)]
pub struct X86Ports(());

impl X86Ports {
    /// Callers must ensure that the ports touched through this handle belong
    /// to the driver that owns it, and that the code is running in ring 0
    pub unsafe fn new() -> Self {
        Self(())
    }
}

impl PortIo for X86Ports {
    fn read_port(&mut self, port: u16) -> u8 {
        let mut port = Port::<u8>::new(port);
        unsafe { port.read() }
    }

    fn write_port(&mut self, port: u16, value: u8) {
        let mut port = Port::<u8>::new(port);
        unsafe { port.write(value) }
    }
}

impl<T: PortIo + ?Sized> PortIo for &mut T {
    fn read_port(&mut self, port: u16) -> u8 {
        (**self).read_port(port)
    }

    fn write_port(&mut self, port: u16, value: u8) {
        (**self).write_port(port, value)
    }
}
