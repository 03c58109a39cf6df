//! Driver for the PC floppy disk controller (NEC 765 / Intel 82077AA) and the
//! pieces of kernel plumbing it needs: port I/O, ISA DMA, CMOS drive
//! detection, a block-device registry and a serial logger.
//!
//! Everything except the interrupt wiring builds on the host, where the
//! controller is exercised against a simulated device.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "kernel-image", feature(abi_x86_interrupt))]

extern crate alloc;

pub mod cmos;
pub mod device;
pub mod dma;
pub mod drivers;
#[cfg(feature = "kernel-image")]
pub mod interrupts;
pub mod logger;
pub mod port;
pub mod time;
pub mod util;
