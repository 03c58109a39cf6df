//! IDT and 8259 PIC setup for the floppy controller's IRQ6. Only built into
//! the kernel image

use pic8259::ChainedPics;
use spin::Mutex;
use static_cell::StaticCell;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

use crate::drivers::block::floppy::{irq::FLOPPY_IRQ, registers::FLOPPY_IRQ_LINE};

/// Initializes the Interrupt Descriptor Table (IDT) with the floppy handler.
/// Must only be called once during initialization to prevent a panic.
pub fn init_idt() {
    static IDT: StaticCell<InterruptDescriptorTable> = StaticCell::new();

    let idt = IDT
        .try_init(InterruptDescriptorTable::new())
        .expect("Tried to initialize IDT more than once");

    idt[InterruptIndex::Floppy.as_u8()].set_handler_fn(floppy_interrupt_handler);

    idt.load();
}

const PIC_1_OFFSET: u8 = 32;
const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// Slave PIC cascade line on the master
const CASCADE_LINE: u8 = 2;

/// Master lines left unmasked: the floppy controller and the cascade
const MASTER_MASK: u8 = !((1 << FLOPPY_IRQ_LINE) | (1 << CASCADE_LINE));

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Initializes the hardware Programmable Interrupt Controllers (PICs) to remap
/// the interrupt vector numbers into a valid range, then masks every line but
/// the floppy controller's. Should only be called once during initialization.
pub fn init_pics() {
    let mut pics = PICS.lock();

    unsafe {
        pics.initialize();
        pics.write_masks(MASTER_MASK, 0xFF);
    }
}

unsafe fn acknowledge_interrupt(index: InterruptIndex) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(index.as_u8());
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Floppy = PIC_1_OFFSET + FLOPPY_IRQ_LINE,
}

impl InterruptIndex {
    fn as_u8(self) -> u8 {
        self as _
    }
}

/// Only flags the interrupt. Sensing and retrying happen in the waiting
/// context
extern "x86-interrupt" fn floppy_interrupt_handler(_stack_frame: InterruptStackFrame) {
    FLOPPY_IRQ.raise();

    unsafe { acknowledge_interrupt(InterruptIndex::Floppy) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floppy_vector_follows_the_remapped_master() {
        assert_eq!(InterruptIndex::Floppy.as_u8(), 38);
    }

    #[test]
    fn only_irq6_and_the_cascade_are_unmasked() {
        assert_eq!(MASTER_MASK, 0b1011_1011);
    }
}
