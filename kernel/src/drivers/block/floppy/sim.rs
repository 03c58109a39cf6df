//! A software model of an 82077AA with a 1.44 MB drive attached, used by the
//! driver tests. It speaks the FIFO protocol byte by byte, raises the IRQ
//! where real hardware would, and serves DMA transfers from an in-memory disk
//! image. Faults can be injected per test.

use std::{boxed::Box, collections::VecDeque, sync::Arc, vec::Vec};

use spin::Mutex;

use super::{
    FloppyConfig,
    controller::FloppyController,
    geometry::{Chs, Geometry},
    irq::IrqSignal,
    registers::{
        CONFIG_CONTROL_REG, DATA_FIFO, DIGITAL_OUTPUT_REG, DigitalOutput, INVALID_COMMAND_RESULT,
        MAIN_STATUS_REG,
    },
};
use crate::{
    cmos::{CMOS_ADDRESS_PORT, CMOS_DATA_PORT},
    dma::{DmaChannel, DmaDirection, DmaError},
    port::PortIo,
    time::Delay,
};

const GEOMETRY: Geometry = Geometry::FLOPPY_144;
const SECTOR: usize = 512;
const DMA_CAPACITY: usize = 36 * SECTOR;

struct SimState {
    irq: &'static IrqSignal,
    disk: Vec<u8>,
    cmos: [u8; 128],
    cmos_index: u8,

    dor: u8,
    input: Vec<u8>,
    results: VecDeque<u8>,
    senses: VecDeque<[u8; 2]>,
    cylinder: u8,
    version: u8,

    never_ready: bool,
    wrong_direction: bool,
    silent: bool,
    write_protected: bool,
    seek_misses: u32,
    recalibrate_misses: u32,
    transfer_failures: u32,

    dma_buffer: Vec<u8>,
    dma_armed: Option<(DmaDirection, usize)>,
    dma_arms: Vec<(DmaDirection, usize)>,

    commands: Vec<Vec<u8>>,
    dor_writes: Vec<u8>,
    data_rate_writes: Vec<u8>,
    fifo_writes: usize,
    resets: usize,
    delays: Vec<u32>,
}

/// Bytes in a command, keyed by the opcode without its mode bits
fn command_len(opcode: u8) -> usize {
    match opcode & 0x1F {
        0x03 => 3,
        0x04 | 0x07 => 2,
        0x05 | 0x06 => 9,
        0x0D => 6,
        0x0F => 3,
        0x13 => 4,
        _ => 1,
    }
}

impl SimState {
    fn new() -> Self {
        let mut cmos = [0u8; 128];
        // drive 0: 1.44 MB, drive 1: none
        cmos[0x10] = 0x40;

        Self {
            irq: Box::leak(Box::new(IrqSignal::new())),
            disk: vec![0; GEOMETRY.total_bytes()],
            cmos,
            cmos_index: 0,
            dor: 0,
            input: Vec::new(),
            results: VecDeque::new(),
            senses: VecDeque::new(),
            cylinder: 0,
            version: 0x90,
            never_ready: false,
            wrong_direction: false,
            silent: false,
            write_protected: false,
            seek_misses: 0,
            recalibrate_misses: 0,
            transfer_failures: 0,
            dma_buffer: vec![0; DMA_CAPACITY],
            dma_armed: None,
            dma_arms: Vec::new(),
            commands: Vec::new(),
            dor_writes: Vec::new(),
            data_rate_writes: Vec::new(),
            fifo_writes: 0,
            resets: 0,
            delays: Vec::new(),
        }
    }

    fn interrupt(&self) {
        if !self.silent {
            self.irq.raise();
        }
    }

    fn msr(&self) -> u8 {
        if self.never_ready {
            0x00
        } else if self.wrong_direction || !self.results.is_empty() {
            0xD0
        } else {
            0x80
        }
    }

    fn write_dor(&mut self, value: u8) {
        let reset_exit = self.dor & DigitalOutput::RESET.bits() == 0
            && value & DigitalOutput::RESET.bits() != 0;

        self.dor = value;
        self.dor_writes.push(value);

        if reset_exit {
            self.resets += 1;
            self.input.clear();
            self.results.clear();
            self.senses = (0..4).map(|drive| [0xC0 | drive, self.cylinder]).collect();
            self.interrupt();
        }
    }

    fn write_fifo(&mut self, byte: u8) {
        self.fifo_writes += 1;
        self.input.push(byte);

        if self.input.len() == command_len(self.input[0]) {
            let command = std::mem::take(&mut self.input);
            self.commands.push(command.clone());
            self.execute(&command);
        }
    }

    fn execute(&mut self, command: &[u8]) {
        match command[0] & 0x1F {
            0x03 | 0x13 => {}
            0x04 => {
                let mut st3 = 0x20 | 0x08 | (command[1] & 0x07);
                if self.cylinder == 0 {
                    st3 |= 0x10;
                }
                if self.write_protected {
                    st3 |= 0x40;
                }
                self.results.push_back(st3);
            }
            0x05 | 0x06 => self.data_transfer(command),
            0x07 => {
                // a stalled head stops short of track 0
                if self.recalibrate_misses > 0 {
                    self.recalibrate_misses -= 1;
                    self.cylinder = 3;
                } else {
                    self.cylinder = 0;
                }
                self.senses.push_back([0x20 | (command[1] & 0x03), self.cylinder]);
                self.interrupt();
            }
            0x08 => match self.senses.pop_front() {
                Some(sense) => self.results.extend(sense),
                None => self.results.push_back(INVALID_COMMAND_RESULT),
            },
            0x0D => self.format(command),
            0x0F => {
                let target = command[2];
                let st0 = 0x20 | (command[1] & 0x07);

                if self.seek_misses > 0 {
                    self.seek_misses -= 1;
                    self.senses.push_back([st0, target ^ 1]);
                } else {
                    self.cylinder = target;
                    self.senses.push_back([st0, target]);
                }
                self.interrupt();
            }
            0x10 => self.results.push_back(self.version),
            _ => self.results.push_back(INVALID_COMMAND_RESULT),
        }
    }

    fn finish(&mut self, st0: u8, st1: u8, st2: u8, chs: [u8; 3]) {
        self.results.extend([st0, st1, st2, chs[0], chs[1], chs[2], 2]);
        self.interrupt();
    }

    fn data_transfer(&mut self, command: &[u8]) {
        let write = command[0] & 0x1F == 0x05;
        let hd = command[1] & 0x07;
        let chs = [command[2], command[3], command[4]];

        let Some((_, len)) = self.dma_armed else {
            // nothing to feed the FIFO: overrun
            return self.finish(0x40 | hd, 0x10, 0, chs);
        };

        if write && self.write_protected {
            return self.finish(0x40 | hd, 0x02, 0, chs);
        }

        if self.transfer_failures > 0 {
            self.transfer_failures -= 1;
            return self.finish(0x40 | hd, 0x20, 0x20, chs);
        }

        let start = GEOMETRY.to_lba(Chs::new(chs[1], chs[0], chs[2])) as usize * SECTOR;
        let disk = &mut self.disk[start..start + len];
        let memory = &mut self.dma_buffer[..len];

        if write {
            disk.copy_from_slice(memory);
        } else {
            memory.copy_from_slice(disk);
        }

        self.finish(hd, 0, 0, chs);
    }

    fn format(&mut self, command: &[u8]) {
        let hd = command[1] & 0x07;
        let sectors = command[3] as usize;
        let fill = command[5];

        if self.write_protected {
            return self.finish(0x40 | hd, 0x02, 0, [self.cylinder, hd >> 2, 1]);
        }

        let ids: Vec<u8> = self.dma_buffer[..sectors * 4].to_vec();

        for id in ids.chunks(4) {
            let lba = GEOMETRY.to_lba(Chs::new(id[1], id[0], id[2])) as usize;
            self.disk[lba * SECTOR..(lba + 1) * SECTOR].fill(fill);
        }

        self.finish(hd, 0, 0, [self.cylinder, hd >> 2, 1]);
    }
}

pub struct SimPorts(Arc<Mutex<SimState>>);

impl PortIo for SimPorts {
    fn read_port(&mut self, port: u16) -> u8 {
        let mut state = self.0.lock();

        match port {
            MAIN_STATUS_REG => state.msr(),
            DATA_FIFO => state.results.pop_front().unwrap_or(0),
            CMOS_DATA_PORT => state.cmos[state.cmos_index as usize & 0x7F],
            _ => 0,
        }
    }

    fn write_port(&mut self, port: u16, value: u8) {
        let mut state = self.0.lock();

        match port {
            DIGITAL_OUTPUT_REG => state.write_dor(value),
            DATA_FIFO => state.write_fifo(value),
            CONFIG_CONTROL_REG => state.data_rate_writes.push(value),
            CMOS_ADDRESS_PORT => state.cmos_index = value,
            _ => {}
        }
    }
}

pub struct SimDelay(Arc<Mutex<SimState>>);

impl Delay for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.lock().delays.push(ms);
    }
}

pub struct SimDma(Arc<Mutex<SimState>>);

impl DmaChannel for SimDma {
    fn capacity(&self) -> usize {
        DMA_CAPACITY
    }

    fn arm_read(&mut self, len: usize) -> Result<(), DmaError> {
        check_len(len)?;

        let mut state = self.0.lock();
        state.dma_armed = Some((DmaDirection::DeviceToMemory, len));
        state.dma_arms.push((DmaDirection::DeviceToMemory, len));
        Ok(())
    }

    fn arm_write(&mut self, data: &[u8]) -> Result<(), DmaError> {
        check_len(data.len())?;

        let mut state = self.0.lock();
        state.dma_buffer[..data.len()].copy_from_slice(data);
        state.dma_armed = Some((DmaDirection::MemoryToDevice, data.len()));
        state.dma_arms.push((DmaDirection::MemoryToDevice, data.len()));
        Ok(())
    }

    fn collect(&mut self, out: &mut [u8]) {
        let state = self.0.lock();
        out.copy_from_slice(&state.dma_buffer[..out.len()]);
    }

    fn disarm(&mut self) {
        self.0.lock().dma_armed = None;
    }
}

fn check_len(len: usize) -> Result<(), DmaError> {
    match len {
        0 => Err(DmaError::Empty),
        len if len > DMA_CAPACITY => Err(DmaError::TooLarge {
            len,
            capacity: DMA_CAPACITY,
        }),
        _ => Ok(()),
    }
}

pub type SimController = FloppyController<SimPorts, SimDelay, SimDma>;

/// Test-side handle on the simulated hardware
#[derive(Clone)]
pub struct SimulatedFloppy(Arc<Mutex<SimState>>);

impl SimulatedFloppy {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(SimState::new())))
    }

    pub fn ports(&self) -> SimPorts {
        SimPorts(self.0.clone())
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay(self.0.clone())
    }

    pub fn dma(&self) -> SimDma {
        SimDma(self.0.clone())
    }

    pub fn irq(&self) -> &'static IrqSignal {
        self.0.lock().irq
    }

    /// A controller for drive 0 wired to this simulation
    pub fn controller(&self, config: FloppyConfig) -> SimController {
        FloppyController::new(self.ports(), self.delay(), self.dma(), self.irq(), 0, config)
    }

    pub fn fill_disk(&self, sector: impl Fn(u32) -> [u8; SECTOR]) {
        let mut state = self.0.lock();
        for (lba, chunk) in state.disk.chunks_mut(SECTOR).enumerate() {
            chunk.copy_from_slice(&sector(lba as u32));
        }
    }

    pub fn sector(&self, lba: u32) -> [u8; SECTOR] {
        let state = self.0.lock();
        let start = lba as usize * SECTOR;
        let mut sector = [0; SECTOR];
        sector.copy_from_slice(&state.disk[start..start + SECTOR]);
        sector
    }

    pub fn set_cmos(&self, register: u8, value: u8) {
        self.0.lock().cmos[register as usize & 0x7F] = value;
    }

    pub fn set_version(&self, version: u8) {
        self.0.lock().version = version;
    }

    /// The next `count` seeks report the head on the wrong cylinder
    pub fn miss_seeks(&self, count: u32) {
        self.0.lock().seek_misses = count;
    }

    /// The next `count` recalibrates leave the head on cylinder 3
    pub fn miss_recalibrates(&self, count: u32) {
        self.0.lock().recalibrate_misses = count;
    }

    /// The next `count` data transfers end with a CRC error
    pub fn fail_transfers(&self, count: u32) {
        self.0.lock().transfer_failures = count;
    }

    pub fn set_write_protected(&self, protected: bool) {
        self.0.lock().write_protected = protected;
    }

    /// Stops raising interrupts
    pub fn set_silent(&self, silent: bool) {
        self.0.lock().silent = silent;
    }

    /// The main status register never reports ready again
    pub fn set_never_ready(&self, never_ready: bool) {
        self.0.lock().never_ready = never_ready;
    }

    /// The main status register asks the host to read while nothing has been
    /// sent
    pub fn set_wrong_direction(&self, wrong_direction: bool) {
        self.0.lock().wrong_direction = wrong_direction;
    }

    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.0.lock().commands.clone()
    }

    pub fn dor_writes(&self) -> Vec<u8> {
        self.0.lock().dor_writes.clone()
    }

    pub fn data_rate_writes(&self) -> Vec<u8> {
        self.0.lock().data_rate_writes.clone()
    }

    pub fn delays(&self) -> Vec<u32> {
        self.0.lock().delays.clone()
    }

    pub fn fifo_writes(&self) -> usize {
        self.0.lock().fifo_writes
    }

    pub fn resets(&self) -> usize {
        self.0.lock().resets
    }

    pub fn dma_arms(&self) -> Vec<(DmaDirection, usize)> {
        self.0.lock().dma_arms.clone()
    }

    pub fn dma_armed(&self) -> bool {
        self.0.lock().dma_armed.is_some()
    }

    pub fn cylinder(&self) -> u8 {
        self.0.lock().cylinder
    }
}
