//! The request state machine which turns block reads and writes into
//! controller commands.
//!
//! A request walks through
//!
//! ```text
//! Idle -> Selecting -> MotorSpinUp -> Seeking -> Transferring -> SenseStatus
//!      -> Done | Retrying -> Seeking | RecalibrateFailed
//!      -> MotorSpinDown -> Idle
//! ```
//!
//! Only one request may be in flight per controller; this is enforced by
//! every entry point taking `&mut self`. Wrappers that share a controller
//! (see [`FloppyDisk`](super::FloppyDisk)) have to serialize on their side.

use alloc::{sync::Arc, vec::Vec};
use core::ops::Range;

use heapless::Deque;

use super::{
    command::{CommandEngine, CommandFrame, ResultBytes},
    config::FloppyConfig,
    context::ControllerContext,
    error::{FloppyError, FloppyResult},
    geometry::Chs,
    irq::IrqSignal,
    motor::MotorWait,
    registers::{
        CONFIG_CONTROL_REG, Command, CommandMode, INVALID_COMMAND_RESULT, InterruptCode, St0, St1,
        St3, VERSION_82077AA,
    },
};
use crate::{
    dma::{DmaChannel, DmaDirection},
    port::PortIo,
    time::Delay,
    util::cancel::CancelToken,
};

const HISTORY_LEN: usize = 32;

/// Number of drive slots the controller reports on after a reset
const RESET_SENSE_COUNT: usize = 4;

/// Byte written into every sector by FORMAT TRACK
const FORMAT_FILL_BYTE: u8 = 0xF6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Selecting,
    MotorSpinUp,
    Seeking,
    Transferring,
    SenseStatus,
    Retrying,
    RecalibrateFailed,
    Done,
    MotorSpinDown,
}

/// The caller's side of one transfer: where the data lives and which way it
/// flows. The buffer is only borrowed for the duration of the request
#[derive(Debug)]
pub enum TransferBuffer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl TransferBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            TransferBuffer::Read(buf) => buf.len(),
            TransferBuffer::Write(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn direction(&self) -> DmaDirection {
        match self {
            TransferBuffer::Read(_) => DmaDirection::DeviceToMemory,
            TransferBuffer::Write(_) => DmaDirection::MemoryToDevice,
        }
    }

    fn slice(&mut self, range: Range<usize>) -> TransferBuffer<'_> {
        match self {
            TransferBuffer::Read(buf) => TransferBuffer::Read(&mut buf[range]),
            TransferBuffer::Write(buf) => TransferBuffer::Write(&buf[range]),
        }
    }
}

#[derive(Debug)]
pub struct TransferRequest<'a> {
    pub lba: u32,
    pub buffer: TransferBuffer<'a>,
}

impl<'a> TransferRequest<'a> {
    pub fn read(lba: u32, buffer: &'a mut [u8]) -> Self {
        Self {
            lba,
            buffer: TransferBuffer::Read(buffer),
        }
    }

    pub fn write(lba: u32, buffer: &'a [u8]) -> Self {
        Self {
            lba,
            buffer: TransferBuffer::Write(buffer),
        }
    }
}

/// What the result phase of a data command said
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Complete,
    WriteProtected,
    /// CRC error, overrun, missing address mark or sector not found
    DataError { st0: u8, st1: u8, st2: u8 },
    /// The controller didn't accept the command
    Rejected,
}

impl TransferStatus {
    /// Interprets the ST0/ST1/ST2 bytes of a read, write or format result
    pub fn from_result(result: &[u8]) -> Self {
        let &[st0, st1, st2, ..] = result else {
            return TransferStatus::Rejected;
        };

        let status0 = St0::from_bits_retain(st0);
        let status1 = St1::from_bits_retain(st1);

        match status0.interrupt_code() {
            InterruptCode::Normal => TransferStatus::Complete,
            InterruptCode::InvalidCommand => TransferStatus::Rejected,
            _ if status1.contains(St1::NOT_WRITABLE) => TransferStatus::WriteProtected,
            // running into the end of the cylinder without any other error
            // just means the command ran until EOT
            _ if status1 == St1::END_OF_CYLINDER && st2 == 0 => TransferStatus::Complete,
            _ => TransferStatus::DataError { st0, st1, st2 },
        }
    }
}

pub struct FloppyController<P: PortIo, D: Delay, M: DmaChannel> {
    ports: P,
    delay: D,
    dma: M,
    ctx: ControllerContext,
    engine: CommandEngine,
    config: FloppyConfig,
    cancel: Arc<CancelToken>,
    state: TransferState,
    history: Deque<TransferState, HISTORY_LEN>,
}

impl<P: PortIo, D: Delay, M: DmaChannel> FloppyController<P, D, M> {
    /// `irq` has to be the signal raised by this controller's interrupt
    /// handler. Nothing is sent to the hardware until the first request or
    /// [`init`](Self::init)
    pub fn new(ports: P, delay: D, dma: M, irq: &'static IrqSignal, drive: u8, config: FloppyConfig) -> Self {
        Self {
            ports,
            delay,
            dma,
            ctx: ControllerContext::new(irq, drive),
            engine: CommandEngine::new(config.poll_budget),
            config,
            cancel: Arc::new(CancelToken::new()),
            state: TransferState::Idle,
            history: Deque::new(),
        }
    }

    pub fn config(&self) -> &FloppyConfig {
        &self.config
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    /// Points the following requests at another drive on the same controller
    pub fn set_drive(&mut self, drive: u8) {
        if drive & 0b11 != self.ctx.drive() {
            log::debug!("fdc: switching from drive {} to {}", self.ctx.drive(), drive & 0b11);
            self.ctx.set_drive(drive);
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// The most recent states, oldest first
    pub fn recent_states(&self) -> impl Iterator<Item = TransferState> + '_ {
        self.history.iter().copied()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// A handle which aborts the current interrupt wait when canceled. The
    /// token is cleared at the start of every request
    pub fn cancel_token(&self) -> Arc<CancelToken> {
        self.cancel.clone()
    }

    fn transition(&mut self, next: TransferState) {
        log::trace!("fd{}: {:?} -> {:?}", self.ctx.drive(), self.state, next);

        self.state = next;

        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(next);
    }

    /// Single reporting path for hardware faults
    fn fault(&mut self, err: FloppyError) -> FloppyError {
        if err.requires_reset() {
            self.ctx.set_needs_reset(true);
        }

        log::error!("fd{}: {} (in state {:?})", self.ctx.drive(), err, self.state);

        err
    }

    fn wait_for_interrupt(&mut self) -> FloppyResult<()> {
        let timeout_ms = self.config.irq_timeout_ms;
        self.ctx.irq().wait(&mut self.delay, timeout_ms, &self.cancel)
    }

    /// Sends `frame`, waits for its interrupt if it raises one, then reads its
    /// result phase
    fn command(&mut self, frame: &CommandFrame) -> FloppyResult<ResultBytes> {
        if frame.interrupts() {
            self.ctx.irq().arm();
        }

        if let Err(err) = self.engine.send(&mut self.ports, frame) {
            self.ctx.irq().disarm();
            return Err(err);
        }

        if frame.interrupts() {
            self.wait_for_interrupt()?;
        }

        self.engine.read_result(&mut self.ports, frame)
    }

    /// Acknowledges the last interrupt. Returns ST0 and the cylinder the head
    /// is on. With no interrupt pending the controller answers with a lone
    /// invalid-command byte, so ST0 is checked before the cylinder is read
    fn sense_interrupt(&mut self) -> FloppyResult<(St0, u8)> {
        let frame = CommandFrame::sense_interrupt();
        self.engine.send(&mut self.ports, &frame)?;

        let st0 = self.engine.read_byte(&mut self.ports)?;

        if st0 == INVALID_COMMAND_RESULT {
            return Err(FloppyError::InvalidCommand {
                opcode: frame.opcode(),
            });
        }

        let cylinder = self.engine.read_byte(&mut self.ports)?;

        Ok((St0::from_bits_retain(st0), cylinder))
    }

    /// Resets the controller and programs data rate and drive timings. Needed
    /// once before first use and after any fault that left the command
    /// protocol in an unknown state
    pub fn reset(&mut self) -> FloppyResult<()> {
        self.reset_controller().map_err(|err| self.fault(err))
    }

    fn reset_controller(&mut self) -> FloppyResult<()> {
        log::debug!("fd{}: resetting controller", self.ctx.drive());

        self.ctx.disable(&mut self.ports);
        self.delay.delay_ms(1);
        self.ctx.enable(&mut self.ports);
        self.wait_for_interrupt()?;

        for _ in 0..RESET_SENSE_COUNT {
            self.sense_interrupt()?;
        }

        self.ports
            .write_port(CONFIG_CONTROL_REG, self.config.data_rate as u8);

        let specify = CommandFrame::specify(
            self.config.step_rate,
            self.config.head_unload_time,
            self.config.head_load_time,
        );
        self.command(&specify)?;

        self.ctx.set_needs_reset(false);

        Ok(())
    }

    /// Brings the controller up: reset, version probe, CONFIGURE on parts that
    /// support it, and a recalibration of the drive
    pub fn init(&mut self) -> FloppyResult<()> {
        self.cancel.reset();
        self.reset()?;

        let version = self
            .command(&CommandFrame::version())
            .map_err(|err| self.fault(err))?
            .first()
            .copied()
            .unwrap_or_default();

        if version == VERSION_82077AA {
            let configure = CommandFrame::configure(self.config.fifo_threshold);
            self.command(&configure).map_err(|err| self.fault(err))?;
        } else {
            log::warn!(
                "fd{}: controller version {:#04x} is not an 82077AA, skipping CONFIGURE",
                self.ctx.drive(),
                version
            );
        }

        self.recalibrate()?;

        log::info!("fd{}: controller ready (version {:#04x})", self.ctx.drive(), version);

        Ok(())
    }

    /// Moves the head back to cylinder 0
    pub fn recalibrate(&mut self) -> FloppyResult<()> {
        self.with_motor(|this| this.recalibrate_head())
    }

    /// Recalibrates until the drive reports track 0. Drives with more
    /// cylinders than the controller steps in one go need more than one round
    fn recalibrate_head(&mut self) -> FloppyResult<()> {
        let budget = self.config.recalibrate_retries.max(1);

        for attempt in 1..=budget {
            if self.recalibrate_once()? {
                return Ok(());
            }

            log::warn!(
                "fd{}: recalibrate did not reach track 0 (attempt {}/{})",
                self.ctx.drive(),
                attempt,
                budget
            );
        }

        Err(FloppyError::SeekFailure {
            cylinder: 0,
            attempts: budget,
        })
    }

    fn recalibrate_once(&mut self) -> FloppyResult<bool> {
        self.command(&CommandFrame::recalibrate(self.ctx.drive()))?;
        let (st0, cylinder) = self.sense_interrupt()?;

        Ok(st0.contains(St0::SEEK_END) && cylinder == 0)
    }

    /// Positions the head over `cylinder`, recalibrating after every miss
    fn seek(&mut self, cylinder: u8, head: u8) -> FloppyResult<()> {
        let budget = self.config.recalibrate_retries;
        let drive = self.ctx.drive();

        for attempt in 1..=budget {
            self.transition(TransferState::Seeking);

            self.command(&CommandFrame::seek(drive, head, cylinder))?;
            let (st0, landed) = self.sense_interrupt()?;

            if st0.contains(St0::SEEK_END)
                && st0.interrupt_code() == InterruptCode::Normal
                && landed == cylinder
            {
                return Ok(());
            }

            log::warn!(
                "fd{}: seek to cylinder {} ended on {} (st0 {:#04x}, attempt {}/{})",
                drive,
                cylinder,
                landed,
                st0.bits(),
                attempt,
                budget
            );

            if attempt < budget {
                self.transition(TransferState::Retrying);
                self.recalibrate_once()?;
            }
        }

        self.transition(TransferState::RecalibrateFailed);

        Err(FloppyError::SeekFailure {
            cylinder,
            attempts: budget,
        })
    }

    /// Selecting state: resets the controller when needed, otherwise just
    /// points the DOR at our drive
    fn select_drive(&mut self) -> FloppyResult<()> {
        self.transition(TransferState::Selecting);

        if self.ctx.needs_reset() {
            self.reset_controller()
        } else {
            self.ctx.select(&mut self.ports);
            Ok(())
        }
    }

    /// Runs `f` with the drive selected and its motor spinning. The motor is
    /// switched off again however `f` ends
    fn with_motor<T>(&mut self, f: impl FnOnce(&mut Self) -> FloppyResult<T>) -> FloppyResult<T> {
        self.cancel.reset();

        if let Err(err) = self.select_drive() {
            self.transition(TransferState::Idle);
            return Err(self.fault(err));
        }

        self.transition(TransferState::MotorSpinUp);
        let spin_up_ms = self.config.motor_spin_up_ms;
        self.ctx
            .motor_on(&mut self.ports, &mut self.delay, MotorWait::WaitForSpin, spin_up_ms);

        let mut this = scopeguard::guard(self, |this| {
            this.transition(TransferState::MotorSpinDown);
            let spin_down_ms = this.config.motor_spin_down_ms;
            this.ctx
                .motor_off(&mut this.ports, &mut this.delay, MotorWait::WaitForSpin, spin_down_ms);
            this.transition(TransferState::Idle);
        });

        match f(&mut **this) {
            Ok(value) => {
                this.transition(TransferState::Done);
                Ok(value)
            }
            Err(err) => Err(this.fault(err)),
        }
    }

    fn validate(&self, request: &TransferRequest<'_>) -> FloppyResult<u32> {
        let geometry = &self.config.geometry;
        let len = request.buffer.len();

        if len == 0 || len % geometry.sector_size != 0 {
            return Err(FloppyError::InvalidBuffer { len });
        }

        let count = (len / geometry.sector_size) as u32;

        let in_range = request
            .lba
            .checked_add(count)
            .is_some_and(|end| end <= geometry.total_sectors());

        if !in_range {
            return Err(FloppyError::OutOfRange {
                lba: request.lba,
                count,
            });
        }

        Ok(count)
    }

    /// Reads `buffer.len() / sector_size` sectors starting at `lba`
    pub fn read_sectors(&mut self, lba: u32, buffer: &mut [u8]) -> FloppyResult<()> {
        self.execute(TransferRequest::read(lba, buffer))
    }

    /// Writes `buffer.len() / sector_size` sectors starting at `lba`
    pub fn write_sectors(&mut self, lba: u32, buffer: &[u8]) -> FloppyResult<()> {
        self.execute(TransferRequest::write(lba, buffer))
    }

    /// Runs one request to completion. The request is split into pieces that
    /// each stay within one cylinder and fit the DMA channel
    pub fn execute(&mut self, mut request: TransferRequest<'_>) -> FloppyResult<()> {
        let count = self.validate(&request)?;

        self.with_motor(|this| {
            let geometry = this.config.geometry;
            let sector_size = geometry.sector_size;
            let max_sectors = (this.dma.capacity() / sector_size).max(1) as u32;

            let mut done = 0;

            while done < count {
                let lba = request.lba + done;
                let chs = geometry
                    .translate(lba)
                    .ok_or(FloppyError::OutOfRange { lba, count })?;

                let sectors = (count - done)
                    .min(geometry.sectors_left_in_cylinder(chs))
                    .min(max_sectors);

                let start = done as usize * sector_size;
                let end = start + sectors as usize * sector_size;

                let command = match request.buffer {
                    TransferBuffer::Read(_) => Command::ReadData,
                    TransferBuffer::Write(_) => Command::WriteData,
                };
                let frame = CommandFrame::data_transfer(
                    command,
                    CommandMode::MULTITRACK | CommandMode::MFM,
                    this.ctx.drive(),
                    chs,
                    &geometry,
                );

                this.transfer_with_retries(lba, chs, &frame, request.buffer.slice(start..end))?;

                done += sectors;
            }

            Ok(())
        })
    }

    /// Formats one track, filling every sector with 0xF6
    pub fn format_track(&mut self, cylinder: u8, head: u8) -> FloppyResult<()> {
        let geometry = self.config.geometry;

        if cylinder >= geometry.cylinders || head >= geometry.heads {
            let chs = Chs::new(head.min(geometry.heads - 1), cylinder.min(geometry.cylinders - 1), 1);
            return Err(FloppyError::OutOfRange {
                lba: geometry.to_lba(chs),
                count: geometry.sectors_per_track as u32,
            });
        }

        // one (C, H, R, N) entry per sector, handed to the controller by DMA
        let ids: Vec<u8> = (1..=geometry.sectors_per_track)
            .flat_map(|sector| [cylinder, head, sector, geometry.size_code()])
            .collect();

        let chs = Chs::new(head, cylinder, 1);
        let frame = CommandFrame::format_track(self.ctx.drive(), head, &geometry, FORMAT_FILL_BYTE);

        self.with_motor(|this| {
            this.transfer_with_retries(geometry.to_lba(chs), chs, &frame, TransferBuffer::Write(&ids[..]))
        })
    }

    /// Seeks, transfers and checks the result, starting over from the seek
    /// while the controller reports data errors and the retry budget lasts
    fn transfer_with_retries(
        &mut self,
        lba: u32,
        chs: Chs,
        frame: &CommandFrame,
        mut buffer: TransferBuffer<'_>,
    ) -> FloppyResult<()> {
        let budget = self.config.transfer_retries.max(1);
        let mut attempt = 1;

        loop {
            self.seek(chs.cylinder, chs.head)?;

            match self.dma_command(frame, &mut buffer)? {
                TransferStatus::Complete => return Ok(()),
                TransferStatus::WriteProtected => return Err(FloppyError::WriteProtected),
                TransferStatus::Rejected => {
                    return Err(FloppyError::InvalidCommand {
                        opcode: frame.opcode(),
                    });
                }
                TransferStatus::DataError { st0, st1, st2 } if attempt >= budget => {
                    return Err(FloppyError::DataError { lba, st0, st1, st2 });
                }
                TransferStatus::DataError { st1, st2, .. } => {
                    log::warn!(
                        "fd{}: data error at block {} (st1 {:#04x}, st2 {:#04x}), retrying {}/{}",
                        self.ctx.drive(),
                        lba,
                        st1,
                        st2,
                        attempt,
                        budget
                    );
                    self.transition(TransferState::Retrying);
                    attempt += 1;
                }
            }
        }
    }

    /// Transferring and SenseStatus: arms DMA for `buffer`, runs `frame` and
    /// interprets its result. The DMA channel is released again before
    /// returning, whatever happened
    fn dma_command(&mut self, frame: &CommandFrame, buffer: &mut TransferBuffer<'_>) -> FloppyResult<TransferStatus> {
        self.transition(TransferState::Transferring);

        match buffer {
            TransferBuffer::Read(buf) => self.dma.arm_read(buf.len())?,
            TransferBuffer::Write(buf) => self.dma.arm_write(&buf[..])?,
        }
        self.ctx.bind_dma(buffer.len(), buffer.direction());

        let status = self.run_data_command(frame);

        if let (Ok(TransferStatus::Complete), TransferBuffer::Read(buf)) = (&status, buffer) {
            self.dma.collect(buf);
        }

        self.dma.disarm();
        self.ctx.release_dma();

        status
    }

    fn run_data_command(&mut self, frame: &CommandFrame) -> FloppyResult<TransferStatus> {
        self.ctx.irq().arm();

        if let Err(err) = self.engine.send(&mut self.ports, frame) {
            self.ctx.irq().disarm();
            return Err(err);
        }

        self.wait_for_interrupt()?;

        self.transition(TransferState::SenseStatus);
        let result = self.engine.read_result(&mut self.ports, frame)?;

        Ok(TransferStatus::from_result(&result))
    }

    /// Reads ST3 of the selected drive on head 0
    pub fn drive_status(&mut self) -> FloppyResult<St3> {
        self.cancel.reset();

        let result = self
            .select_drive()
            .and_then(|()| self.command(&CommandFrame::drive_status(self.ctx.drive(), 0)));

        self.transition(TransferState::Idle);

        let result = result.map_err(|err| self.fault(err))?;

        Ok(St3::from_bits_retain(result.first().copied().unwrap_or_default()))
    }

    pub fn is_write_protected(&mut self) -> FloppyResult<bool> {
        Ok(self.drive_status()?.contains(St3::WRITE_PROTECTED))
    }
}
